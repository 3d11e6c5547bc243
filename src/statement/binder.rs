use crate::error::{Result, SqlCursorError};
use crate::statement::{Statement, SubStatement};
use crate::types::SqlValue;

/// A statement together with values for every one of its slots.
///
/// Values travel to the driver separately from the statement text, so their
/// content (quotes, semicolons, keywords) can never change what is executed.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    statement: Statement,
    params: Vec<SqlValue>,
}

impl BoundStatement {
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Each sub-statement paired with its own slice of the bound values.
    pub(crate) fn parts(&self) -> impl Iterator<Item = (&SubStatement, &[SqlValue])> + '_ {
        self.statement
            .sub_statements()
            .iter()
            .map(move |part| (part, &self.params[part.param_range()]))
    }
}

/// Checks count, then each value against its slot's declared type.
/// Positions in `TypeMismatch` are 1-based.
pub(super) fn bind(statement: &Statement, params: Vec<SqlValue>) -> Result<BoundStatement> {
    if params.len() != statement.arity() {
        return Err(SqlCursorError::ArityMismatch {
            expected: statement.arity(),
            actual: params.len(),
        });
    }

    for (i, (expected, value)) in statement.param_types().iter().zip(&params).enumerate() {
        if !expected.accepts(value) {
            return Err(SqlCursorError::TypeMismatch {
                position: i + 1,
                expected: *expected,
                actual: value.sql_type(),
            });
        }
    }

    Ok(BoundStatement {
        statement: statement.clone(),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    #[test]
    fn arity_must_match_exactly() {
        let stmt = Statement::compile("INSERT INTO t VALUES (?, ?)").unwrap();

        for count in [0, 1, 3] {
            let values = vec![SqlValue::Int(1); count];
            match stmt.bind(values) {
                Err(SqlCursorError::ArityMismatch { expected, actual }) => {
                    assert_eq!(expected, 2);
                    assert_eq!(actual, count);
                }
                other => panic!("expected ArityMismatch, got {other:?}"),
            }
        }
        assert!(stmt.bind([1, 2]).is_ok());
    }

    #[test]
    fn type_mismatch_reports_position() {
        let stmt = Statement::compile("UPDATE movies SET title = ? WHERE id = ?")
            .unwrap()
            .with_param_types([SqlType::Text, SqlType::Integer])
            .unwrap();

        let err = stmt.bind(["Inception", "1 OR 1=1"]).unwrap_err();
        match err {
            SqlCursorError::TypeMismatch {
                position,
                expected,
                actual,
            } => {
                assert_eq!(position, 2);
                assert_eq!(expected, SqlType::Integer);
                assert_eq!(actual, SqlType::Text);
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn hostile_text_stays_a_value() {
        let stmt = Statement::compile("SELECT * FROM users WHERE name = ?").unwrap();
        let hostile = "x'; DROP TABLE users; --";
        let bound = stmt.bind([hostile]).unwrap();

        assert_eq!(bound.statement().text(), "SELECT * FROM users WHERE name = ?");
        assert_eq!(bound.params(), &[SqlValue::from(hostile)]);
    }

    #[test]
    fn parts_split_values_by_sub_statement() {
        let stmt = Statement::compile("INSERT INTO t VALUES (?); SELECT ?, ?").unwrap();
        let bound = stmt.bind([1, 2, 3]).unwrap();
        let parts: Vec<_> = bound.parts().map(|(_, params)| params.to_vec()).collect();

        assert_eq!(
            parts,
            vec![
                vec![SqlValue::Int(1)],
                vec![SqlValue::Int(2), SqlValue::Int(3)]
            ]
        );
    }
}

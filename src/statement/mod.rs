//! Compiled statement templates and parameter binding.
//!
//! Templates use `?` for every positional parameter. A template may hold a
//! batch of `;`-separated statements; parameters are numbered across the
//! whole batch in the order they appear.
//!
//! Literals follow standard SQL quoting: a quote inside a literal is written
//! twice (`'it''s'`). Backslash escapes such as MySQL's `'it\'s'` are not
//! recognized; with those, the scanner sees the backslashed quote as the end
//! of the literal.

mod binder;
mod scanner;

use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Result, SqlCursorError};
use crate::types::{SqlType, SqlValue};

pub use binder::BoundStatement;

/// How a driver expects positional placeholders to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderStyle {
    /// `?` for every parameter (MySQL, SQLite).
    #[default]
    QuestionMark,
    /// `$1`, `$2`, ... numbered per statement (PostgreSQL).
    Dollar,
}

/// One statement of a (possibly single-element) batch.
#[derive(Debug)]
pub struct SubStatement {
    text: String,
    /// Byte offsets of each `?` within `text`.
    slots: Vec<usize>,
    params: Range<usize>,
}

impl SubStatement {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// The positions of this statement's parameters within the batch's bound values.
    pub fn param_range(&self) -> Range<usize> {
        self.params.clone()
    }

    /// Writes the statement with placeholders in the driver's style.
    /// Uses the slot offsets recorded at compile time; the text is not rescanned.
    pub fn render(&self, style: PlaceholderStyle) -> Cow<'_, str> {
        match style {
            PlaceholderStyle::QuestionMark => Cow::Borrowed(&self.text),
            PlaceholderStyle::Dollar if self.slots.is_empty() => Cow::Borrowed(&self.text),
            PlaceholderStyle::Dollar => {
                let mut out = String::with_capacity(self.text.len() + self.slots.len() * 2);
                let mut last = 0;
                for (n, &slot) in self.slots.iter().enumerate() {
                    out.push_str(&self.text[last..slot]);
                    out.push('$');
                    out.push_str(&(n + 1).to_string());
                    last = slot + 1;
                }
                out.push_str(&self.text[last..]);
                Cow::Owned(out)
            }
        }
    }
}

/// An immutable, compiled query template with a fixed parameter arity.
///
/// Cloning is cheap; a statement can be bound and executed any number of
/// times without parsing the template again.
///
/// # Example
/// ```
/// use sqlcursor::{Statement, SqlType};
///
/// let stmt = Statement::compile("SELECT * FROM movies WHERE collection_in_mil > ?")?
///     .with_param_types([SqlType::Integer])?;
/// assert_eq!(stmt.arity(), 1);
/// assert!(stmt.bind(["300"]).is_err());
/// assert!(stmt.bind([300]).is_ok());
/// # Ok::<(), sqlcursor::SqlCursorError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Statement {
    text: Arc<str>,
    parts: Arc<[SubStatement]>,
    param_types: Arc<[SqlType]>,
}

impl Statement {
    /// Parses a template, validating placeholders and recording the arity.
    pub fn compile(template: &str) -> Result<Self> {
        let segments = scanner::scan(template)?;
        let mut parts = Vec::with_capacity(segments.len());
        let mut next_param = 0;
        for segment in segments {
            let arity = segment.slots.len();
            parts.push(SubStatement {
                text: template[segment.start..segment.end].to_string(),
                slots: segment.slots.iter().map(|s| s - segment.start).collect(),
                params: next_param..next_param + arity,
            });
            next_param += arity;
        }

        Ok(Self {
            text: Arc::from(template),
            parts: parts.into(),
            param_types: vec![SqlType::Any; next_param].into(),
        })
    }

    /// Declares the type of every parameter slot, in order.
    pub fn with_param_types(self, types: impl IntoIterator<Item = SqlType>) -> Result<Self> {
        let types: Vec<SqlType> = types.into_iter().collect();
        if types.len() != self.arity() {
            return Err(SqlCursorError::ArityMismatch {
                expected: self.arity(),
                actual: types.len(),
            });
        }
        Ok(Self {
            param_types: types.into(),
            ..self
        })
    }

    /// Binds values to the slots. See [`BoundStatement`].
    pub fn bind<I, V>(&self, params: I) -> Result<BoundStatement>
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        binder::bind(self, params.into_iter().map(Into::into).collect())
    }

    /// Binds a statement that takes no parameters.
    pub fn bind_empty(&self) -> Result<BoundStatement> {
        binder::bind(self, Vec::new())
    }

    /// The template as it was compiled.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Total number of parameters across the batch.
    pub fn arity(&self) -> usize {
        self.param_types.len()
    }

    pub fn param_types(&self) -> &[SqlType] {
        &self.param_types
    }

    pub fn sub_statements(&self) -> &[SubStatement] {
        &self.parts
    }

    /// True when the template holds more than one statement.
    pub fn is_batch(&self) -> bool {
        self.parts.len() > 1
    }
}

impl std::str::FromStr for Statement {
    type Err = SqlCursorError;

    fn from_str(s: &str) -> Result<Self> {
        Statement::compile(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_records_arity_per_sub_statement() {
        let stmt = Statement::compile(
            "INSERT INTO movies (title, release_year) VALUES (?, ?); SELECT * FROM movies WHERE id = ?",
        )
        .unwrap();

        assert!(stmt.is_batch());
        assert_eq!(stmt.arity(), 3);
        let parts = stmt.sub_statements();
        assert_eq!(parts[0].arity(), 2);
        assert_eq!(parts[0].param_range(), 0..2);
        assert_eq!(parts[1].text(), "SELECT * FROM movies WHERE id = ?");
        assert_eq!(parts[1].param_range(), 2..3);
    }

    #[test]
    fn render_dollar_numbers_each_sub_statement_from_one() {
        let stmt = Statement::compile("UPDATE t SET a = ? WHERE b = '?' AND c = ?; DELETE FROM t WHERE d = ?")
            .unwrap();
        let parts = stmt.sub_statements();

        assert_eq!(
            parts[0].render(PlaceholderStyle::Dollar),
            "UPDATE t SET a = $1 WHERE b = '?' AND c = $2"
        );
        assert_eq!(parts[1].render(PlaceholderStyle::Dollar), "DELETE FROM t WHERE d = $1");
        assert!(matches!(
            parts[1].render(PlaceholderStyle::QuestionMark),
            Cow::Borrowed("DELETE FROM t WHERE d = ?")
        ));
    }

    #[test]
    fn with_param_types_checks_count() {
        let stmt = Statement::compile("SELECT ?, ?").unwrap();
        let err = stmt.clone().with_param_types([SqlType::Text]).unwrap_err();
        assert!(matches!(
            err,
            SqlCursorError::ArityMismatch {
                expected: 2,
                actual: 1
            }
        ));
        let typed = stmt.with_param_types([SqlType::Text, SqlType::Integer]).unwrap();
        assert_eq!(typed.param_types(), &[SqlType::Text, SqlType::Integer]);
    }

    #[test]
    fn parse_errors_surface_from_compile() {
        let err = "SELECT 'oops".parse::<Statement>().unwrap_err();
        assert!(matches!(err, SqlCursorError::Parse { position: 7, .. }));
    }
}

use crate::error::{Result, SqlCursorError};

/// One `;`-delimited piece of a template, trimmed of surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Segment {
    pub start: usize,
    pub end: usize,
    /// Absolute byte offsets of each `?` slot inside the segment.
    pub slots: Vec<usize>,
    /// Something other than whitespace and comments was seen.
    pub has_tokens: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

impl State {
    fn describe(&self) -> &'static str {
        match self {
            State::SingleQuoted => "unterminated string literal",
            State::DoubleQuoted | State::Backticked => "unterminated quoted identifier",
            State::BlockComment(_) => "unterminated block comment",
            State::DollarQuoted(_) => "unterminated dollar-quoted block",
            State::Normal | State::LineComment => "",
        }
    }
}

fn parse_error(position: usize, message: impl Into<String>) -> SqlCursorError {
    SqlCursorError::Parse {
        position,
        message: message.into(),
    }
}

/// Splits a template into statements and records placeholder positions.
///
/// Quotes, comments, and dollar-quoted blocks are skipped, so a `?` or `;`
/// inside them is plain text. SQL semantics are not checked.
pub(super) fn scan(template: &str) -> Result<Vec<Segment>> {
    let bytes = template.as_bytes();
    let mut segments = Vec::new();
    let mut slots = Vec::new();
    let mut segment_start = 0;
    let mut has_tokens = false;
    let mut state = State::Normal;
    let mut state_start = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' | b'"' | b'`' => {
                    let quoted = match b {
                        b'\'' => State::SingleQuoted,
                        b'"' => State::DoubleQuoted,
                        _ => State::Backticked,
                    };
                    (state, state_start) = (quoted, idx);
                    has_tokens = true;
                }
                _ if is_pair(bytes, idx, b'-', b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                _ if is_pair(bytes, idx, b'/', b'*') => {
                    (state, state_start) = (State::BlockComment(1), idx);
                    idx += 1;
                }
                b'$' => {
                    has_tokens = true;
                    if let Some((tag, close)) = try_start_dollar_quote(bytes, idx) {
                        (state, state_start) = (State::DollarQuoted(tag), idx);
                        idx = close;
                    } else if bytes.get(idx + 1).is_some_and(u8::is_ascii_digit) {
                        return Err(parse_error(
                            idx,
                            "numbered placeholders are not supported; use `?`",
                        ));
                    }
                }
                b'?' => {
                    if bytes.get(idx + 1).is_some_and(u8::is_ascii_digit) {
                        return Err(parse_error(
                            idx,
                            "numbered placeholders are not supported; use `?`",
                        ));
                    }
                    slots.push(idx);
                    has_tokens = true;
                }
                b';' => {
                    let slots = std::mem::take(&mut slots);
                    segments.push(trimmed(template, segment_start, idx, slots, has_tokens));
                    segment_start = idx + 1;
                    has_tokens = false;
                }
                _ if !b.is_ascii_whitespace() => has_tokens = true,
                _ => {}
            },
            State::SingleQuoted | State::DoubleQuoted | State::Backticked => {
                let quote = match state {
                    State::SingleQuoted => b'\'',
                    State::DoubleQuoted => b'"',
                    _ => b'`',
                };
                if b == quote {
                    if bytes.get(idx + 1) == Some(&quote) {
                        idx += 1; // doubled quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_pair(bytes, idx, b'/', b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_pair(bytes, idx, b'*', b'/') {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }

    if !matches!(state, State::Normal | State::LineComment) {
        return Err(parse_error(state_start, state.describe()));
    }
    segments.push(trimmed(template, segment_start, bytes.len(), slots, has_tokens));

    // Whitespace or comments after the last `;` do not form a statement.
    if segments.len() > 1 && segments.last().is_some_and(|s| !s.has_tokens) {
        segments.pop();
    }
    if let Some(empty) = segments.iter().find(|s| !s.has_tokens) {
        return Err(parse_error(empty.start, "empty statement"));
    }
    Ok(segments)
}

fn trimmed(template: &str, start: usize, end: usize, slots: Vec<usize>, has_tokens: bool) -> Segment {
    let raw = &template[start..end];
    let lead = raw.len() - raw.trim_start().len();
    let body = raw.trim();
    Segment {
        start: start + lead,
        end: start + lead + body.len(),
        slots,
        has_tokens,
    }
}

fn is_pair(bytes: &[u8], idx: usize, first: u8, second: u8) -> bool {
    bytes.get(idx) == Some(&first) && bytes.get(idx + 1) == Some(&second)
}

/// Recognizes `$tag$` openers; returns the tag and the index of the closing `$`.
fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphabetic() || b == b'_' || (idx > start + 1 && b.is_ascii_digit())) {
            return None;
        }
        idx += 1;
    }

    if idx < bytes.len() {
        let tag = std::str::from_utf8(&bytes[start + 1..idx]).ok()?.to_string();
        Some((tag, idx))
    } else {
        None
    }
}

fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    bytes.get(idx + 1..end) == Some(tag.as_bytes()) && bytes.get(end) == Some(&b'$')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(template: &str) -> Vec<&str> {
        scan(template)
            .unwrap()
            .into_iter()
            .map(|s| &template[s.start..s.end])
            .collect()
    }

    #[test]
    fn records_slots_outside_literals_and_comments() {
        let sql = "select '?', \"a?\" -- ?\n/* ? */ from t where a = ? and b = ?";
        let segments = scan(sql).unwrap();
        assert_eq!(segments.len(), 1);
        let slots: Vec<&str> = segments[0].slots.iter().map(|&i| &sql[i..=i]).collect();
        assert_eq!(slots, ["?", "?"]);
        assert_eq!(segments[0].slots[0], sql.find("a = ?").unwrap() + 4);
    }

    #[test]
    fn splits_batches_on_top_level_semicolons() {
        let sql = "INSERT INTO t VALUES ('a;b'); SELECT 1; SELECT $x$;$x$;";
        assert_eq!(
            texts(sql),
            ["INSERT INTO t VALUES ('a;b')", "SELECT 1", "SELECT $x$;$x$"]
        );
    }

    #[test]
    fn doubled_quotes_stay_inside_literal() {
        let sql = "SELECT 'it''s ?' WHERE a = ?";
        let segments = scan(sql).unwrap();
        assert_eq!(segments[0].slots.len(), 1);
    }

    #[test]
    fn nested_block_comments() {
        let sql = "SELECT /* a /* ? */ ; */ ?";
        let segments = scan(sql).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].slots.len(), 1);
    }

    #[test]
    fn rejects_unterminated_constructs() {
        for (sql, position) in [("SELECT 'abc", 7), ("SELECT /* x", 7), ("SELECT $a$ x", 7)] {
            match scan(sql) {
                Err(SqlCursorError::Parse { position: p, .. }) => assert_eq!(p, position, "{sql}"),
                other => panic!("expected parse error for {sql}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_numbered_placeholders() {
        assert!(scan("SELECT * FROM t WHERE a = $1").is_err());
        assert!(scan("SELECT * FROM t WHERE a = ?1").is_err());
    }

    #[test]
    fn rejects_empty_statements() {
        assert!(scan("").is_err());
        assert!(scan("   ").is_err());
        assert!(scan("-- nothing here").is_err());
        assert!(scan("SELECT 1;; SELECT 2").is_err());
        assert!(scan("SELECT 1; /* skipped */; SELECT 2").is_err());
    }

    #[test]
    fn trailing_comment_is_not_a_statement() {
        assert_eq!(texts("SELECT 1; -- done"), ["SELECT 1"]);
        assert_eq!(texts("SELECT 1; /* done */\n"), ["SELECT 1"]);
        assert_eq!(texts("SELECT 1 -- done"), ["SELECT 1 -- done"]);
    }

    #[test]
    fn backslash_is_not_an_escape() {
        // Standard SQL doubles quotes; `\'` closes the literal, leaving one unterminated.
        assert!(matches!(
            scan(r"SELECT 'it\'s ?' FROM t"),
            Err(SqlCursorError::Parse { position: 15, .. })
        ));
        let segments = scan(r"SELECT 'C:\dir\' WHERE a = ?").unwrap();
        assert_eq!(segments[0].slots.len(), 1);
    }
}

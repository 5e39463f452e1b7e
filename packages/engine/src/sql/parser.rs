use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

/// Failure to derive any safe reading of the input. Deliberately not part of
/// the boundary error taxonomy: malformed SQL is a developer-facing
/// programming error and is expected to fail loudly at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlParseError {
    pub message: String,
}

impl std::fmt::Display for SqlParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SqlParseError {}

/// One top-level command of a (possibly multi-statement) SQL string.
///
/// `Raw` spans are kept verbatim so downstream stages treat the whole script
/// as passthrough; concatenating segments in order always reproduces
/// semantically-equivalent SQL.
#[derive(Debug, Clone)]
pub enum Segment {
    Parsed(Box<Statement>),
    Raw(String),
}

#[derive(Debug, Clone)]
pub struct ScriptStatement {
    pub segment: Segment,
}

impl ScriptStatement {
    pub fn parsed(&self) -> Option<&Statement> {
        match &self.segment {
            Segment::Parsed(statement) => Some(statement),
            Segment::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.segment, Segment::Raw(_))
    }
}

/// Parses a SQL string into independent statements, splitting on top-level
/// semicolons. Statements sqlparser rejects but that are lexically balanced
/// become `Raw` segments instead of errors; only genuinely malformed input
/// (unterminated quotes, unbalanced parentheses) is rejected.
pub fn parse_script(sql: &str) -> Result<Vec<ScriptStatement>, SqlParseError> {
    let dialect = SQLiteDialect {};

    if let Ok(statements) = Parser::parse_sql(&dialect, sql) {
        return Ok(statements
            .into_iter()
            .map(|statement| ScriptStatement {
                segment: Segment::Parsed(Box::new(statement)),
            })
            .collect());
    }

    let mut script = Vec::new();
    for piece in split_sql_statements(sql)? {
        match Parser::parse_sql(&dialect, &piece) {
            Ok(statements) if !statements.is_empty() => {
                script.extend(statements.into_iter().map(|statement| ScriptStatement {
                    segment: Segment::Parsed(Box::new(statement)),
                }));
            }
            Ok(_) => {}
            Err(_) => script.push(ScriptStatement {
                segment: Segment::Raw(piece),
            }),
        }
    }
    Ok(script)
}

/// Splits on semicolons outside string literals, quoted identifiers, and
/// parentheses. Shared with boundary hosts that need to run rewritten
/// multi-statement SQL one statement at a time.
pub fn split_sql_statements(sql: &str) -> Result<Vec<String>, SqlParseError> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();
    let mut paren_depth: i64 = 0;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                current.push(ch);
                consume_quoted(&mut chars, &mut current, ch)?;
            }
            '(' => {
                paren_depth += 1;
                current.push(ch);
            }
            ')' => {
                paren_depth -= 1;
                if paren_depth < 0 {
                    return Err(SqlParseError {
                        message: "unbalanced closing parenthesis in SQL".to_string(),
                    });
                }
                current.push(ch);
            }
            ';' if paren_depth == 0 => {
                let piece = current.trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if paren_depth != 0 {
        return Err(SqlParseError {
            message: "unbalanced parentheses in SQL".to_string(),
        });
    }

    let piece = current.trim();
    if !piece.is_empty() {
        pieces.push(piece.to_string());
    }
    Ok(pieces)
}

fn consume_quoted(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    current: &mut String,
    quote: char,
) -> Result<(), SqlParseError> {
    while let Some(ch) = chars.next() {
        current.push(ch);
        if ch == quote {
            // A doubled quote is an escaped quote, not a terminator.
            if chars.peek() == Some(&quote) {
                current.push(quote);
                chars.next();
                continue;
            }
            return Ok(());
        }
    }
    Err(SqlParseError {
        message: format!("unterminated {quote} quote in SQL"),
    })
}

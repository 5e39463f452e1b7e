use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Statement, Value as SqlValue, VisitMut, VisitorMut};

use crate::EngineError;

/// Rewrites every bare `?` placeholder to an explicit `?N` so later clause
/// reordering can never re-bind parameters. Ordinals are assigned
/// left-to-right in source order, globally across all statements of one
/// script; explicit `?N` placeholders keep their position and advance the
/// running ordinal the way SQLite does. Returns whether any token was
/// rewritten, so callers know the script text changed.
pub(crate) fn normalize_placeholders(
    statements: &mut [Statement],
    params_len: usize,
) -> Result<bool, EngineError> {
    let mut binder = PlaceholderBinder {
        params_len,
        next_ordinal: 0,
        rewrote: false,
    };
    for statement in statements.iter_mut() {
        if let ControlFlow::Break(error) = statement.visit(&mut binder) {
            return Err(error);
        }
    }
    Ok(binder.rewrote)
}

struct PlaceholderBinder {
    params_len: usize,
    next_ordinal: usize,
    rewrote: bool,
}

impl VisitorMut for PlaceholderBinder {
    type Break = EngineError;

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        let Expr::Value(SqlValue::Placeholder(token)) = expr else {
            return ControlFlow::Continue(());
        };
        match resolve_placeholder_position(token, self.params_len, &mut self.next_ordinal) {
            Ok(position) => {
                let normalized = format!("?{position}");
                if *token != normalized {
                    *token = normalized;
                    self.rewrote = true;
                }
                ControlFlow::Continue(())
            }
            Err(error) => ControlFlow::Break(error),
        }
    }
}

/// Returns the 1-based parameter position for a placeholder token.
fn resolve_placeholder_position(
    token: &str,
    params_len: usize,
    next_ordinal: &mut usize,
) -> Result<usize, EngineError> {
    let trimmed = token.trim();

    let position = if trimmed.is_empty() || trimmed == "?" {
        *next_ordinal += 1;
        *next_ordinal
    } else if let Some(numeric) = trimmed.strip_prefix('?') {
        let parsed = numeric.parse::<usize>().map_err(|_| {
            EngineError::protocol_mismatch(format!("invalid SQL placeholder '{trimmed}'"))
        })?;
        if parsed == 0 {
            return Err(EngineError::protocol_mismatch(format!(
                "invalid SQL placeholder '{trimmed}'"
            )));
        }
        *next_ordinal = (*next_ordinal).max(parsed);
        parsed
    } else {
        return Err(EngineError::protocol_mismatch(format!(
            "unsupported SQL placeholder format '{trimmed}'"
        )));
    };

    if position > params_len {
        return Err(EngineError::protocol_mismatch(format!(
            "placeholder '{trimmed}' references parameter {position} but only {params_len} parameters were provided"
        )));
    }
    Ok(position)
}

/// Extracts the 1-based position from an already-normalized placeholder.
pub(crate) fn placeholder_position(token: &str) -> Option<usize> {
    token.trim().strip_prefix('?')?.parse::<usize>().ok()
}

/// Fires when the document's classified diagnostics state equals the check's mode.
///
/// Classification precedence is errors > warnings > clean (see
/// `crate::diagnostics::classify`), so a `warnings` check never matches a
/// document that also has errors. Mode defaults to `errors`.
use super::{Check, MatchContext};
use crate::diagnostics::DiagnosticsState;

pub fn evaluate(check: &Check, ctx: &MatchContext) -> bool {
    let Some(document) = ctx.snapshot.document.as_ref() else {
        return false;
    };
    let mode = check.mode.unwrap_or(DiagnosticsState::Errors);
    ctx.diagnostics.diagnostics_state(document) == mode
}

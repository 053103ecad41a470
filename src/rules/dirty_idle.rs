/// Fires when the document has unsaved changes and the user has been idle
/// for at least `idleMs` (or the configured idle threshold when the rule
/// does not set one).
use super::{Check, MatchContext};

pub fn evaluate(check: &Check, ctx: &MatchContext) -> bool {
    if ctx.snapshot.document.is_none() || !ctx.snapshot.is_dirty {
        return false;
    }
    let required = check.idle_ms.unwrap_or(ctx.default_idle_ms);
    ctx.idle_duration_ms >= required
}

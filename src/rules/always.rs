/// Unconditional check. The rule fires on every occurrence of its trigger,
/// subject to `when` filtering and cooldowns like any other rule.
use super::{Check, MatchContext};

pub fn evaluate(_check: &Check, _ctx: &MatchContext) -> bool {
    true
}

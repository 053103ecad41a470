/// Built-in default rules: embedded at compile time from `data/default-rules.json`.
///
/// Used whenever the workspace has no usable rules file. The embedded
/// document goes through the same normalizer as user files, so the defaults
/// obey exactly the same invariants.
use crate::{rules::RuleSet, store};
use once_cell::sync::Lazy;
use std::path::Path;

const DEFAULT_RULES_JSON: &str = include_str!("../data/default-rules.json");

static DEFAULT_RULES: Lazy<RuleSet> = Lazy::new(|| {
    match store::parse_rules_document(DEFAULT_RULES_JSON, Path::new("<built-in>")) {
        Ok(rules) => rules.into(),
        Err(e) => {
            tracing::error!("Built-in default rules are invalid: {}", e);
            Vec::new().into()
        }
    }
});

/// The same shared rule set on every call.
pub fn default_rules() -> RuleSet {
    DEFAULT_RULES.clone()
}

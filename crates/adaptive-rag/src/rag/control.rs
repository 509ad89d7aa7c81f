//! Central control node: picks the one query string retrieval will use.

use super::judge::normalize;
use crate::types::{GateVerdict, QueryStrategy};

/// True when the rewrite only differs from the raw query in case or spacing.
pub fn is_identical_rewrite(raw_query: &str, rewritten_query: &str) -> bool {
    normalize(raw_query) == normalize(rewritten_query)
}

/// Pure decision over the analyzer's rewrite and the safety verdict.
pub fn decide_strategy(raw_query: &str, rewritten_query: &str, safety: &GateVerdict) -> QueryStrategy {
    if is_identical_rewrite(raw_query, rewritten_query) {
        QueryStrategy::Identical
    } else if safety.passed {
        QueryStrategy::RewriteAccepted
    } else {
        QueryStrategy::OriginalKept {
            reason: safety.reason.clone(),
        }
    }
}

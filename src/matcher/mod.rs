//! # Rule Matcher
//!
//! Policy side of the packet path:
//! - `compile`: rule descriptors to policies (destinations, quotas, protocol scope)
//! - `index`: per-network policy lists behind a longest-prefix trie, plus defaults
//! - `engine`: the matcher holding the active index, reload and per-packet verdicts

pub mod compile;
pub mod engine;
pub mod index;

pub use compile::{resolve_destination, Policy, RuleCompiler, UNBOUNDED};
pub use engine::{check_quota, MatchResult, ReloadStats, RuleMatcher};
pub use index::{select_policy, PolicyIndex, PolicyList};

//! # Sieve Rules
//!
//! The rule-evaluation engine behind the sieve filtering proxy. Every request
//! passing through the proxy is run against an ordered tree of rules; a rule
//! whose filter selectors all match is counted (optionally per aggregation
//! key) over a sliding window, and once the counter exceeds the rule's limit
//! its actions fire.
//!
//! ## Architecture
//!
//! The engine is organized leaves-first:
//! - **State**: the three-valued response-state lattice folded across rules
//! - **Selector**: a compiled predicate over one request attribute
//! - **Action**: the effects fired by a matching rule (log, block, shell)
//! - **Rule**: filters, aggregation selectors, actions, sub-rules and the
//!   live counters behind the sliding-window limit
//! - **Store**: the atomically swappable holder of the active rule tree
//!
//! ## Concurrency
//!
//! Rule trees are read-only during evaluation; per-rule counters use atomic
//! fetch-add and the aggregation maps take a reader/writer lock only for
//! insertion and sweeping. Reloads publish a fresh tree through a pointer
//! swap so in-flight evaluations finish against the tree they started with.

pub mod action;
pub mod context;
pub mod error;
pub mod rule;
pub mod selector;
pub mod state;
pub mod store;

pub use action::{Action, ActionSpec};
pub use context::{ProxyRequest, RequestContext};
pub use error::{ActionError, LoadError, SelectorError};
pub use rule::{count, evaluate, parse_file, parse_json, Rule, RuleSnapshot, RuleSpec};
pub use selector::Selector;
pub use state::ResponseState;
pub use store::RuleStore;

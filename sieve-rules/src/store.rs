//! The atomically swappable holder of the active rule tree.
//!
//! The proxy keeps one [`RuleStore`] for its whole lifetime. Every request
//! clones the current `Arc` once and evaluates against that tree; a reload
//! parses the file into a fresh tree and swaps the pointer, so in-flight
//! evaluations finish against the tree they started with and no reader ever
//! observes a half-built tree.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::LoadError;
use crate::rule::{self, Rule, RuleSnapshot};

#[derive(Debug)]
pub struct RuleStore {
    rules: RwLock<Arc<Vec<Rule>>>,
}

impl RuleStore {
    /// Loads the initial tree from a rule file.
    pub fn from_file(path: &Path) -> Result<RuleStore, LoadError> {
        let rules = rule::parse_file(path)?;
        Ok(RuleStore::from_rules(rules))
    }

    pub fn from_rules(rules: Vec<Rule>) -> RuleStore {
        RuleStore {
            rules: RwLock::new(Arc::new(rules)),
        }
    }

    /// The currently active tree. Callers hold the `Arc` for the duration
    /// of one evaluation.
    pub fn current(&self) -> Arc<Vec<Rule>> {
        Arc::clone(&self.rules.read())
    }

    /// Re-parses `path` and publishes the new tree, returning the total
    /// rule count. On error the previously active tree stays in place.
    pub fn reload(&self, path: &Path) -> Result<u64, LoadError> {
        let fresh = Arc::new(rule::parse_file(path)?);
        let total = rule::count(&fresh);
        *self.rules.write() = fresh;
        Ok(total)
    }

    /// Serializable dump of the active tree including live counters.
    pub fn snapshot(&self) -> Vec<RuleSnapshot> {
        self.current().iter().map(Rule::snapshot).collect()
    }
}

//! # Management API
//!
//! Operator-facing endpoints served on a separate listener, next to the
//! proxy data plane:
//!
//! - `GET /rules` — JSON snapshot of the active rule tree, including each
//!   rule's live request/match counters and aggregation buckets
//! - `GET|POST /reload_rules` — re-parse the rule file and swap it in
//!
//! The API shares the [`RuleStore`] with the proxy, so a successful reload
//! takes effect on the next request without interrupting in-flight ones.

pub mod rules_get;
pub mod rules_reload;

use std::sync::Arc;

use actix_web::web;
use sieve_rules::RuleStore;

/// Shared state of the management API.
pub struct ApiState {
    pub store: Arc<RuleStore>,
    /// Path of the rule file that reloads re-read.
    pub rule_file: String,
}

/// Mounts all API routes on the service configuration.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(rules_get::rules).service(rules_reload::reload_rules);
}

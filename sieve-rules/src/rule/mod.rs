//! Rules: the composite nodes of the filtering tree, and the walker that
//! evaluates an ordered rule list against a request.
//!
//! A rule applies when all of its filter selectors match. Applying bumps the
//! rule's request counter, increments the sliding-window bucket selected by
//! the aggregation key, and fires the rule's actions once the bucket count
//! exceeds the limit. Sub-rules are walked with the parent's current state
//! unless a `stop` rule fired.

mod aggregate;

pub use self::aggregate::{AggregationValue, BucketSnapshot, DEFAULT_BUCKET};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::action::{Action, ActionSpec};
use crate::context::RequestContext;
use crate::error::LoadError;
use crate::selector::Selector;
use crate::state::ResponseState;
use self::aggregate::AggregationMap;

/// How many filter-passing requests between sweeps of stale buckets.
const SWEEP_EVERY: u64 = 10;

/// Raw rule object as it appears in the rule file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interval: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub subrules: Vec<RuleSpec>,
}

/// A compiled rule. Structural fields are frozen after load; only the
/// counters and the aggregation buckets mutate at runtime.
#[derive(Debug)]
pub struct Rule {
    name: String,
    interval: u64,
    limit: u64,
    stop: bool,
    disabled: bool,
    filters: Vec<Selector>,
    raw_filters: Vec<String>,
    aggregations: Vec<Selector>,
    raw_aggregations: Vec<String>,
    actions: Vec<Action>,
    raw_actions: Vec<ActionSpec>,
    sub_rules: Vec<Rule>,
    request_count: AtomicU64,
    match_count: AtomicU64,
    values: AggregationMap,
}

/// Serializable view of a rule and its live counters for state dumps.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSnapshot {
    pub name: String,
    pub interval: u64,
    pub limit: u64,
    pub stop: bool,
    pub disabled: bool,
    pub request_count: u64,
    pub match_count: u64,
    pub filters: Vec<String>,
    pub aggregations: Vec<String>,
    pub values: BTreeMap<String, BucketSnapshot>,
    pub actions: Vec<ActionSpec>,
    pub subrules: Vec<RuleSnapshot>,
}

/// Evaluates an ordered rule list against a request, starting from
/// `Untouched`. The proxy forwards upstream iff the result is below
/// `Served`.
pub fn evaluate<C: RequestContext>(rules: &[Rule], ctx: &mut C) -> ResponseState {
    walk(rules, ResponseState::Untouched, ctx)
}

fn walk<C: RequestContext>(rules: &[Rule], inbound: ResponseState, ctx: &mut C) -> ResponseState {
    let mut state = inbound;
    for rule in rules {
        if rule.disabled {
            continue;
        }
        let before = rule.match_count();
        state = state.merge(rule.validate(ctx, state));
        // a firing stop rule suppresses the remaining siblings
        if rule.stop && rule.match_count() > before {
            break;
        }
    }
    state
}

/// Total number of rules in a tree, sub-rules included.
pub fn count(rules: &[Rule]) -> u64 {
    rules.iter().map(|rule| 1 + count(&rule.sub_rules)).sum()
}

/// Parses a rule file from disk. All-or-nothing: any error leaves no rules.
pub fn parse_file(path: &Path) -> Result<Vec<Rule>, LoadError> {
    let data = fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_json(&data)
}

/// Parses a JSON document holding a top-level array of rule objects.
pub fn parse_json(data: &[u8]) -> Result<Vec<Rule>, LoadError> {
    let specs: Vec<RuleSpec> = serde_json::from_slice(data)?;
    specs.into_iter().map(Rule::from_spec).collect()
}

fn parse_selectors(raw: &[String]) -> Result<Vec<Selector>, LoadError> {
    raw.iter()
        .map(|input| {
            Selector::parse(input).map_err(|source| LoadError::Selector {
                selector: input.clone(),
                source,
            })
        })
        .collect()
}

impl Rule {
    /// Compiles a raw rule object, recursively compiling its sub-rules.
    /// A rule carrying neither actions nor sub-rules can never do anything
    /// and is rejected.
    pub fn from_spec(spec: RuleSpec) -> Result<Rule, LoadError> {
        if spec.actions.is_empty() && spec.subrules.is_empty() {
            return Err(LoadError::EmptyRule(spec.name));
        }
        let filters = parse_selectors(&spec.filters)?;
        let aggregations = parse_selectors(&spec.aggregations)?;
        let actions = spec
            .actions
            .iter()
            .map(Action::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        let sub_rules = spec
            .subrules
            .into_iter()
            .map(Rule::from_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Rule {
            name: spec.name,
            interval: spec.interval,
            limit: spec.limit,
            stop: spec.stop,
            disabled: spec.disabled,
            filters,
            raw_filters: spec.filters,
            aggregations,
            raw_aggregations: spec.aggregations,
            actions,
            raw_actions: spec.actions,
            sub_rules,
            request_count: AtomicU64::new(0),
            match_count: AtomicU64::new(0),
            values: AggregationMap::default(),
        })
    }

    /// Runs the request through this rule. Returns a state `>=` the inbound
    /// state; thread-safe for concurrent calls with distinct contexts.
    pub fn validate<C: RequestContext>(
        &self,
        ctx: &mut C,
        inbound: ResponseState,
    ) -> ResponseState {
        // conjunctive gate; an empty filter list passes every request
        for filter in &self.filters {
            if !filter.matches(ctx).1 {
                return inbound;
            }
        }

        let now = epoch_seconds();
        let seen = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % SWEEP_EVERY == 0 {
            self.values.sweep(now, self.interval);
        }

        let key = self.aggregation_key(ctx);
        let bucket = self.values.bucket(&key, now);
        let fired = bucket.hit(self.limit, self.interval, now);

        let mut state = inbound;
        if fired {
            self.match_count.fetch_add(1, Ordering::Relaxed);
            for action in &self.actions {
                let contribution = action.response_state();
                // at most one serving action runs per request
                if state == ResponseState::Served && contribution == ResponseState::Served {
                    continue;
                }
                if let Err(err) = action.act(&self.name, ctx) {
                    log::error!("rule {:?}: {} action failed: {}", self.name, action.name(), err);
                }
                state = state.merge(contribution);
            }
        }

        if !(self.stop && fired) {
            state = walk(&self.sub_rules, state, ctx);
        }
        state
    }

    /// Builds the bucket key from the aggregation selectors. The found flag
    /// is ignored; an absent value contributes the empty string.
    fn aggregation_key<C: RequestContext>(&self, ctx: &C) -> String {
        if self.aggregations.is_empty() {
            return DEFAULT_BUCKET.to_string();
        }
        let mut key = String::new();
        for selector in &self.aggregations {
            let (value, _) = selector.matches(ctx);
            key.push('|');
            key.push_str(&value);
        }
        key
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            name: self.name.clone(),
            interval: self.interval,
            limit: self.limit,
            stop: self.stop,
            disabled: self.disabled,
            request_count: self.request_count(),
            match_count: self.match_count(),
            filters: self.raw_filters.clone(),
            aggregations: self.raw_aggregations.clone(),
            values: self.values.snapshot(),
            actions: self.raw_actions.clone(),
            subrules: self.sub_rules.iter().map(Rule::snapshot).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn stop(&self) -> bool {
        self.stop
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn sub_rules(&self) -> &[Rule] {
        &self.sub_rules
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Relaxed)
    }
}

fn epoch_seconds() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

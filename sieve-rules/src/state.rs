//! Response-state lattice folded across rule evaluations.

/// How far the engine has taken over the response for the current request.
///
/// States form a total order `Untouched < Modified < Served` and only ever
/// move upward while a request walks the rule tree. `Served` means a rule
/// action has produced a status and body, so the proxy must not contact the
/// upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResponseState {
    /// No rule touched the response; forward upstream.
    Untouched,
    /// Bookkeeping or headers were altered, but no body was produced.
    Modified,
    /// A response was produced by the engine.
    Served,
}

impl ResponseState {
    /// Folds two states, keeping the more advanced one.
    pub fn merge(self, other: ResponseState) -> ResponseState {
        self.max(other)
    }
}

//! Cross-cutting error taxonomy (spec §7).
//!
//! Every crate in the workspace defines its own `snafu`-derived error enum
//! for its own failure modes, but each variant also maps to one of these six
//! taxonomy buckets via a `kind()` method. Supervisors (the Indexer's health
//! loop, the consumer's subscriber) match on `Kind` rather than downcasting
//! concrete error types, so a new failure mode in a leaf crate doesn't force
//! a change to every caller up the stack.

use std::fmt;

/// Taxonomy bucket from spec §7. Determines how a failure propagates:
/// absorbed locally, retried, or escalated to a pause/stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// RPC/network/pub-sub/DB timeout. Retried up to `MAX_RETRIES`.
    Transient,
    /// Detected hash divergence. Not an error to callers; triggers re-scan.
    Reorg,
    /// Unparsable event log. Logged and skipped per-log.
    Decode,
    /// A business rule failed (LTV, availability). Reported as a rejection.
    Validation,
    /// Dedup collision with a different payload, or an impossible state
    /// transition. Logged; the entity is left unmutated.
    Invariant,
    /// DB init, bus auth, unsigned relayer config. Exits at startup;
    /// escalates to pause/stop at runtime.
    Fatal,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Kind::Transient => "transient",
            Kind::Reorg => "reorg",
            Kind::Decode => "decode",
            Kind::Validation => "validation",
            Kind::Invariant => "invariant",
            Kind::Fatal => "fatal",
        };
        write!(f, "{}", label)
    }
}

impl Kind {
    /// Whether a supervisor should retry the operation that produced this
    /// error, as opposed to absorbing it and moving on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Kind::Transient)
    }

    /// Whether this failure should pause the owning subsystem rather than
    /// being absorbed at the call site.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Kind::Fatal)
    }
}

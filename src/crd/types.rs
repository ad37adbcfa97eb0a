//! Shared types for the bucket CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a single bucket
///
/// Used both as the desired phase (spec, only `Online` is ever requested) and as the
/// observed phase (status). The observed phase has a fourth, implicit state `Unset`:
/// the absence of any prior status write, modelled as `Option::None`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BucketPhase {
    /// Cloud bucket creation was requested but is not yet visible
    Pending,
    /// Cloud bucket exists
    #[default]
    Online,
    /// Cloud bucket was observed online and has since vanished
    Offline,
}

impl BucketPhase {
    /// Position in the one-way order `Unset → Pending → Online → Offline`
    fn rank(phase: Option<BucketPhase>) -> u8 {
        match phase {
            None => 0,
            Some(BucketPhase::Pending) => 1,
            Some(BucketPhase::Online) => 2,
            Some(BucketPhase::Offline) => 3,
        }
    }

    /// Returns true if moving from `from` to `to` is a single forward step
    ///
    /// Observed phases only ever advance one step at a time; anything else
    /// (regressions, skips, self-transitions) must never be written.
    pub fn is_forward_transition(from: Option<BucketPhase>, to: BucketPhase) -> bool {
        Self::rank(Some(to)) == Self::rank(from) + 1
    }
}

impl std::fmt::Display for BucketPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Display wrapper for an observed phase that renders the missing value as `Unset`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObservedPhase(pub Option<BucketPhase>);

impl std::fmt::Display for ObservedPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(phase) => write!(f, "{phase}"),
            None => write!(f, "Unset"),
        }
    }
}

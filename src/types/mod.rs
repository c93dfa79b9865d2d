//! Core domain types.
//!
//! Identifiers, inbound signals, and the state each actor owns.

pub mod diff;
pub mod ids;
pub mod signal;
pub mod state;

pub use diff::{ChangeCounts, DiffResult, LinesExceeded};
pub use ids::{ActorId, PrNumber, RepoId, Sha, SignalId};
pub use signal::{
    Commit, CreateOrDeleteSignal, LabelAction, LabelSignal, PullRequest, PullRequestAction,
    PullRequestSignal, PushSignal, RebaseSignal, RefAction, RefType, Signal, SignalPayload,
};
pub use state::{ActorState, BranchState, Lifecycle, StalePhase, TrunkState, User};

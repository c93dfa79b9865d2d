//! Mailbox messages.
//!
//! Mailboxes are unbounded: the trunk actor sends rebase requests to its
//! repository actor, which in turn feeds the trunk, and a bounded channel
//! in that cycle could deadlock.

use crate::types::Signal;

#[derive(Debug)]
pub enum BranchMessage {
    Signal(Signal),
    /// Stop after the current handler and checkpoint.
    Shutdown,
}

#[derive(Debug)]
pub enum RepositoryMessage {
    /// A signal to route, from the dispatcher or from the trunk actor.
    Signal(Signal),
    /// Stop every branch actor, then exit.
    Shutdown,
}

//! Pruning of remembered signal ids.
//!
//! Actors remember every signal they handled so redeliveries are dropped.
//! Redelivery only happens within a bounded window, so ids older than the
//! TTL are forgotten, and if an actor still holds more than `max_signals`
//! the oldest go first.

use chrono::{DateTime, Duration, Utc};

use super::snapshot::ActorSnapshot;

#[derive(Debug, Clone)]
pub struct PruneConfig {
    /// How long a handled signal id is remembered. Default: 24 hours.
    pub signal_ttl: Duration,
    /// Upper bound on remembered ids. Default: 1000.
    pub max_signals: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        PruneConfig {
            signal_ttl: Duration::hours(24),
            max_signals: 1000,
        }
    }
}

/// Drops expired and excess signal ids from `snapshot`.
pub fn prune_seen_signals(snapshot: &mut ActorSnapshot, config: &PruneConfig, now: DateTime<Utc>) {
    let cutoff = now - config.signal_ttl;
    snapshot.seen_signals.retain(|_, seen_at| *seen_at >= cutoff);

    let excess = snapshot.seen_signals.len().saturating_sub(config.max_signals);
    if excess == 0 {
        return;
    }

    let mut by_age: Vec<_> = snapshot
        .seen_signals
        .iter()
        .map(|(id, at)| (*at, id.clone()))
        .collect();
    by_age.sort();
    for (_, id) in by_age.into_iter().take(excess) {
        snapshot.seen_signals.remove(&id);
    }
}

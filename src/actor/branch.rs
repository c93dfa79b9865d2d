//! Branch and trunk actors.
//!
//! A [`BranchActor`] owns the state of one branch: the latest commit, the
//! open pull request and its author, and the stale-warning phase. Signals
//! are handled strictly one at a time. Every state change is logged before
//! it is applied (see [`ActorStore`]), so a restarted actor resumes exactly
//! where it stopped.
//!
//! The trunk actor is the same type with [`Role::Trunk`]. On a push it asks
//! every other branch to rebase instead of measuring its own diff, and it
//! never goes stale.
//!
//! # Lifecycle
//!
//! Active until a branch-delete signal is handled, then Done: the state
//! directory is removed, the stale timer stops, and any later signal is
//! ignored.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::message::{BranchMessage, RepositoryMessage};
use super::stale::StaleMonitor;
use super::{ActorError, RepoContext, Result};
use crate::complexity;
use crate::git::{GitSession, SessionOutcome};
use crate::persistence::{ActorSnapshot, ActorStore, StateEventPayload};
use crate::services::{
    EventKind, EventRecord, MergeConflict, ServiceError, Services, StaleInfo, retry_with_backoff,
};
use crate::types::{
    ActorId, ActorState, BranchState, CreateOrDeleteSignal, LabelAction, LabelSignal,
    PullRequestAction, PullRequestSignal, PushSignal, RebaseSignal, RefAction, Signal, SignalId,
    SignalPayload, TrunkState, User,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Branch(String),
    Trunk,
}

/// What became of one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Already handled under the same signal id.
    Duplicate,
    /// Not relevant to this actor (wrong role, uninteresting action, or the
    /// actor is done).
    Ignored,
    /// A collaborator failed for good; the handler stopped part way.
    Abandoned,
}

pub struct BranchActor<S> {
    id: ActorId,
    ctx: Arc<RepoContext>,
    services: Arc<S>,
    /// `None` once the state directory has been removed.
    store: Option<ActorStore>,
    snapshot: ActorSnapshot,
    stale: StaleMonitor,
    repository: mpsc::UnboundedSender<RepositoryMessage>,
}

impl<S: Services> BranchActor<S> {
    /// Opens (or recovers) the actor's state.
    ///
    /// A recovered actor that was already Done keeps its directory until
    /// [`BranchActor::discard`] is called.
    pub fn open(
        ctx: Arc<RepoContext>,
        services: Arc<S>,
        role: Role,
        repository: mpsc::UnboundedSender<RepositoryMessage>,
    ) -> Result<Self> {
        let repo_id = ctx.repo.id();
        let id = match &role {
            Role::Branch(branch) => ActorId::branch(&repo_id, branch),
            Role::Trunk => ActorId::trunk(&repo_id),
        };
        let now = Utc::now();
        let initial = || match role {
            Role::Branch(branch) => ActorState::Branch(BranchState::new(branch, now)),
            Role::Trunk => ActorState::Trunk(TrunkState::new(&ctx.repo.default_branch, now)),
        };
        let (store, snapshot) =
            ActorStore::open(&ctx.actor_dir(&id), &id, initial, ctx.store.clone())?;

        let interval = ctx.repo.stale_after();
        let stale = match snapshot.state.stale_phase() {
            Some(phase) if !snapshot.is_done() => StaleMonitor::resume(interval, &phase, now),
            _ => StaleMonitor::stopped(interval),
        };

        Ok(BranchActor {
            id,
            ctx,
            services,
            store: Some(store),
            snapshot,
            stale,
            repository,
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn branch(&self) -> &str {
        self.snapshot.state.branch()
    }

    pub fn snapshot(&self) -> &ActorSnapshot {
        &self.snapshot
    }

    pub fn stale_monitor(&self) -> &StaleMonitor {
        &self.stale
    }

    pub fn is_done(&self) -> bool {
        self.snapshot.is_done()
    }

    fn is_trunk(&self) -> bool {
        self.snapshot.state.is_trunk()
    }

    /// Removes the state directory of an actor that will not run.
    pub fn discard(mut self) -> Result<()> {
        if let Some(store) = self.store.take() {
            store.destroy()?;
        }
        Ok(())
    }

    // ─── Signal handling ───

    /// Handles one signal.
    ///
    /// Collaborator failures end the handler early and come back as
    /// [`Disposition::Abandoned`]; only state-store failures are errors.
    #[instrument(skip_all, fields(actor = %self.id, signal = %signal.id, kind = signal.kind()))]
    pub async fn handle(&mut self, signal: Signal) -> Result<Disposition> {
        if self.is_done() {
            debug!("actor is done, ignoring signal");
            return Ok(Disposition::Ignored);
        }
        if self.snapshot.has_seen(&signal.id) {
            debug!("duplicate signal");
            return Ok(Disposition::Duplicate);
        }

        let outcome = match &signal.payload {
            SignalPayload::Push(push) => self.on_push(&signal.id, push).await,
            SignalPayload::Rebase(rebase) => self.on_rebase(&signal.id, rebase).await,
            SignalPayload::PullRequest(pr) => self.on_pull_request(pr).await,
            SignalPayload::Label(label) => self.on_label(label).await,
            SignalPayload::CreateOrDelete(change) => self.on_create_or_delete(change),
        };

        let disposition = match outcome {
            Ok(disposition) => {
                if !self.is_done() {
                    self.record(StateEventPayload::SignalSeen {
                        id: signal.id.clone(),
                        at: Utc::now(),
                    })?;
                }
                disposition
            }
            Err(ActorError::Service(e)) => {
                warn!(error = %e, "handler abandoned");
                Disposition::Abandoned
            }
            Err(e) => return Err(e),
        };
        self.persist_progress()?;
        Ok(disposition)
    }

    /// Records the push's latest commit, restarts the stale interval, and
    /// checks the diff size. The trunk fans out rebase requests instead.
    async fn on_push(&mut self, signal_id: &SignalId, push: &PushSignal) -> Result<Disposition> {
        if let Some(latest) = push.latest_commit() {
            let superseded = self
                .snapshot
                .state
                .last_commit()
                .is_some_and(|recorded| recorded.timestamp > latest.timestamp);
            if superseded {
                debug!(commit = %latest.sha.short(), "push is older than recorded commit");
            } else {
                self.record(StateEventPayload::CommitRecorded {
                    commit: latest.clone(),
                })?;
            }
        }

        if self.is_trunk() {
            return self.request_rebases(signal_id, push).await;
        }

        self.record(StateEventPayload::ActivityReset { at: Utc::now() })?;
        self.stale.reset();

        let evaluation = complexity::evaluate(
            &*self.services,
            self.ctx.retry,
            &self.ctx.repo,
            self.branch(),
        )
        .await?;
        if let Some(change) = evaluation.lines_exceeded() {
            let user = self.resolve_user(&push.sender).await;
            let event = self.event(Some(signal_id), user, EventKind::LinesExceeded(change));
            self.emit(&event).await?;
        }
        Ok(Disposition::Handled)
    }

    /// Trunk only: asks every other non-internal branch to rebase.
    async fn request_rebases(
        &self,
        signal_id: &SignalId,
        push: &PushSignal,
    ) -> Result<Disposition> {
        let services = &*self.services;
        let repo_id = self.ctx.repo.id();
        let repo_id = &repo_id;
        let branches =
            retry_with_backoff(self.ctx.retry, move || services.get_all_branches(repo_id)).await?;

        let mut requested = 0usize;
        for branch in branches.iter().filter(|b| self.ctx.repo.wants_rebase(b)) {
            let signal = Signal::new(
                SignalId::derived(signal_id, "rebase", branch),
                SignalPayload::Rebase(RebaseSignal {
                    branch: branch.clone(),
                    push: push.clone(),
                }),
            );
            self.repository
                .send(RepositoryMessage::Signal(signal))
                .map_err(|_| ActorError::ChannelClosed)?;
            requested += 1;
        }
        info!(requested, total = branches.len(), "requested rebases onto trunk");
        Ok(Disposition::Handled)
    }

    /// Rebases the branch onto the default branch in a fresh workspace.
    ///
    /// A conflict is reported and nothing is pushed. State is not touched
    /// either way.
    async fn on_rebase(
        &mut self,
        signal_id: &SignalId,
        rebase: &RebaseSignal,
    ) -> Result<Disposition> {
        if self.is_trunk() {
            debug!("trunk does not rebase");
            return Ok(Disposition::Ignored);
        }
        let branch = self.branch().to_string();
        if rebase.branch != branch {
            warn!(target_branch = %rebase.branch, "rebase request for another branch");
            return Ok(Disposition::Ignored);
        }

        let session = GitSession::open(
            &*self.services,
            self.ctx.retry,
            &self.ctx.workspace_root,
            &self.ctx.repo,
            &branch,
            &rebase.push,
        );
        let outcome = session.rebase_onto_default().await;
        session.close().await;

        match outcome? {
            SessionOutcome::Pushed => Ok(Disposition::Handled),
            SessionOutcome::Conflict { files } => {
                let (head, base) = match self.snapshot.state.pull_request() {
                    Some(pr) => (pr.head.clone(), pr.base.clone()),
                    None => (branch.clone(), branch.clone()),
                };
                let commit = self
                    .snapshot
                    .state
                    .last_commit()
                    .or_else(|| rebase.push.latest_commit())
                    .cloned();
                info!(files = files.len(), %head, %base, "rebase conflict");
                let conflict = MergeConflict {
                    head,
                    base,
                    commit,
                    files,
                };
                let event =
                    self.event(Some(signal_id), self.author(), EventKind::MergeConflict(conflict));
                self.emit(&event).await?;
                Ok(Disposition::Handled)
            }
        }
    }

    async fn on_pull_request(&mut self, signal: &PullRequestSignal) -> Result<Disposition> {
        if self.is_trunk() {
            return Ok(Disposition::Ignored);
        }
        match signal.action {
            PullRequestAction::Opened | PullRequestAction::Reopened => {
                let author = self.resolve_user(&signal.author).await;
                self.record(StateEventPayload::PullRequestOpened {
                    pull_request: signal.pull_request.clone(),
                    author,
                })?;
                info!(pr = %signal.pull_request.number, "pull request opened");
                Ok(Disposition::Handled)
            }
            PullRequestAction::Closed if self.snapshot.state.pull_request().is_some() => {
                self.record(StateEventPayload::PullRequestClosed {
                    number: signal.pull_request.number,
                })?;
                info!(pr = %signal.pull_request.number, "pull request closed");
                Ok(Disposition::Handled)
            }
            PullRequestAction::Closed | PullRequestAction::Other => Ok(Disposition::Ignored),
        }
    }

    /// Hands the pull request to the merge queue when a merge label is added.
    async fn on_label(&self, signal: &LabelSignal) -> Result<Disposition> {
        if self.is_trunk() || signal.action != LabelAction::Labeled {
            return Ok(Disposition::Ignored);
        }
        let repo = &self.ctx.repo;
        let priority = if signal.label.eq_ignore_ascii_case(&repo.merge_label) {
            false
        } else if signal.label.eq_ignore_ascii_case(&repo.priority_merge_label) {
            true
        } else {
            return Ok(Disposition::Ignored);
        };

        let services = &*self.services;
        let branch = self.branch();
        retry_with_backoff(self.ctx.retry, move || {
            services.enqueue(branch, signal, priority)
        })
        .await?;
        info!(pr = %signal.pull_request.number, priority, "added to merge queue");
        Ok(Disposition::Handled)
    }

    fn on_create_or_delete(&mut self, signal: &CreateOrDeleteSignal) -> Result<Disposition> {
        match signal.action {
            RefAction::Created => {
                self.record(StateEventPayload::BranchCreated { at: Utc::now() })?;
                Ok(Disposition::Handled)
            }
            RefAction::Deleted if self.is_trunk() => {
                warn!("delete signal for the default branch ignored");
                Ok(Disposition::Ignored)
            }
            RefAction::Deleted => {
                self.record(StateEventPayload::BranchDeleted { at: Utc::now() })?;
                self.stale.stop();
                if let Some(store) = self.store.take() {
                    store.destroy()?;
                }
                info!("branch deleted, actor done");
                Ok(Disposition::Handled)
            }
        }
    }

    /// Emits the next stale warning and schedules the one after.
    ///
    /// A warning that could not be delivered still counts, so a failing
    /// notifier cannot make the actor fire in a tight loop.
    #[instrument(skip_all, fields(actor = %self.id))]
    pub async fn on_stale_timer(&mut self) -> Result<()> {
        let ActorState::Branch(state) = &self.snapshot.state else {
            self.stale.stop();
            return Ok(());
        };
        if self.snapshot.is_done() {
            self.stale.stop();
            return Ok(());
        }

        let warning = state.stale.warnings + 1;
        let interval_secs = self.stale.interval().as_secs();
        let idle_secs = u64::try_from((Utc::now() - state.stale.anchor).num_seconds())
            .unwrap_or_default()
            .max(interval_secs.saturating_mul(u64::from(warning)));
        let info = StaleInfo {
            last_activity: state.stale.anchor,
            idle_secs,
            warning,
            last_commit: state.last_commit.clone(),
            pull_request: state.pull_request.clone(),
        };
        let event = self.event(None, state.author.clone(), EventKind::StaleBranch(info));

        if let Err(e) = self.emit(&event).await {
            warn!(error = %e, warning, "stale warning not delivered");
        }
        self.record(StateEventPayload::StaleWarned { at: Utc::now() })?;
        self.stale.advance();
        self.persist_progress()
    }

    // ─── Helpers ───

    fn record(&mut self, payload: StateEventPayload) -> Result<()> {
        let store = self.store.as_mut().ok_or(ActorError::Retired)?;
        store.record(&mut self.snapshot, payload)?;
        Ok(())
    }

    /// Flushes the log and checkpoints when it has grown large enough.
    fn persist_progress(&mut self) -> Result<()> {
        if let Some(store) = self.store.as_mut() {
            store.sync()?;
            if store.checkpoint_if_due(&mut self.snapshot)? {
                debug!(generation = self.snapshot.log_generation, "checkpointed");
            }
        }
        Ok(())
    }

    /// Checkpoints now, regardless of log size.
    pub fn checkpoint(&mut self) -> Result<()> {
        let store = self.store.as_mut().ok_or(ActorError::Retired)?;
        store.checkpoint(&mut self.snapshot)?;
        Ok(())
    }

    fn author(&self) -> Option<User> {
        match &self.snapshot.state {
            ActorState::Branch(state) => state.author.clone(),
            ActorState::Trunk(_) => None,
        }
    }

    /// Looks up `login`, treating any failure as "unknown".
    async fn resolve_user(&self, login: &str) -> Option<User> {
        let services = &*self.services;
        let lookup = retry_with_backoff(self.ctx.retry, move || {
            services.resolve_user_by_login(login)
        })
        .await;
        match lookup {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, login, "user lookup failed, continuing without attribution");
                None
            }
        }
    }

    fn event(&self, signal: Option<&SignalId>, user: Option<User>, kind: EventKind) -> EventRecord {
        EventRecord::new(
            self.id.clone(),
            self.ctx.repo.id(),
            self.branch(),
            signal.cloned(),
            user,
            kind,
        )
    }

    /// Persists `event`, then sends the matching notification.
    async fn emit(&self, event: &EventRecord) -> std::result::Result<(), ServiceError> {
        let services = &*self.services;
        let repo = &*self.ctx.repo;
        let retry = self.ctx.retry;

        retry_with_backoff(retry, move || services.persist(event)).await?;
        match &event.kind {
            EventKind::LinesExceeded(change) => {
                retry_with_backoff(retry, move || {
                    services.notify_lines_exceeded(repo, event, change)
                })
                .await?
            }
            EventKind::StaleBranch(info) => {
                retry_with_backoff(retry, move || services.notify_stale_branch(repo, event, info))
                    .await?
            }
            EventKind::MergeConflict(conflict) => {
                retry_with_backoff(retry, move || {
                    services.notify_merge_conflict(repo, event, conflict)
                })
                .await?
            }
        }
        info!(event = event.kind.name(), id = %event.id, "notified");
        Ok(())
    }

    // ─── Event loop ───

    /// Runs until shutdown, mailbox closure, or the branch is deleted.
    #[instrument(skip_all, fields(actor = %self.id))]
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<BranchMessage>,
        shutdown: CancellationToken,
    ) {
        debug!("actor started");
        while !self.is_done() {
            let stale = self.stale.sleep();
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                msg = rx.recv() => match msg {
                    Some(BranchMessage::Signal(signal)) => {
                        if let Err(e) = self.handle(signal).await {
                            error!(error = %e, "failed to handle signal");
                        }
                    }
                    Some(BranchMessage::Shutdown) | None => break,
                },

                _ = stale => {
                    if let Err(e) = self.on_stale_timer().await {
                        error!(error = %e, "stale check failed");
                    }
                }
            }
        }

        if let Some(store) = self.store.as_mut()
            && let Err(e) = store.checkpoint(&mut self.snapshot)
        {
            error!(error = %e, "failed to checkpoint on exit");
        }
        debug!(done = self.is_done(), "actor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoConfig;
    use crate::persistence::StoreOptions;
    use crate::services::RetryConfig;
    use crate::test_utils::{RecordingServices, diff_with, label_signal, pr_signal, push};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        ctx: Arc<RepoContext>,
        services: Arc<RecordingServices>,
        repository: mpsc::UnboundedReceiver<RepositoryMessage>,
        tx: mpsc::UnboundedSender<RepositoryMessage>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(RepoContext {
            repo: Arc::new(RepoConfig::new("acme", "widgets")),
            state_dir: dir.path().join("state"),
            workspace_root: dir.path().join("workspaces"),
            retry: RetryConfig::NONE,
            store: StoreOptions::default(),
        });
        let (tx, repository) = mpsc::unbounded_channel();
        Harness {
            _dir: dir,
            ctx,
            services: Arc::new(RecordingServices::new()),
            repository,
            tx,
        }
    }

    impl Harness {
        fn open(&self, role: Role) -> BranchActor<RecordingServices> {
            BranchActor::open(self.ctx.clone(), self.services.clone(), role, self.tx.clone())
                .unwrap()
        }
    }

    #[tokio::test]
    async fn fresh_branch_starts_stale_monitor() {
        let h = harness();
        let actor = h.open(Role::Branch("feature".into()));
        assert!(actor.stale_monitor().is_running());
        assert_eq!(actor.id().as_str(), "acme/widgets.branch.feature");

        let trunk = h.open(Role::Trunk);
        assert!(!trunk.stale_monitor().is_running());
    }

    #[tokio::test]
    async fn push_records_latest_commit() {
        let h = harness();
        let mut actor = h.open(Role::Branch("feature".into()));

        let d = actor.handle(push("d-1", "feature", "c1")).await.unwrap();

        assert_eq!(d, Disposition::Handled);
        assert_eq!(actor.snapshot().state.last_commit().unwrap().sha.as_str(), "c1");
        assert!(h.services.notified().is_empty());
    }

    #[tokio::test]
    async fn collaborator_failure_abandons_without_marking_seen() {
        let h = harness();
        h.services.set_diff(diff_with(1000, 0));
        h.services
            .fail("detect_changes", ServiceError::permanent("detect_changes", "404"));
        let mut actor = h.open(Role::Branch("feature".into()));

        let d = actor.handle(push("d-1", "feature", "c1")).await.unwrap();
        assert_eq!(d, Disposition::Abandoned);
        assert!(!actor.snapshot().has_seen(&SignalId::new("d-1")));

        let d = actor.handle(push("d-1", "feature", "c1")).await.unwrap();
        assert_eq!(d, Disposition::Handled);
        assert_eq!(h.services.notified_kinds(), vec!["lines_exceeded"]);
    }

    #[tokio::test]
    async fn pull_request_closed_without_open_pr_is_ignored() {
        let h = harness();
        let mut actor = h.open(Role::Branch("feature".into()));
        let d = actor
            .handle(pr_signal("p-1", PullRequestAction::Closed, 4, "feature"))
            .await
            .unwrap();
        assert_eq!(d, Disposition::Ignored);
    }

    #[tokio::test]
    async fn label_removal_is_ignored() {
        let h = harness();
        let mut actor = h.open(Role::Branch("feature".into()));
        let mut signal = label_signal("l-1", "merge", 4, "feature");
        if let SignalPayload::Label(label) = &mut signal.payload {
            label.action = LabelAction::Unlabeled;
        }
        assert_eq!(actor.handle(signal).await.unwrap(), Disposition::Ignored);
        assert!(h.services.enqueued().is_empty());
    }

    #[tokio::test]
    async fn trunk_ignores_branch_only_signals() {
        let mut h = harness();
        let mut trunk = h.open(Role::Trunk);
        let d = trunk
            .handle(pr_signal("p-1", PullRequestAction::Opened, 4, "main"))
            .await
            .unwrap();
        assert_eq!(d, Disposition::Ignored);
        assert!(h.repository.try_recv().is_err());
    }
}

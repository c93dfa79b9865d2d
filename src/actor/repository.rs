//! Per-repository router.
//!
//! The [`RepositoryActor`] keeps the set of live branches and one running
//! [`BranchActor`] per branch it has seen, plus the trunk actor. Signals are
//! routed by branch name; an actor is spawned on the first signal for its
//! branch.
//!
//! At most one actor runs per branch: a deleted branch's actor is moved to
//! `retiring` and joined before a new actor for the same name is spawned.
//!
//! Only pushes, branch creation and rebase requests bring an actor into
//! existence. Pull-request and label signals go to an actor that is already
//! there; for a branch with neither a live actor nor state on disk they are
//! dropped. GitHub delivers `pull_request closed` and the branch delete of an
//! auto-deleted head in either order, so deleted branches are remembered in
//! `retired` until a later push or create revives them.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::branch::{BranchActor, Role};
use super::message::{BranchMessage, RepositoryMessage};
use super::{RepoContext, Result, actor_dir, actors_root};
use crate::persistence::read_snapshot;
use crate::services::Services;
use crate::types::{ActorId, RefAction, RefType, Signal, SignalPayload};

/// Deleted branch names remembered for late signals.
const RETIRED_CAPACITY: usize = 256;

enum Route {
    /// Deliver, spawning the actor if needed.
    Spawn(String),
    /// Deliver only to an actor that exists or has state on disk.
    Existing(String),
    Retire(String),
    Drop,
}

struct ActorHandle {
    tx: mpsc::UnboundedSender<BranchMessage>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct RepositoryActor<S> {
    ctx: Arc<RepoContext>,
    services: Arc<S>,
    /// Branches known to exist, from create signals or recovered state.
    tracked: BTreeSet<String>,
    branches: HashMap<String, ActorHandle>,
    trunk: Option<ActorHandle>,
    /// Actors of deleted branches that may still be finishing a handler.
    retiring: HashMap<String, JoinHandle<()>>,
    /// Recently deleted branches, oldest first.
    retired: VecDeque<String>,
    /// Handed to branch actors so the trunk can request rebases.
    self_tx: mpsc::UnboundedSender<RepositoryMessage>,
    shutdown: CancellationToken,
}

impl<S: Services> RepositoryActor<S> {
    pub fn new(
        ctx: Arc<RepoContext>,
        services: Arc<S>,
        self_tx: mpsc::UnboundedSender<RepositoryMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        RepositoryActor {
            ctx,
            services,
            tracked: BTreeSet::new(),
            branches: HashMap::new(),
            trunk: None,
            retiring: HashMap::new(),
            retired: VecDeque::new(),
            self_tx,
            shutdown,
        }
    }

    pub fn tracked(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    /// Starts the trunk actor and every branch actor with state on disk.
    #[instrument(skip_all, fields(repo = %self.ctx.repo.id()))]
    pub fn start(&mut self) -> Result<()> {
        let trunk = self.open(Role::Trunk)?;
        self.trunk = Some(self.spawn(trunk));

        let root = actors_root(&self.ctx.state_dir);
        let entries = match std::fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(crate::persistence::StoreError::Io(e).into()),
        };

        let repo_id = self.ctx.repo.id();
        for entry in entries {
            let entry = entry.map_err(crate::persistence::StoreError::Io)?;
            // Long directory names are hashed, so the snapshot holds the identity.
            let snapshot = match read_snapshot(&entry.path()) {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "skipping unreadable actor state"
                    );
                    continue;
                }
            };
            let Some(branch) = snapshot.actor.branch_name(&repo_id).map(str::to_string) else {
                continue;
            };

            let actor = self.open(Role::Branch(branch.clone()))?;
            if actor.is_done() {
                debug!(branch = %branch, "removing state of deleted branch");
                actor.discard()?;
                continue;
            }
            let handle = self.spawn(actor);
            self.tracked.insert(branch.clone());
            self.branches.insert(branch, handle);
        }
        info!(branches = self.branches.len(), "repository actor started");
        Ok(())
    }

    fn open(&self, role: Role) -> Result<BranchActor<S>> {
        BranchActor::open(
            self.ctx.clone(),
            self.services.clone(),
            role,
            self.self_tx.clone(),
        )
    }

    fn spawn(&self, actor: BranchActor<S>) -> ActorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(actor.run(rx, cancel.clone()));
        ActorHandle { tx, task, cancel }
    }

    // ─── Routing ───

    /// Routes one signal to the actor that owns it.
    #[instrument(
        skip_all,
        fields(repo = %self.ctx.repo.id(), signal = %signal.id, kind = signal.kind())
    )]
    pub async fn route(&mut self, signal: Signal) -> Result<()> {
        self.retiring.retain(|_, task| !task.is_finished());

        let route = match &signal.payload {
            SignalPayload::Push(push) => {
                if push.is_tag() {
                    debug!(git_ref = %push.git_ref, "ignoring tag push");
                    Route::Drop
                } else {
                    match push.branch() {
                        Some(branch) => {
                            self.unretire(branch);
                            Route::Spawn(branch.to_string())
                        }
                        None => {
                            warn!(git_ref = %push.git_ref, "dropping push to unroutable ref");
                            Route::Drop
                        }
                    }
                }
            }
            SignalPayload::Rebase(rebase) if rebase.branch == self.ctx.repo.default_branch => {
                debug!("ignoring rebase of the default branch");
                Route::Drop
            }
            SignalPayload::Rebase(rebase) if self.is_retired(&rebase.branch) => {
                debug!(branch = %rebase.branch, "ignoring rebase of a deleted branch");
                Route::Drop
            }
            SignalPayload::Rebase(rebase) => Route::Spawn(rebase.branch.clone()),
            SignalPayload::PullRequest(pr) => Route::Existing(pr.pull_request.head.clone()),
            SignalPayload::Label(label) => Route::Existing(label.pull_request.head.clone()),
            SignalPayload::CreateOrDelete(change) => match change.ref_type {
                RefType::Tag => {
                    debug!(git_ref = %change.git_ref, "ignoring tag create/delete");
                    Route::Drop
                }
                RefType::Other => {
                    warn!(git_ref = %change.git_ref, "dropping create/delete of unknown ref type");
                    Route::Drop
                }
                RefType::Branch
                    if change.action == RefAction::Deleted
                        && change.git_ref != self.ctx.repo.default_branch =>
                {
                    Route::Retire(change.git_ref.clone())
                }
                RefType::Branch => {
                    self.unretire(&change.git_ref);
                    Route::Spawn(change.git_ref.clone())
                }
            },
        };

        match route {
            Route::Spawn(branch) => self.deliver(&branch, signal, true).await,
            Route::Existing(branch) => {
                if self.is_retired(&branch) {
                    debug!(branch, "dropping signal for a deleted branch");
                    return Ok(());
                }
                self.deliver(&branch, signal, false).await
            }
            Route::Retire(branch) => {
                self.retire(&branch, signal);
                Ok(())
            }
            Route::Drop => Ok(()),
        }
    }

    async fn deliver(&mut self, branch: &str, signal: Signal, may_spawn: bool) -> Result<()> {
        if branch.is_empty() {
            warn!("dropping signal without a branch");
            return Ok(());
        }
        if branch == self.ctx.repo.default_branch {
            if let Some(trunk) = &self.trunk
                && trunk.tx.send(BranchMessage::Signal(signal)).is_err()
            {
                error!("trunk actor has stopped");
            }
            return Ok(());
        }
        if !may_spawn && !self.branches.contains_key(branch) && !self.has_state(branch) {
            debug!(branch, "dropping signal for a branch without an actor");
            return Ok(());
        }

        let mut message = BranchMessage::Signal(signal);
        for _ in 0..2 {
            let Some(handle) = self.get_or_spawn(branch, may_spawn).await? else {
                debug!(branch, "branch was deleted, dropping signal");
                return Ok(());
            };
            match handle.tx.send(message) {
                Ok(()) => {
                    debug!(branch, "routed");
                    return Ok(());
                }
                Err(mpsc::error::SendError(returned)) => {
                    // The actor exited (deleted, or its task died); replace it.
                    message = returned;
                    if let Some(stale) = self.branches.remove(branch) {
                        self.retiring.insert(branch.to_string(), stale.task);
                    }
                    if !may_spawn {
                        debug!(branch, "branch actor stopped, dropping signal");
                        return Ok(());
                    }
                }
            }
        }
        error!(branch, "could not deliver signal to branch actor");
        Ok(())
    }

    /// Returns the branch's running actor, starting one from disk if needed.
    ///
    /// State left by a deleted branch is discarded; a fresh actor replaces it
    /// only when `may_spawn` is set.
    async fn get_or_spawn(
        &mut self,
        branch: &str,
        may_spawn: bool,
    ) -> Result<Option<&ActorHandle>> {
        if !self.branches.contains_key(branch) {
            if let Some(task) = self.retiring.remove(branch)
                && let Err(e) = task.await
            {
                error!(branch, error = %e, "retired actor task failed");
            }

            let mut actor = self.open(Role::Branch(branch.to_string()))?;
            if actor.is_done() {
                actor.discard()?;
                if !may_spawn {
                    return Ok(None);
                }
                actor = self.open(Role::Branch(branch.to_string()))?;
            }
            debug!(branch, "spawned branch actor");
            let handle = self.spawn(actor);
            self.branches.insert(branch.to_string(), handle);
            self.tracked.insert(branch.to_string());
        }
        Ok(self.branches.get(branch))
    }

    fn has_state(&self, branch: &str) -> bool {
        let id = ActorId::branch(&self.ctx.repo.id(), branch);
        actor_dir(&self.ctx.state_dir, &id).is_dir()
    }

    fn is_retired(&self, branch: &str) -> bool {
        self.retired.iter().any(|b| b == branch)
    }

    fn unretire(&mut self, branch: &str) {
        self.retired.retain(|b| b != branch);
    }

    /// Forwards a delete to the branch's actor and stops tracking it.
    fn retire(&mut self, branch: &str, signal: Signal) {
        self.tracked.remove(branch);
        if !self.is_retired(branch) {
            if self.retired.len() == RETIRED_CAPACITY {
                self.retired.pop_front();
            }
            self.retired.push_back(branch.to_string());
        }
        match self.branches.remove(branch) {
            Some(handle) => {
                if handle.tx.send(BranchMessage::Signal(signal)).is_err() {
                    debug!(branch, "branch actor already stopped");
                }
                self.retiring.insert(branch.to_string(), handle.task);
                info!(branch, "branch retired");
            }
            None => debug!(branch, "delete for a branch without an actor"),
        }
    }

    // ─── Event loop ───

    #[instrument(skip_all, fields(repo = %self.ctx.repo.id()))]
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RepositoryMessage>) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                msg = rx.recv() => match msg {
                    Some(RepositoryMessage::Signal(signal)) => {
                        if let Err(e) = self.route(signal).await {
                            error!(error = %e, "failed to route signal");
                        }
                    }
                    Some(RepositoryMessage::Shutdown) | None => break,
                },
            }
        }
        self.stop_all().await;
    }

    /// Stops every actor between handlers and waits for them.
    pub async fn stop_all(&mut self) {
        let handles = self
            .branches
            .drain()
            .map(|(_, h)| h)
            .chain(self.trunk.take());
        let mut tasks = Vec::new();
        for handle in handles {
            handle.cancel.cancel();
            tasks.push(handle.task);
        }
        tasks.extend(self.retiring.drain().map(|(_, task)| task));

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "actor task failed");
            }
        }
        info!("repository actor stopped");
    }
}

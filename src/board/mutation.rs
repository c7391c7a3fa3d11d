//! Optimistic mutation lifecycle: snapshot, speculate, call remote, reconcile.
//!
//! The coordinator owns the task cache and the board order and is the only
//! component that writes both in one logical operation. Every protocol is
//! split in two synchronous halves around the remote call:
//!
//! - `begin_*` checks preconditions, records a row-level snapshot of the one
//!   identifier it touches, applies the speculative change to both stores and
//!   returns a context;
//! - `settle_*` consumes that context with the remote result and either
//!   commits the server's row or restores the snapshot in both stores.
//!
//! At most one mutation per identifier is in flight. Reads issued before a
//! speculative change are superseded and their results discarded.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::cache::TaskCache;
use super::gateway::{GatewayError, Removal};
use super::order::{OrderError, OrderState};
use super::{is_temporary, validate_title, Status, Task, TaskId, TaskPatch, TitleError};

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("task {0} not found")]
    UnknownTask(TaskId),
    #[error("task {0} already has a change in flight")]
    Busy(TaskId),
    #[error("nothing to change on task {0}")]
    NothingToChange(TaskId),
    #[error("server did not delete task {0}")]
    NotRemoved(TaskId),
    #[error(transparent)]
    InvalidTitle(#[from] TitleError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Remote(#[from] GatewayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Pending flag for an identifier with a mutation in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub kind: MutationKind,
    pub since: DateTime<Utc>,
}

/// The most recent mutation that failed and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: MutationKind,
    pub id: TaskId,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Prior state of the single identifier a mutation touches.
#[derive(Debug, Clone)]
struct RowSnapshot {
    row: Option<(usize, Task)>,
    placement: Option<(Status, usize)>,
}

#[derive(Debug)]
struct MutationContext {
    id: TaskId,
    kind: MutationKind,
    snapshot: RowSnapshot,
}

/// An in-flight create. Settle with [`MutationCoordinator::settle_create`].
#[derive(Debug)]
#[must_use = "an unsettled create leaves its task pending forever"]
pub struct CreateContext {
    ctx: MutationContext,
    title: String,
    status: Status,
}

impl CreateContext {
    pub fn temp_id(&self) -> TaskId {
        self.ctx.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

/// An in-flight update. Settle with [`MutationCoordinator::settle_update`].
#[derive(Debug)]
#[must_use = "an unsettled update leaves its task pending forever"]
pub struct UpdateContext {
    ctx: MutationContext,
    patch: TaskPatch,
}

impl UpdateContext {
    pub fn id(&self) -> TaskId {
        self.ctx.id
    }

    pub fn patch(&self) -> &TaskPatch {
        &self.patch
    }
}

/// An in-flight delete. Settle with [`MutationCoordinator::settle_delete`].
#[derive(Debug)]
#[must_use = "an unsettled delete leaves its task pending forever"]
pub struct DeleteContext {
    ctx: MutationContext,
}

impl DeleteContext {
    pub fn id(&self) -> TaskId {
        self.ctx.id
    }
}

/// Generation a list request was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// First load: columns rebuilt from the list.
    Seeded,
    /// Later load: columns aligned with the list, drag order kept.
    Reconciled,
    /// A mutation began or settled after the request was issued, or one is
    /// still in flight. The result was dropped.
    Superseded,
}

#[derive(Debug)]
pub struct MutationCoordinator {
    cache: TaskCache,
    order: OrderState,
    owner_ref: i64,
    next_temp_id: TaskId,
    pending: BTreeMap<TaskId, PendingMutation>,
    fetch_generation: u64,
    applied_generation: Option<u64>,
    seeded: bool,
    stale: bool,
    last_failure: Option<Failure>,
}

impl MutationCoordinator {
    /// An empty board. `owner_ref` is stamped on speculative rows.
    pub fn new(owner_ref: i64) -> Self {
        Self {
            cache: TaskCache::new(),
            order: OrderState::new(),
            owner_ref,
            next_temp_id: -1,
            pending: BTreeMap::new(),
            fetch_generation: 0,
            applied_generation: None,
            seeded: false,
            stale: false,
            last_failure: None,
        }
    }

    pub fn cache(&self) -> &TaskCache {
        &self.cache
    }

    pub fn order(&self) -> &OrderState {
        &self.order
    }

    /// Order-only intents (filter, search, gates, same-column reorders).
    pub fn order_mut(&mut self) -> &mut OrderState {
        &mut self.order
    }

    pub fn pending(&self, id: TaskId) -> Option<&PendingMutation> {
        self.pending.get(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_busy(&self, id: TaskId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    pub fn clear_failure(&mut self) {
        self.last_failure = None;
    }

    /// Whether a re-fetch should be issued now: the board is stale and no
    /// mutation is left in flight to supersede it.
    pub fn refresh_due(&self) -> bool {
        self.stale && self.pending.is_empty()
    }

    /// Every cached identifier sits exactly once in the column matching its
    /// status, and the columns hold nothing that is not cached.
    pub fn is_consistent(&self) -> bool {
        let order = self.order.order();
        order.len() == self.cache.len()
            && self.cache.iter().all(|t| {
                let status = t.status();
                order.column(status).iter().filter(|&&x| x == t.id).count() == 1
                    && !order.column(status.toggled()).contains(&t.id)
            })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket(self.fetch_generation)
    }

    /// Apply a list result unless it has been superseded.
    pub fn finish_fetch(&mut self, ticket: FetchTicket, tasks: Vec<Task>) -> FetchOutcome {
        if ticket.0 != self.fetch_generation || !self.pending.is_empty() {
            debug!(
                issued = ticket.0,
                current = self.fetch_generation,
                in_flight = self.pending.len(),
                "dropping superseded list result"
            );
            // No re-fetch needed once a list issued at this generation has landed.
            if !self.pending.is_empty() || self.applied_generation != Some(self.fetch_generation) {
                self.stale = true;
            }
            return FetchOutcome::Superseded;
        }

        let tasks = dedupe_by_id(tasks);
        self.stale = false;
        self.applied_generation = Some(ticket.0);
        let outcome = if self.seeded {
            self.order.order_mut().reconcile(&tasks);
            FetchOutcome::Reconciled
        } else {
            self.order.order_mut().seed(&tasks);
            self.seeded = true;
            FetchOutcome::Seeded
        };
        info!(tasks = tasks.len(), ?outcome, "applied task list");
        self.cache.replace_all(tasks);
        outcome
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    pub fn begin_create(&mut self, title: &str, status: Status) -> Result<CreateContext, MutationError> {
        let title = validate_title(title)?;
        let temp_id = self.mint_temp_id();
        let snapshot = self.snapshot(temp_id);

        self.supersede_reads();
        self.cache.insert_at(
            0,
            Task {
                id: temp_id,
                todo: title.clone(),
                completed: status.is_done(),
                user_id: self.owner_ref,
            },
        );
        self.order.order_mut().insert_new_at(temp_id, status, 0);
        self.track(temp_id, MutationKind::Create);
        info!(temp_id, %status, "speculative create");

        Ok(CreateContext {
            ctx: MutationContext {
                id: temp_id,
                kind: MutationKind::Create,
                snapshot,
            },
            title,
            status,
        })
    }

    /// Commit the confirmed row under its real identifier, or roll back.
    pub fn settle_create(
        &mut self,
        pending: CreateContext,
        result: Result<Task, GatewayError>,
    ) -> Result<TaskId, MutationError> {
        let temp_id = pending.ctx.id;
        debug_assert!(is_temporary(temp_id));
        self.untrack(temp_id);

        match result {
            Ok(task) => {
                let real_id = task.id;
                let status = task.status();
                self.cache.replace_row(temp_id, task);
                let order = self.order.order_mut();
                order.replace_identifier(temp_id, real_id);
                match order.find(real_id) {
                    Some((column, _)) if column != status => {
                        order.move_to(real_id, status);
                    }
                    Some(_) => {}
                    None => order.insert_new_at(real_id, status, 0),
                }
                info!(temp_id, real_id, "create confirmed");
                Ok(real_id)
            }
            Err(e) => {
                self.fail(pending.ctx, &e);
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Merge `patch` into the cached row. A status change also moves the task
    /// to the head of its new column.
    pub fn begin_update(&mut self, id: TaskId, patch: TaskPatch) -> Result<UpdateContext, MutationError> {
        if patch.is_empty() {
            return Err(MutationError::NothingToChange(id));
        }
        let patch = match patch.title {
            Some(title) => TaskPatch {
                title: Some(validate_title(&title)?),
                status: patch.status,
            },
            None => patch,
        };
        if !self.cache.contains(id) {
            return Err(MutationError::UnknownTask(id));
        }
        self.ensure_idle(id)?;
        let snapshot = self.snapshot(id);

        self.supersede_reads();
        self.cache.update_where(id, |t| patch.apply(t));
        if let Some(status) = patch.status {
            self.order.order_mut().move_to(id, status);
        }
        self.track(id, MutationKind::Update);
        info!(id, ?patch, "speculative update");

        Ok(UpdateContext {
            ctx: MutationContext {
                id,
                kind: MutationKind::Update,
                snapshot,
            },
            patch,
        })
    }

    /// Drop a task at `to_index` of `to`, indices taken from current order.
    ///
    /// Same-column drops are a pure local reorder and return `None`; a
    /// cross-column drop also changes the status and returns the update to
    /// send.
    pub fn begin_move(
        &mut self,
        id: TaskId,
        to: Status,
        to_index: usize,
    ) -> Result<Option<UpdateContext>, MutationError> {
        let (from, from_index) = self
            .order
            .order()
            .find(id)
            .ok_or(MutationError::UnknownTask(id))?;

        if from == to {
            self.order
                .order_mut()
                .move_within_or_across(id, from, to, from_index, to_index)?;
            debug!(id, %to, to_index, "local reorder");
            return Ok(None);
        }

        if !self.cache.contains(id) {
            return Err(MutationError::UnknownTask(id));
        }
        self.ensure_idle(id)?;
        let snapshot = self.snapshot(id);
        self.order
            .order_mut()
            .move_within_or_across(id, from, to, from_index, to_index)?;

        self.supersede_reads();
        let patch = TaskPatch::status(to);
        self.cache.update_where(id, |t| patch.apply(t));
        self.track(id, MutationKind::Update);
        info!(id, %from, %to, to_index, "speculative move");

        Ok(Some(UpdateContext {
            ctx: MutationContext {
                id,
                kind: MutationKind::Update,
                snapshot,
            },
            patch,
        }))
    }

    pub fn settle_update(
        &mut self,
        pending: UpdateContext,
        result: Result<Task, GatewayError>,
    ) -> Result<(), MutationError> {
        let id = pending.ctx.id;
        self.untrack(id);
        self.stale = true;

        match result {
            Ok(task) if task.id == id => {
                let status = task.status();
                self.cache.upsert(task);
                if self.order.order().find(id).is_some_and(|(col, _)| col != status) {
                    self.order.order_mut().move_to(id, status);
                }
                info!(id, "update confirmed");
                Ok(())
            }
            Ok(task) => {
                warn!(id, returned = task.id, "update answered for another task; keeping local row");
                Ok(())
            }
            Err(e) => {
                self.fail(pending.ctx, &e);
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    pub fn begin_delete(&mut self, id: TaskId) -> Result<DeleteContext, MutationError> {
        if !self.cache.contains(id) && !self.order.order().contains(id) {
            return Err(MutationError::UnknownTask(id));
        }
        self.ensure_idle(id)?;
        let snapshot = self.snapshot(id);

        self.supersede_reads();
        self.order.order_mut().remove_everywhere(id);
        self.cache.remove_where(id);
        if self.order.confirm_delete_id() == Some(id) {
            self.order.close_delete_confirm();
        }
        self.track(id, MutationKind::Delete);
        info!(id, "speculative delete");

        Ok(DeleteContext {
            ctx: MutationContext {
                id,
                kind: MutationKind::Delete,
                snapshot,
            },
        })
    }

    pub fn settle_delete(
        &mut self,
        pending: DeleteContext,
        result: Result<Removal, GatewayError>,
    ) -> Result<(), MutationError> {
        let id = pending.ctx.id;
        self.untrack(id);
        self.stale = true;

        match result {
            Ok(removal) if removal.removed => {
                info!(id, confirmed = removal.id, "delete confirmed");
                Ok(())
            }
            Ok(_) => {
                let err = MutationError::NotRemoved(id);
                self.fail(pending.ctx, &err);
                Err(err)
            }
            Err(e) => {
                self.fail(pending.ctx, &e);
                Err(e.into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn mint_temp_id(&mut self) -> TaskId {
        let id = self.next_temp_id;
        self.next_temp_id -= 1;
        id
    }

    fn supersede_reads(&mut self) {
        self.fetch_generation += 1;
    }

    fn ensure_idle(&self, id: TaskId) -> Result<(), MutationError> {
        if self.is_busy(id) {
            debug!(id, "rejecting mutation on busy task");
            return Err(MutationError::Busy(id));
        }
        Ok(())
    }

    fn track(&mut self, id: TaskId, kind: MutationKind) {
        self.pending.insert(
            id,
            PendingMutation {
                kind,
                since: Utc::now(),
            },
        );
    }

    /// Settling changes server state too, so reads issued while the
    /// mutation was in flight are superseded as well.
    fn untrack(&mut self, id: TaskId) {
        self.pending.remove(&id);
        self.supersede_reads();
    }

    fn snapshot(&self, id: TaskId) -> RowSnapshot {
        RowSnapshot {
            row: self
                .cache
                .position(id)
                .and_then(|idx| self.cache.get(id).map(|t| (idx, t.clone()))),
            placement: self.order.order().find(id),
        }
    }

    /// Restore both stores for the context's identifier and record the failure.
    fn fail(&mut self, ctx: MutationContext, cause: &dyn std::fmt::Display) {
        let MutationContext { id, kind, snapshot } = ctx;

        self.cache.remove_where(id);
        if let Some((idx, task)) = snapshot.row {
            self.cache.insert_at(idx, task);
        }
        match snapshot.placement {
            Some((status, idx)) => self.order.order_mut().restore_placement(id, status, idx),
            None => {
                self.order.order_mut().remove_everywhere(id);
            }
        }

        warn!(id, %kind, %cause, "mutation failed; rolled back");
        self.last_failure = Some(Failure {
            kind,
            id,
            message: cause.to_string(),
            at: Utc::now(),
        });
    }
}

/// Keep the first row for each identifier the server listed.
fn dedupe_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::with_capacity(tasks.len());
    tasks
        .into_iter()
        .filter(|t| {
            let first = seen.insert(t.id);
            if !first {
                warn!(id = t.id, "list repeated an id; keeping the first row");
            }
            first
        })
        .collect()
}

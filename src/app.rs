use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::board::gateway::{GatewayError, RemoteGateway};
use crate::board::mutation::{
    Failure, FetchOutcome, MutationCoordinator, MutationError, PendingMutation, UpdateContext,
};
use crate::board::{Filter, LocalTask, Status, TaskId, TaskPatch, ViewFilter};

/// Where a dragged card was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// Empty area of a column: the card goes to its head.
    Column(Status),
    /// Another card: the dragged card takes that card's current index.
    Card(TaskId),
}

/// Result of ending a drag or a direct move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Dropped outside any target, or no drag was active.
    Cancelled,
    /// Same-column reorder. Nothing was sent.
    Reordered,
    /// Cross-column move, persisted with one status update.
    Moved,
}

/// A card as one column shows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardView {
    pub task: LocalTask,
    pub pending: Option<PendingMutation>,
}

/// Both columns after the filter and search have been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    pub todo: Vec<CardView>,
    pub done: Vec<CardView>,
}

impl Columns {
    pub fn column(&self, status: Status) -> &[CardView] {
        match status {
            Status::Todo => &self.todo,
            Status::Done => &self.done,
        }
    }

    #[cfg(test)]
    pub fn ids(&self, status: Status) -> Vec<TaskId> {
        self.column(status).iter().map(|c| c.task.id).collect()
    }

    pub fn len(&self) -> usize {
        self.todo.len() + self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session handle for one board.
///
/// Cheap to clone; clones share the same coordinator so mutations can be
/// spawned onto the runtime and settle in any order. The coordinator lock
/// is only taken for the synchronous halves of each protocol.
pub struct BoardController<G> {
    gateway: Arc<G>,
    core: Arc<Mutex<MutationCoordinator>>,
}

impl<G> Clone for BoardController<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            core: Arc::clone(&self.core),
        }
    }
}

impl<G: RemoteGateway> BoardController<G> {
    pub fn new(gateway: Arc<G>, coordinator: MutationCoordinator) -> Self {
        Self {
            gateway,
            core: Arc::new(Mutex::new(coordinator)),
        }
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut MutationCoordinator) -> R) -> R {
        let mut core = self.core.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut core)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch the full list. The first successful fetch seeds the columns.
    pub async fn refresh(&self) -> Result<FetchOutcome, GatewayError> {
        let ticket = self.with_core(|c| c.begin_fetch());
        let tasks = self.gateway.list().await?;
        Ok(self.with_core(|c| c.finish_fetch(ticket, tasks)))
    }

    async fn refresh_if_due(&self) {
        if !self.with_core(|c| c.refresh_due()) {
            return;
        }
        debug!("board stale and idle; refreshing");
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "background refresh failed");
        }
    }

    pub fn columns(&self) -> Columns {
        self.with_core(|c| {
            let view = c.order().view();
            let build = |status: Status| -> Vec<CardView> {
                c.order()
                    .order()
                    .column(status)
                    .iter()
                    .filter_map(|&id| c.cache().get(id))
                    .map(|t| t.to_local())
                    .filter(|t| view.matches(t))
                    .map(|task| CardView {
                        pending: c.pending(task.id).cloned(),
                        task,
                    })
                    .collect()
            };
            Columns {
                todo: build(Status::Todo),
                done: build(Status::Done),
            }
        })
    }

    pub fn task(&self, id: TaskId) -> Option<LocalTask> {
        self.with_core(|c| c.cache().get(id).map(|t| t.to_local()))
    }

    /// Unfiltered card count per column.
    pub fn counts(&self) -> (usize, usize) {
        self.with_core(|c| {
            let order = c.order().order();
            (order.column(Status::Todo).len(), order.column(Status::Done).len())
        })
    }

    pub fn pending_count(&self) -> usize {
        self.with_core(|c| c.pending_count())
    }

    pub fn last_failure(&self) -> Option<Failure> {
        self.with_core(|c| c.last_failure().cloned())
    }

    pub fn clear_failure(&self) {
        self.with_core(|c| c.clear_failure());
    }

    pub fn view(&self) -> ViewFilter {
        self.with_core(|c| c.order().view().clone())
    }

    pub fn set_filter(&self, filter: Filter) {
        self.with_core(|c| c.order_mut().set_filter(filter));
    }

    pub fn set_search(&self, search: &str) {
        self.with_core(|c| c.order_mut().set_search(search));
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Optimistic create. Returns the server-assigned identifier.
    pub async fn add(&self, title: &str, status: Status) -> Result<TaskId, MutationError> {
        let pending = self.with_core(|c| c.begin_create(title, status))?;
        debug!(temp_id = pending.temp_id(), "sending create");
        let result = self
            .gateway
            .create(pending.title(), pending.status().is_done())
            .await;
        let settled = self.with_core(|c| c.settle_create(pending, result));
        self.refresh_if_due().await;
        settled
    }

    pub async fn edit(&self, id: TaskId, title: &str) -> Result<(), MutationError> {
        self.update(id, TaskPatch::title(title)).await
    }

    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<(), MutationError> {
        let pending = self.with_core(|c| c.begin_update(id, patch))?;
        self.send_update(pending).await
    }

    /// Flip a task between the two columns. Returns the new status.
    pub async fn toggle(&self, id: TaskId) -> Result<Status, MutationError> {
        let (pending, status) = self.with_core(|c| {
            let status = c
                .cache()
                .get(id)
                .ok_or(MutationError::UnknownTask(id))?
                .status()
                .toggled();
            Ok::<_, MutationError>((c.begin_update(id, TaskPatch::status(status))?, status))
        })?;
        self.send_update(pending).await?;
        Ok(status)
    }

    /// Move a task to `index` of `to` (head when `None`), as a drop would.
    pub async fn move_to(
        &self,
        id: TaskId,
        to: Status,
        index: Option<usize>,
    ) -> Result<DropOutcome, MutationError> {
        match self.with_core(|c| c.begin_move(id, to, index.unwrap_or(0)))? {
            None => Ok(DropOutcome::Reordered),
            Some(pending) => {
                self.send_update(pending).await?;
                Ok(DropOutcome::Moved)
            }
        }
    }

    async fn send_update(&self, pending: UpdateContext) -> Result<(), MutationError> {
        let result = self.gateway.update(pending.id(), pending.patch()).await;
        let settled = self.with_core(|c| c.settle_update(pending, result));
        self.refresh_if_due().await;
        settled
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), MutationError> {
        let pending = self.with_core(|c| c.begin_delete(id))?;
        let result = self.gateway.remove(pending.id()).await;
        let settled = self.with_core(|c| c.settle_delete(pending, result));
        self.refresh_if_due().await;
        settled
    }

    // -----------------------------------------------------------------------
    // Delete gate
    // -----------------------------------------------------------------------

    pub fn request_delete(&self, id: TaskId) -> Result<(), MutationError> {
        self.with_core(|c| {
            if !c.cache().contains(id) {
                return Err(MutationError::UnknownTask(id));
            }
            c.order_mut().open_delete_confirm(id);
            Ok(())
        })
    }

    pub fn delete_requested(&self) -> Option<TaskId> {
        self.with_core(|c| c.order().confirm_delete_id())
    }

    /// Delete the gated task. `None` if the gate was closed.
    pub async fn confirm_delete(&self) -> Result<Option<TaskId>, MutationError> {
        let Some(id) = self.with_core(|c| c.order_mut().close_delete_confirm()) else {
            return Ok(None);
        };
        self.delete(id).await.map(|()| Some(id))
    }

    pub fn cancel_delete(&self) -> Option<TaskId> {
        self.with_core(|c| c.order_mut().close_delete_confirm())
    }

    // -----------------------------------------------------------------------
    // Drag
    // -----------------------------------------------------------------------

    pub fn drag_start(&self, id: TaskId) -> Result<(), MutationError> {
        self.with_core(|c| {
            if !c.order().order().contains(id) {
                return Err(MutationError::UnknownTask(id));
            }
            if let Some(previous) = c.order().active_drag() {
                debug!(previous, id, "replacing unfinished drag");
            }
            c.order_mut().start_drag(id);
            Ok(())
        })
    }

    #[cfg(test)]
    pub fn active_drag(&self) -> Option<TaskId> {
        self.with_core(|c| c.order().active_drag())
    }

    /// Pick up `id` and drop it on `target` in one step, so another drag
    /// cannot replace the active one in between.
    pub async fn drag_to(&self, id: TaskId, target: DropTarget) -> Result<DropOutcome, MutationError> {
        self.drag_start(id)?;
        self.drag_end(Some(target)).await
    }

    /// Resolve the active drag against `target`. Indices are taken from the
    /// board as it is now, not as it was when the drag started.
    pub async fn drag_end(&self, target: Option<DropTarget>) -> Result<DropOutcome, MutationError> {
        let pending = self.with_core(|c| {
            let Some(id) = c.order_mut().end_drag() else {
                return Ok(None);
            };
            let Some(target) = target else {
                debug!(id, "drag released outside any target");
                return Ok(None);
            };
            let (to, to_index) = match target {
                DropTarget::Column(status) => (status, 0),
                DropTarget::Card(over) => c
                    .order()
                    .order()
                    .find(over)
                    .ok_or(MutationError::UnknownTask(over))?,
            };
            c.begin_move(id, to, to_index).map(Some)
        })?;

        match pending {
            None => Ok(DropOutcome::Cancelled),
            Some(None) => Ok(DropOutcome::Reordered),
            Some(Some(pending)) => {
                info!(id = pending.id(), "drop crossed columns");
                self.send_update(pending).await?;
                Ok(DropOutcome::Moved)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};

    use async_trait::async_trait;
    use reqwest::StatusCode;
    use tokio::sync::Notify;

    use super::*;
    use crate::board::gateway::{Operation, Removal};
    use crate::board::{task, Task};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        List,
        Create(String, bool),
        Update(TaskId, TaskPatch),
        Remove(TaskId),
    }

    /// In-memory remote store. Calls can be made to fail or to wait until
    /// released, keyed as `list`, `create:<title>`, `update:<id>`, `remove:<id>`.
    #[derive(Default)]
    pub struct FakeGateway {
        tasks: Mutex<Vec<Task>>,
        next_id: Mutex<TaskId>,
        fixed_id: Mutex<Option<TaskId>>,
        calls: Mutex<Vec<Call>>,
        failing: Mutex<HashSet<String>>,
        holds: Mutex<HashMap<String, Arc<Notify>>>,
    }

    impl FakeGateway {
        pub fn with_tasks(tasks: Vec<Task>) -> Self {
            let next = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
            Self {
                tasks: Mutex::new(tasks),
                next_id: Mutex::new(next),
                ..Default::default()
            }
        }

        pub fn next_id(&self, id: TaskId) {
            *self.next_id.lock().unwrap() = id;
        }

        pub fn always_assign(&self, id: TaskId) {
            *self.fixed_id.lock().unwrap() = Some(id);
        }

        pub fn fail(&self, key: &str) {
            self.failing.lock().unwrap().insert(key.to_string());
        }

        /// Make the next call with `key` wait; notify the handle to release it.
        pub fn hold(&self, key: &str) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            self.holds.lock().unwrap().insert(key.to_string(), Arc::clone(&notify));
            notify
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn mutating_calls(&self) -> Vec<Call> {
            self.calls().into_iter().filter(|c| *c != Call::List).collect()
        }

        async fn gate(&self, key: &str, operation: Operation) -> Result<(), GatewayError> {
            let hold = self.holds.lock().unwrap().remove(key);
            if let Some(notify) = hold {
                notify.notified().await;
            }
            if self.failing.lock().unwrap().contains(key) {
                return Err(GatewayError::Status {
                    operation,
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteGateway for FakeGateway {
        async fn list(&self) -> Result<Vec<Task>, GatewayError> {
            self.calls.lock().unwrap().push(Call::List);
            let snapshot = self.tasks.lock().unwrap().clone();
            self.gate("list", Operation::List).await?;
            Ok(snapshot)
        }

        async fn create(&self, title: &str, done: bool) -> Result<Task, GatewayError> {
            self.calls.lock().unwrap().push(Call::Create(title.to_string(), done));
            self.gate(&format!("create:{title}"), Operation::Create).await?;
            let fixed = *self.fixed_id.lock().unwrap();
            let id = match fixed {
                Some(id) => id,
                None => {
                    let mut next = self.next_id.lock().unwrap();
                    *next += 1;
                    *next - 1
                }
            };
            let row = Task {
                id,
                todo: title.to_string(),
                completed: done,
                user_id: 1,
            };
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|t| t.id != id);
            tasks.push(row.clone());
            Ok(row)
        }

        async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, GatewayError> {
            self.calls.lock().unwrap().push(Call::Update(id, patch.clone()));
            let operation = Operation::Update(id);
            self.gate(&format!("update:{id}"), operation).await?;
            let mut tasks = self.tasks.lock().unwrap();
            let row = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(GatewayError::Status {
                    operation,
                    status: StatusCode::NOT_FOUND,
                })?;
            patch.apply(row);
            Ok(row.clone())
        }

        async fn remove(&self, id: TaskId) -> Result<Removal, GatewayError> {
            self.calls.lock().unwrap().push(Call::Remove(id));
            self.gate(&format!("remove:{id}"), Operation::Remove(id)).await?;
            self.tasks.lock().unwrap().retain(|t| t.id != id);
            Ok(Removal { removed: true, id })
        }
    }

    async fn loaded(tasks: Vec<Task>) -> (BoardController<FakeGateway>, Arc<FakeGateway>) {
        let gateway = Arc::new(FakeGateway::with_tasks(tasks));
        let ctl = BoardController::new(Arc::clone(&gateway), MutationCoordinator::new(1));
        assert_eq!(ctl.refresh().await.unwrap(), FetchOutcome::Seeded);
        (ctl, gateway)
    }

    /// Let spawned tasks run up to their next suspension point.
    async fn settle_spawned() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn consistent(ctl: &BoardController<FakeGateway>) -> bool {
        ctl.with_core(|c| c.is_consistent())
    }

    #[tokio::test]
    async fn load_seeds_columns_in_list_order() {
        let (ctl, _) = loaded(vec![
            task(1, "a", Status::Todo),
            task(2, "b", Status::Done),
            task(3, "c", Status::Todo),
        ])
        .await;
        let cols = ctl.columns();
        assert_eq!(cols.ids(Status::Todo), vec![1, 3]);
        assert_eq!(cols.ids(Status::Done), vec![2]);
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn create_from_empty_board_shows_speculative_card_then_real_id() {
        let (ctl, gateway) = loaded(vec![]).await;
        gateway.next_id(42);
        let release = gateway.hold("create:Buy milk");

        let spawned = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.add("Buy milk", Status::Todo).await }
        });
        settle_spawned().await;

        let cols = ctl.columns();
        assert_eq!(cols.todo.len(), 1);
        let card = &cols.todo[0];
        assert!(card.task.id < 0);
        assert_eq!(card.task.title, "Buy milk");
        assert_eq!(card.pending.as_ref().unwrap().kind, crate::board::mutation::MutationKind::Create);

        release.notify_one();
        assert_eq!(spawned.await.unwrap().unwrap(), 42);
        let cols = ctl.columns();
        assert_eq!(cols.ids(Status::Todo), vec![42]);
        assert!(cols.todo[0].pending.is_none());
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn create_failure_removes_card_and_restores_cache() {
        let (ctl, gateway) = loaded(vec![task(1, "a", Status::Todo)]).await;
        let before = ctl.with_core(|c| c.cache().clone());
        gateway.fail("create:Buy milk");

        let err = ctl.add("Buy milk", Status::Todo).await.unwrap_err();
        assert!(matches!(err, MutationError::Remote(_)));
        assert_eq!(ctl.columns().ids(Status::Todo), vec![1]);
        assert_eq!(ctl.with_core(|c| c.cache().clone()), before);
        assert_eq!(ctl.last_failure().unwrap().kind, crate::board::mutation::MutationKind::Create);
    }

    #[tokio::test]
    async fn create_sends_chosen_status() {
        let (ctl, gateway) = loaded(vec![]).await;
        let id = ctl.add("Ship it", Status::Done).await.unwrap();
        assert_eq!(gateway.calls().last(), Some(&Call::Create("Ship it".into(), true)));
        assert_eq!(ctl.columns().ids(Status::Done), vec![id]);
    }

    #[tokio::test]
    async fn reorder_within_column_makes_no_remote_call() {
        let (ctl, gateway) = loaded(vec![
            task(1, "a", Status::Todo),
            task(2, "b", Status::Todo),
            task(3, "c", Status::Todo),
        ])
        .await;
        ctl.drag_start(2).unwrap();
        let outcome = ctl.drag_end(Some(DropTarget::Card(1))).await.unwrap();
        assert_eq!(outcome, DropOutcome::Reordered);
        assert_eq!(ctl.columns().ids(Status::Todo), vec![2, 1, 3]);
        assert_eq!(gateway.calls(), vec![Call::List]);
        assert_eq!(ctl.active_drag(), None);
    }

    #[tokio::test]
    async fn cross_column_drop_issues_exactly_one_update() {
        let (ctl, gateway) = loaded(vec![
            task(1, "a", Status::Todo),
            task(2, "b", Status::Todo),
            task(3, "c", Status::Done),
        ])
        .await;
        ctl.drag_start(1).unwrap();
        let outcome = ctl.drag_end(Some(DropTarget::Column(Status::Done))).await.unwrap();
        assert_eq!(outcome, DropOutcome::Moved);

        let cols = ctl.columns();
        assert_eq!(cols.ids(Status::Todo), vec![2]);
        assert_eq!(cols.ids(Status::Done), vec![1, 3]);
        assert_eq!(
            gateway.mutating_calls(),
            vec![Call::Update(1, TaskPatch::status(Status::Done))]
        );
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn drop_onto_card_in_other_column_takes_its_index() {
        let (ctl, _) = loaded(vec![
            task(1, "a", Status::Todo),
            task(3, "c", Status::Done),
            task(4, "d", Status::Done),
        ])
        .await;
        ctl.drag_start(1).unwrap();
        ctl.drag_end(Some(DropTarget::Card(4))).await.unwrap();
        assert_eq!(ctl.columns().ids(Status::Done), vec![3, 1, 4]);
    }

    #[tokio::test]
    async fn overlapping_drags_each_move_their_own_card() {
        let (ctl, gateway) = loaded(vec![
            task(1, "a", Status::Todo),
            task(2, "b", Status::Todo),
            task(3, "c", Status::Done),
        ])
        .await;
        let first = ctl.drag_to(1, DropTarget::Column(Status::Done));
        let second = ctl.drag_to(2, DropTarget::Column(Status::Done));
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), DropOutcome::Moved);
        assert_eq!(second.unwrap(), DropOutcome::Moved);
        assert!(ctl.columns().ids(Status::Todo).is_empty());
        assert_eq!(ctl.columns().ids(Status::Done), vec![2, 1, 3]);
        assert_eq!(
            gateway.mutating_calls(),
            vec![
                Call::Update(1, TaskPatch::status(Status::Done)),
                Call::Update(2, TaskPatch::status(Status::Done)),
            ]
        );
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn drop_outside_is_a_noop() {
        let (ctl, gateway) = loaded(vec![task(1, "a", Status::Todo)]).await;
        ctl.drag_start(1).unwrap();
        assert_eq!(ctl.drag_end(None).await.unwrap(), DropOutcome::Cancelled);
        assert_eq!(ctl.active_drag(), None);
        assert_eq!(ctl.drag_end(Some(DropTarget::Column(Status::Done))).await.unwrap(), DropOutcome::Cancelled);
        assert!(gateway.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn drag_end_uses_current_positions() {
        let (ctl, _) = loaded(vec![
            task(1, "a", Status::Todo),
            task(2, "b", Status::Todo),
            task(3, "c", Status::Todo),
        ])
        .await;
        ctl.drag_start(3).unwrap();
        ctl.delete(1).await.unwrap();
        ctl.drag_end(Some(DropTarget::Card(2))).await.unwrap();
        assert_eq!(ctl.columns().ids(Status::Todo), vec![3, 2]);
    }

    #[tokio::test]
    async fn filter_and_search_hide_todo_milk() {
        let (ctl, _) = loaded(vec![
            task(1, "Buy milk", Status::Todo),
            task(2, "Drink milk", Status::Done),
            task(3, "Buy bread", Status::Done),
        ])
        .await;
        ctl.set_filter(Filter::Only(Status::Done));
        ctl.set_search("MILK");
        let cols = ctl.columns();
        assert!(cols.todo.is_empty());
        assert_eq!(cols.ids(Status::Done), vec![2]);
        assert_eq!(ctl.counts(), (1, 2));
    }

    #[tokio::test]
    async fn delete_failure_restores_task_and_position() {
        let (ctl, gateway) = loaded(vec![
            task(4, "d", Status::Todo),
            task(5, "e", Status::Todo),
            task(6, "f", Status::Todo),
        ])
        .await;
        gateway.fail("remove:5");
        let release = gateway.hold("remove:5");

        let spawned = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.delete(5).await }
        });
        settle_spawned().await;
        assert_eq!(ctl.columns().ids(Status::Todo), vec![4, 6]);

        release.notify_one();
        assert!(spawned.await.unwrap().is_err());
        assert_eq!(ctl.task(5).unwrap().title, "e");
        assert_eq!(ctl.columns().ids(Status::Todo), vec![4, 5, 6]);
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn delete_success_refetches() {
        let (ctl, gateway) = loaded(vec![task(5, "e", Status::Todo)]).await;
        ctl.delete(5).await.unwrap();
        assert_eq!(gateway.calls(), vec![Call::List, Call::Remove(5), Call::List]);
        assert!(ctl.columns().is_empty());
    }

    #[tokio::test]
    async fn delete_gate_confirms_or_cancels() {
        let (ctl, gateway) = loaded(vec![task(5, "e", Status::Todo), task(6, "f", Status::Todo)]).await;
        ctl.request_delete(5).unwrap();
        assert_eq!(ctl.delete_requested(), Some(5));
        assert_eq!(ctl.cancel_delete(), Some(5));
        assert_eq!(ctl.confirm_delete().await.unwrap(), None);
        assert!(gateway.mutating_calls().is_empty());

        ctl.request_delete(6).unwrap();
        assert_eq!(ctl.confirm_delete().await.unwrap(), Some(6));
        assert_eq!(ctl.delete_requested(), None);
        assert_eq!(ctl.columns().ids(Status::Todo), vec![5]);
        assert!(matches!(ctl.request_delete(99), Err(MutationError::UnknownTask(99))));
    }

    #[tokio::test]
    async fn toggle_moves_to_head_of_other_column() {
        let (ctl, gateway) = loaded(vec![task(1, "a", Status::Todo), task(2, "b", Status::Done)]).await;
        assert_eq!(ctl.toggle(1).await.unwrap(), Status::Done);
        assert_eq!(ctl.columns().ids(Status::Done), vec![1, 2]);
        assert_eq!(
            gateway.mutating_calls(),
            vec![Call::Update(1, TaskPatch::status(Status::Done))]
        );
        assert_eq!(ctl.task(1).unwrap().status, Status::Done);
    }

    #[tokio::test]
    async fn edit_failure_reverts_title_and_refetches() {
        let (ctl, gateway) = loaded(vec![task(1, "Old", Status::Todo)]).await;
        gateway.fail("update:1");
        assert!(ctl.edit(1, "New").await.is_err());
        assert_eq!(ctl.task(1).unwrap().title, "Old");
        assert_eq!(gateway.calls().last(), Some(&Call::List));
    }

    #[tokio::test]
    async fn second_mutation_on_busy_task_is_rejected() {
        let (ctl, gateway) = loaded(vec![task(1, "a", Status::Todo)]).await;
        let release = gateway.hold("update:1");
        let spawned = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.edit(1, "b").await }
        });
        settle_spawned().await;

        assert!(matches!(ctl.toggle(1).await, Err(MutationError::Busy(1))));
        assert!(matches!(ctl.delete(1).await, Err(MutationError::Busy(1))));
        assert_eq!(ctl.pending_count(), 1);

        release.notify_one();
        spawned.await.unwrap().unwrap();
        assert_eq!(ctl.task(1).unwrap().title, "b");
        assert_eq!(ctl.pending_count(), 0);
    }

    #[tokio::test]
    async fn stale_list_does_not_overwrite_speculation() {
        let (ctl, gateway) = loaded(vec![task(1, "a", Status::Todo)]).await;
        let release = gateway.hold("list");
        let stale_fetch = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.refresh().await }
        });
        settle_spawned().await;

        ctl.edit(1, "b").await.unwrap();
        release.notify_one();
        assert_eq!(stale_fetch.await.unwrap().unwrap(), FetchOutcome::Superseded);
        assert_eq!(ctl.task(1).unwrap().title, "b");
    }

    #[tokio::test]
    async fn list_issued_mid_update_cannot_undo_it_after_settle() {
        let (ctl, gateway) = loaded(vec![task(1, "a", Status::Todo)]).await;
        let release_update = gateway.hold("update:1");
        let edit = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.edit(1, "b").await }
        });
        settle_spawned().await;

        let release_list = gateway.hold("list");
        let old_fetch = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.refresh().await }
        });
        settle_spawned().await;

        release_update.notify_one();
        edit.await.unwrap().unwrap();
        assert_eq!(ctl.task(1).unwrap().title, "b");

        release_list.notify_one();
        assert_eq!(old_fetch.await.unwrap().unwrap(), FetchOutcome::Superseded);
        assert_eq!(ctl.task(1).unwrap().title, "b");
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn list_with_repeated_id_shows_one_card() {
        let (ctl, _) = loaded(vec![task(1, "a", Status::Todo), task(1, "a2", Status::Todo)]).await;
        assert_eq!(ctl.columns().ids(Status::Todo), vec![1]);
        assert_eq!(ctl.task(1).unwrap().title, "a");
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn concurrent_creates_settle_out_of_order() {
        let (ctl, gateway) = loaded(vec![]).await;
        gateway.next_id(10);
        gateway.fail("create:first");
        let release = gateway.hold("create:first");

        let first = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.add("first", Status::Todo).await }
        });
        settle_spawned().await;
        let second = ctl.add("second", Status::Todo).await.unwrap();
        assert_eq!(ctl.columns().todo.len(), 2);

        release.notify_one();
        assert!(first.await.unwrap().is_err());
        assert_eq!(ctl.columns().ids(Status::Todo), vec![second]);
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn repeated_server_id_keeps_one_card() {
        let (ctl, gateway) = loaded(vec![]).await;
        gateway.always_assign(255);
        ctl.add("a", Status::Todo).await.unwrap();
        ctl.add("b", Status::Done).await.unwrap();
        let cols = ctl.columns();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols.ids(Status::Done), vec![255]);
        assert!(consistent(&ctl));
    }

    #[tokio::test]
    async fn board_stays_consistent_across_mixed_operations() {
        let (ctl, _) = loaded(vec![
            task(1, "a", Status::Todo),
            task(2, "b", Status::Todo),
            task(3, "c", Status::Done),
        ])
        .await;
        ctl.add("d", Status::Todo).await.unwrap();
        assert!(consistent(&ctl));
        ctl.toggle(2).await.unwrap();
        assert!(consistent(&ctl));
        ctl.move_to(3, Status::Todo, Some(1)).await.unwrap();
        assert!(consistent(&ctl));
        ctl.delete(1).await.unwrap();
        assert!(consistent(&ctl));
        ctl.refresh().await.unwrap();
        assert!(consistent(&ctl));
    }
}

use std::collections::{HashMap, HashSet};

use super::{Filter, Status, Task, TaskId, ViewFilter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("task {id} is not at position {index} of {column}")]
    NotAtIndex {
        id: TaskId,
        column: Status,
        index: usize,
    },
    #[error("position {index} is past the end of {column} ({len} tasks)")]
    IndexOutOfRange {
        column: Status,
        index: usize,
        len: usize,
    },
}

/// Per-column ordered task identifiers.
///
/// Every cached identifier appears in exactly one column, exactly once, once
/// reconciliation has run. Order inside a column is the user's drag order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardOrder {
    todo: Vec<TaskId>,
    done: Vec<TaskId>,
}

impl BoardOrder {
    #[cfg(test)]
    pub(crate) fn from_columns(todo: Vec<TaskId>, done: Vec<TaskId>) -> Self {
        Self { todo, done }
    }

    pub fn column(&self, status: Status) -> &[TaskId] {
        match status {
            Status::Todo => &self.todo,
            Status::Done => &self.done,
        }
    }

    fn column_mut(&mut self, status: Status) -> &mut Vec<TaskId> {
        match status {
            Status::Todo => &mut self.todo,
            Status::Done => &mut self.done,
        }
    }

    /// Column and index currently holding `id`.
    pub fn find(&self, id: TaskId) -> Option<(Status, usize)> {
        Status::ALL.into_iter().find_map(|status| {
            self.column(status)
                .iter()
                .position(|&x| x == id)
                .map(|idx| (status, idx))
        })
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.find(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.todo.len() + self.done.len()
    }

    /// Rebuild both columns from scratch, partitioning by derived status and
    /// keeping input order. Discards any manual ordering.
    pub fn seed(&mut self, tasks: &[Task]) {
        self.todo.clear();
        self.done.clear();
        for task in tasks {
            self.column_mut(task.status()).push(task.id);
        }
    }

    /// Remove `id` from `from` at `from_index` and insert it into `to` at
    /// `to_index`. `to_index` is interpreted after the removal.
    pub fn move_within_or_across(
        &mut self,
        id: TaskId,
        from: Status,
        to: Status,
        from_index: usize,
        to_index: usize,
    ) -> Result<(), OrderError> {
        if self.column(from).get(from_index) != Some(&id) {
            return Err(OrderError::NotAtIndex {
                id,
                column: from,
                index: from_index,
            });
        }
        let dest_len = self.column(to).len() - usize::from(from == to);
        if to_index > dest_len {
            return Err(OrderError::IndexOutOfRange {
                column: to,
                index: to_index,
                len: dest_len,
            });
        }
        self.column_mut(from).remove(from_index);
        self.column_mut(to).insert(to_index, id);
        Ok(())
    }

    /// Move `id` to the head of `to`. No-op if it is already in `to` or absent.
    pub fn move_to(&mut self, id: TaskId, to: Status) -> bool {
        match self.find(id) {
            Some((from, idx)) if from != to => {
                self.column_mut(from).remove(idx);
                self.column_mut(to).insert(0, id);
                true
            }
            _ => false,
        }
    }

    /// Place a brand-new identifier in `status` at `index` (clamped).
    pub fn insert_new_at(&mut self, id: TaskId, status: Status, index: usize) {
        let col = self.column_mut(status);
        let index = index.min(col.len());
        col.insert(index, id);
    }

    /// Drop `id` from every column that holds it. Idempotent.
    pub fn remove_everywhere(&mut self, id: TaskId) -> bool {
        let before = self.len();
        self.todo.retain(|&x| x != id);
        self.done.retain(|&x| x != id);
        self.len() != before
    }

    /// Substitute `temp_id` with `real_id` in place. A stale occurrence of
    /// `real_id` elsewhere is dropped so the identifier stays unique.
    pub fn replace_identifier(&mut self, temp_id: TaskId, real_id: TaskId) {
        if temp_id == real_id || !self.contains(temp_id) {
            return;
        }
        self.remove_everywhere(real_id);
        for col in [&mut self.todo, &mut self.done] {
            for x in col.iter_mut() {
                if *x == temp_id {
                    *x = real_id;
                }
            }
        }
    }

    /// Put `id` back at a recorded placement, replacing wherever it is now.
    pub fn restore_placement(&mut self, id: TaskId, status: Status, index: usize) {
        self.remove_everywhere(id);
        self.insert_new_at(id, status, index);
    }

    /// Align the columns with a fresh task list without discarding drag order.
    ///
    /// Known identifiers keep their position; identifiers whose status changed
    /// move to the head of their new column; vanished identifiers are dropped;
    /// unknown identifiers are appended in list order.
    pub fn reconcile(&mut self, tasks: &[Task]) {
        let wanted: HashMap<TaskId, Status> = tasks.iter().map(|t| (t.id, t.status())).collect();
        let mut seen = HashSet::new();
        let mut moved: Vec<(TaskId, Status)> = Vec::new();

        for status in Status::ALL {
            self.column_mut(status).retain(|id| match wanted.get(id) {
                Some(&want) if seen.insert(*id) => {
                    if want == status {
                        true
                    } else {
                        moved.push((*id, want));
                        false
                    }
                }
                _ => false,
            });
        }

        for status in Status::ALL {
            let mut col: Vec<TaskId> = moved
                .iter()
                .filter(|(_, want)| *want == status)
                .map(|(id, _)| *id)
                .collect();
            col.extend_from_slice(self.column(status));
            *self.column_mut(status) = col;
        }

        for task in tasks {
            if seen.insert(task.id) {
                self.column_mut(task.status()).push(task.id);
            }
        }
    }
}

/// Board Order State: column order plus the transient view state that
/// belongs with it.
#[derive(Debug, Clone, Default)]
pub struct OrderState {
    order: BoardOrder,
    view: ViewFilter,
    confirm_delete: Option<TaskId>,
    active_drag: Option<TaskId>,
}

impl OrderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self) -> &BoardOrder {
        &self.order
    }

    pub fn order_mut(&mut self) -> &mut BoardOrder {
        &mut self.order
    }

    pub fn view(&self) -> &ViewFilter {
        &self.view
    }

    pub fn set_filter(&mut self, filter: Filter) {
        self.view.filter = filter;
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.view.search = search.into();
    }

    pub fn open_delete_confirm(&mut self, id: TaskId) {
        self.confirm_delete = Some(id);
    }

    /// Close the delete gate, returning the identifier it was open for.
    pub fn close_delete_confirm(&mut self) -> Option<TaskId> {
        self.confirm_delete.take()
    }

    pub fn confirm_delete_id(&self) -> Option<TaskId> {
        self.confirm_delete
    }

    pub fn start_drag(&mut self, id: TaskId) {
        self.active_drag = Some(id);
    }

    pub fn end_drag(&mut self) -> Option<TaskId> {
        self.active_drag.take()
    }

    pub fn active_drag(&self) -> Option<TaskId> {
        self.active_drag
    }
}

use super::{Task, TaskId};

/// Last known list of remote-shaped tasks.
///
/// Row order is the order the server listed them in, with speculative rows
/// inserted at the front. Absence is never an error: updates and removals of
/// missing identifiers are silent no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCache {
    tasks: Vec<Task>,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk overwrite after a full list fetch.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Row index of a task, if cached.
    pub fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Insert or overwrite by identifier. New rows go to the front.
    pub fn upsert(&mut self, task: Task) {
        match self.position(task.id) {
            Some(idx) => self.tasks[idx] = task,
            None => self.tasks.insert(0, task),
        }
    }

    /// Insert a row at `index` (clamped to the end).
    pub fn insert_at(&mut self, index: usize, task: Task) {
        let index = index.min(self.tasks.len());
        self.tasks.insert(index, task);
    }

    /// Swap the row for `old_id` with `task`, keeping its index.
    ///
    /// Any other row already carrying `task.id` is dropped so the identifier
    /// stays unique. Falls back to a front insert if `old_id` is gone.
    pub fn replace_row(&mut self, old_id: TaskId, task: Task) {
        let new_id = task.id;
        if old_id != new_id {
            self.tasks.retain(|t| t.id != new_id);
        }
        match self.position(old_id) {
            Some(idx) => self.tasks[idx] = task,
            None => self.tasks.insert(0, task),
        }
    }

    /// Functional partial update; no-op if absent.
    pub fn update_where(&mut self, id: TaskId, updater: impl FnOnce(&mut Task)) {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
            updater(task);
        }
    }

    /// Remove a row, returning it with its former index.
    pub fn remove_where(&mut self, id: TaskId) -> Option<(usize, Task)> {
        let idx = self.position(id)?;
        Some((idx, self.tasks.remove(idx)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

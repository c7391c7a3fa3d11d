pub mod age;
pub mod cache;
pub mod gateway;
pub mod mutation;
pub mod order;

use serde::{Deserialize, Serialize};

/// Task identifier. Server-assigned identifiers are non-negative; locally
/// minted temporary identifiers are negative.
pub type TaskId = i64;

/// Longest title the board accepts, in characters.
pub const MAX_TITLE_CHARS: usize = 120;

/// Whether an identifier was minted locally for a not-yet-confirmed task.
pub fn is_temporary(id: TaskId) -> bool {
    id < 0
}

/// The two board columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Todo,
    Done,
}

impl Status {
    pub const ALL: [Status; 2] = [Self::Todo, Self::Done];

    /// Derive the column from the remote completion flag.
    pub fn from_done(done: bool) -> Self {
        if done {
            Self::Done
        } else {
            Self::Todo
        }
    }

    pub fn is_done(self) -> bool {
        self == Self::Done
    }

    /// The status-cycle shortcut: todo <-> done.
    pub fn toggled(self) -> Self {
        match self {
            Self::Todo => Self::Done,
            Self::Done => Self::Todo,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Done => "done",
        }
    }

    /// Column heading.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Todo => "Todo",
            Self::Done => "Done",
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown status '{other}': use todo or done")),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as the remote store shapes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub todo: String,
    pub completed: bool,
    #[serde(rename = "userId")]
    pub user_id: i64,
}

impl Task {
    pub fn status(&self) -> Status {
        Status::from_done(self.completed)
    }

    /// Presentation-shaped view of this task. Total and pure.
    pub fn to_local(&self) -> LocalTask {
        LocalTask {
            id: self.id,
            title: self.todo.clone(),
            status: self.status(),
            owner_ref: self.user_id,
        }
    }
}

/// A task as the board presents it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTask {
    pub id: TaskId,
    pub title: String,
    pub status: Status,
    pub owner_ref: i64,
}

/// Partial change to a task. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<Status>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            status: None,
        }
    }

    pub fn status(status: Status) -> Self {
        Self {
            title: None,
            status: Some(status),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.status.is_none()
    }

    /// Functional merge onto a cached row.
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.todo = title.clone();
        }
        if let Some(status) = self.status {
            task.completed = status.is_done();
        }
    }
}

/// Column filter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    All,
    Only(Status),
}

impl Filter {
    pub fn admits(self, status: Status) -> bool {
        match self {
            Self::All => true,
            Self::Only(only) => only == status,
        }
    }
}

impl std::str::FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            other => other
                .parse::<Status>()
                .map(Self::Only)
                .map_err(|_| format!("unknown filter '{other}': use all, todo or done")),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(status) => f.write_str(status.as_str()),
        }
    }
}

/// Filter and free-text search, applied when columns are read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub filter: Filter,
    pub search: String,
}

impl ViewFilter {
    /// Case-insensitive substring search on the title, combined with the filter.
    pub fn matches(&self, task: &LocalTask) -> bool {
        if !self.filter.admits(task.status) {
            return false;
        }
        let needle = self.search.trim().to_lowercase();
        needle.is_empty() || task.title.to_lowercase().contains(&needle)
    }

    pub fn is_active(&self) -> bool {
        self.filter != Filter::All || !self.search.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    #[error("title is required")]
    Empty,
    #[error("title is longer than {MAX_TITLE_CHARS} characters")]
    TooLong,
}

/// Validate a submitted title, returning it trimmed.
pub fn validate_title(raw: &str) -> Result<String, TitleError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(TitleError::Empty);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(TitleError::TooLong);
    }
    Ok(title.to_string())
}

#[cfg(test)]
pub(crate) fn task(id: TaskId, title: &str, status: Status) -> Task {
    Task {
        id,
        todo: title.to_string(),
        completed: status.is_done(),
        user_id: 1,
    }
}

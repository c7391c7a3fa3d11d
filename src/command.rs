//! Shell commands: a small line language over the board controller.
//!
//! Mutations are spawned onto the runtime so the prompt comes back at once
//! and several changes can be in flight together. Every outcome, immediate
//! or settled later, is reported as a [`Notice`] on the session channel.

use std::fmt::Display;
use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::app::{BoardController, Columns, DropOutcome, DropTarget};
use crate::board::age::{format_age, pending_badge};
use crate::board::gateway::RemoteGateway;
use crate::board::mutation::{FetchOutcome, Failure};
use crate::board::{Filter, Status, TaskId};

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

pub struct CommandInfo {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

/// All recognized commands (sorted alphabetically). `q` and `del` are
/// aliases and not listed.
pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo { name: "add",     usage: "add [-d] <title>",          description: "Create a task (-d: straight into done)" },
    CommandInfo { name: "count",   usage: "count",                     description: "Task counts per column" },
    CommandInfo { name: "drag",    usage: "drag <id> <status|card-id>", description: "Drop a task on a column head or onto another card" },
    CommandInfo { name: "edit",    usage: "edit <id> <title>",         description: "Rename a task" },
    CommandInfo { name: "filter",  usage: "filter <all|todo|done>",    description: "Show only one column" },
    CommandInfo { name: "help",    usage: "help [text]",               description: "List commands, or those matching text" },
    CommandInfo { name: "no",      usage: "no",                        description: "Cancel a pending delete" },
    CommandInfo { name: "quit",    usage: "quit",                      description: "Leave the shell" },
    CommandInfo { name: "refresh", usage: "refresh",                   description: "Re-fetch the task list" },
    CommandInfo { name: "rm",      usage: "rm <id>",                   description: "Ask to delete a task" },
    CommandInfo { name: "search",  usage: "search [text]",             description: "Filter by title; no text clears" },
    CommandInfo { name: "show",    usage: "show",                      description: "Print the board" },
    CommandInfo { name: "toggle",  usage: "toggle <id>",               description: "Move a task to the other column" },
    CommandInfo { name: "yes",     usage: "yes",                       description: "Confirm a pending delete" },
];

const FILTER_NAMES: &[&str] = &["all", "todo", "done"];

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NotificationLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Info, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Error, text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Interactive shell session state.
pub struct Shell<G> {
    ctl: BoardController<G>,
    notices: UnboundedSender<Notice>,
    pub should_quit: bool,
}

impl<G: RemoteGateway + 'static> Shell<G> {
    pub fn new(ctl: BoardController<G>, notices: UnboundedSender<Notice>) -> Self {
        Self { ctl, notices, should_quit: false }
    }

    pub fn controller(&self) -> &BoardController<G> {
        &self.ctl
    }

    fn notify(&self, msg: impl Into<String>) {
        // The receiver only goes away when the session is shutting down.
        let _ = self.notices.send(Notice::info(msg));
    }

    fn notify_error(&self, msg: impl Into<String>) {
        let _ = self.notices.send(Notice::error(msg));
    }

    /// Run `work` in the background and report its outcome when it settles.
    fn spawn<T, E, F>(&self, work: F, describe: impl FnOnce(T) -> String + Send + 'static)
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let notices = self.notices.clone();
        tokio::spawn(async move {
            let notice = match work.await {
                Ok(value) => Notice::info(describe(value)),
                Err(e) => Notice::error(e.to_string()),
            };
            let _ = notices.send(notice);
        });
    }

    /// Parse and execute one command line.
    pub async fn execute_command(&mut self, input: &str) {
        let input = input.trim();
        if input.is_empty() {
            return;
        }

        let (cmd, rest) = match input.find(char::is_whitespace) {
            Some(pos) => (&input[..pos], input[pos..].trim_start()),
            None => (input, ""),
        };

        match cmd {
            "q" | "quit" => self.should_quit = true,
            "add" => self.cmd_add(rest),
            "edit" => self.cmd_edit(rest),
            "toggle" => self.cmd_toggle(rest),
            "drag" => self.cmd_drag(rest),
            "rm" | "del" => self.cmd_rm(rest),
            "yes" => self.cmd_yes(),
            "no" => self.cmd_no(),
            "filter" => self.cmd_filter(rest),
            "search" => self.cmd_search(rest),
            "show" => {
                let failure = self.ctl.last_failure();
                self.notify(render_board(&self.ctl.columns(), failure.as_ref(), Utc::now()));
                self.ctl.clear_failure();
            }
            "refresh" => self.cmd_refresh(),
            "count" => self.cmd_count(),
            "help" => match help_text(rest) {
                Some(text) => self.notify(text),
                None => self.notify_error(format!("No command matches: {rest}")),
            },
            _ => self.notify_error(format!("Unknown command: {cmd}")),
        }

        // Let freshly spawned mutations apply their speculative change before
        // the next line is read.
        tokio::task::yield_now().await;
    }

    /// add [-d] <title>
    fn cmd_add(&self, args: &str) {
        let (status, title) = match args.split_once(char::is_whitespace) {
            Some(("-d" | "--done", title)) => (Status::Done, title.trim()),
            _ if args == "-d" || args == "--done" => (Status::Done, ""),
            _ => (Status::Todo, args),
        };
        if title.is_empty() {
            self.notify_error("Usage: add [-d] <title>");
            return;
        }
        let ctl = self.ctl.clone();
        let title = title.to_string();
        self.spawn(
            async move { ctl.add(&title, status).await },
            |id| format!("Created #{id}"),
        );
    }

    /// edit <id> <title>
    fn cmd_edit(&self, args: &str) {
        let Some((id, title)) = args.split_once(char::is_whitespace) else {
            self.notify_error("Usage: edit <id> <title>");
            return;
        };
        let id = match parse_id(id) {
            Ok(id) => id,
            Err(e) => return self.notify_error(e),
        };
        let ctl = self.ctl.clone();
        let title = title.trim().to_string();
        self.spawn(async move { ctl.edit(id, &title).await }, move |()| format!("Saved #{id}"));
    }

    /// toggle <id>
    fn cmd_toggle(&self, args: &str) {
        let id = match parse_id(args) {
            Ok(id) => id,
            Err(e) => return self.notify_error(e),
        };
        let ctl = self.ctl.clone();
        self.spawn(async move { ctl.toggle(id).await }, move |status| {
            format!("#{id} moved to {}", status.label())
        });
    }

    /// drag <id> <status|card-id>
    fn cmd_drag(&self, args: &str) {
        let mut parts = args.split_whitespace();
        let (Some(id), Some(target), None) = (parts.next(), parts.next(), parts.next()) else {
            self.notify_error("Usage: drag <id> <todo|done|card-id>");
            return;
        };
        let id = match parse_id(id) {
            Ok(id) => id,
            Err(e) => return self.notify_error(e),
        };
        let target = match resolve_drop_target(target) {
            Ok(target) => target,
            Err(e) => return self.notify_error(e),
        };
        let ctl = self.ctl.clone();
        self.spawn(async move { ctl.drag_to(id, target).await }, move |outcome| match outcome {
            DropOutcome::Moved => format!("Moved #{id}"),
            DropOutcome::Reordered => format!("Reordered #{id}"),
            DropOutcome::Cancelled => "Drag cancelled".to_string(),
        });
    }

    /// rm <id> opens the confirm gate.
    fn cmd_rm(&self, args: &str) {
        let id = match parse_id(args) {
            Ok(id) => id,
            Err(e) => return self.notify_error(e),
        };
        match self.ctl.request_delete(id) {
            Ok(()) => {
                let title = self.ctl.task(id).map(|t| t.title).unwrap_or_default();
                self.notify(format!("Delete #{id} \"{title}\"? yes/no"));
            }
            Err(e) => self.notify_error(e.to_string()),
        }
    }

    fn cmd_yes(&self) {
        if self.ctl.delete_requested().is_none() {
            self.notify_error("Nothing to confirm");
            return;
        }
        let ctl = self.ctl.clone();
        self.spawn(async move { ctl.confirm_delete().await }, |id| match id {
            Some(id) => format!("Deleted #{id}"),
            None => "Nothing to confirm".to_string(),
        });
    }

    fn cmd_no(&self) {
        match self.ctl.cancel_delete() {
            Some(id) => self.notify(format!("Kept #{id}")),
            None => self.notify_error("Nothing to confirm"),
        }
    }

    /// filter <all|todo|done>
    fn cmd_filter(&self, args: &str) {
        let filter = resolve_name(FILTER_NAMES, args, "filter").and_then(|name| name.parse::<Filter>());
        match filter {
            Ok(filter) => {
                self.ctl.set_filter(filter);
                self.notify(format!("Filter: {filter}"));
            }
            Err(e) => self.notify_error(e),
        }
    }

    /// search [text]
    fn cmd_search(&self, args: &str) {
        self.ctl.set_search(args);
        if args.is_empty() {
            self.notify("Search cleared");
        } else {
            self.notify(format!("Search: {args}"));
        }
    }

    fn cmd_refresh(&self) {
        let ctl = self.ctl.clone();
        self.spawn(async move { ctl.refresh().await }, |outcome| match outcome {
            FetchOutcome::Superseded => "Refresh superseded by a newer change".to_string(),
            _ => "Board refreshed".to_string(),
        });
    }

    fn cmd_count(&self) {
        let (todo, done) = self.ctl.counts();
        let pending = self.ctl.pending_count();
        let mut msg = format!("Todo: {todo}  Done: {done}");
        if pending > 0 {
            msg.push_str(&format!("  ({pending} pending)"));
        }
        self.notify(msg);
    }
}

// ---------------------------------------------------------------------------
// Argument resolution
// ---------------------------------------------------------------------------

/// Match `query` against `names` (case-insensitive): exact, then prefix, then
/// contains.
fn resolve_name<'a>(names: &[&'a str], query: &str, what: &str) -> Result<&'a str, String> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Err(format!("{} required", capitalize(what)));
    }

    if let Some(name) = names.iter().copied().find(|n| *n == query) {
        return Ok(name);
    }

    let mut matches: Vec<&'a str> = names.iter().copied().filter(|n| n.starts_with(&query)).collect();
    if matches.is_empty() {
        matches = names.iter().copied().filter(|n| n.contains(&query)).collect();
    }

    match matches.as_slice() {
        [] => Err(format!("Unknown {what}: {query}")),
        [one] => Ok(*one),
        many => Err(format!("Ambiguous: {}", many.join(", "))),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolve a status name or unambiguous prefix.
pub fn resolve_status(query: &str) -> Result<Status, String> {
    let names: Vec<&str> = Status::ALL.iter().map(|s| s.as_str()).collect();
    resolve_name(&names, query, "status")?.parse()
}

/// `#12` or `12`. Negative identifiers name tasks still being created.
pub fn parse_id(raw: &str) -> Result<TaskId, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("Task id required".into());
    }
    raw.trim_start_matches('#')
        .parse()
        .map_err(|_| format!("Not a task id: {raw}"))
}

/// A numeric target is a card; anything else must name a column.
fn resolve_drop_target(raw: &str) -> Result<DropTarget, String> {
    match parse_id(raw) {
        Ok(id) => Ok(DropTarget::Card(id)),
        Err(_) => resolve_status(raw).map(DropTarget::Column),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Usage lines for every command whose name contains `query` (all when
/// empty). `None` if nothing matches.
pub fn help_text(query: &str) -> Option<String> {
    let query = query.trim().to_lowercase();
    let matching: Vec<&CommandInfo> = COMMANDS.iter().filter(|c| c.name.contains(&query)).collect();
    if matching.is_empty() {
        return None;
    }
    let width = matching.iter().map(|c| c.usage.len()).max().unwrap_or(0);
    Some(
        matching
            .iter()
            .map(|c| format!("  {:width$}  {}", c.usage, c.description))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Plain-text rendering of both columns.
pub fn render_board(columns: &Columns, failure: Option<&Failure>, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for status in Status::ALL {
        let cards = columns.column(status);
        out.push_str(&format!("{} ({})\n", status.label(), cards.len()));
        if cards.is_empty() {
            out.push_str("  (empty)\n");
        }
        for card in cards {
            out.push_str(&format!("  #{:<5} {}", card.task.id, card.task.title));
            if let Some(pending) = &card.pending {
                out.push_str(&format!("  [{}]", pending_badge(pending, now)));
            }
            out.push('\n');
        }
    }
    if let Some(failure) = failure {
        out.push_str(&format!(
            "last failure: {} #{} ({}): {}\n",
            failure.kind,
            failure.id,
            format_age(failure.at, now),
            failure.message
        ));
    }
    out.trim_end().to_string()
}

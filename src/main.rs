mod app;
mod board;
mod command;
mod config;

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use reqwest::StatusCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use app::{BoardController, DropOutcome};
use board::gateway::{GatewayError, HttpGateway, Operation, RemoteGateway};
use board::mutation::{MutationCoordinator, MutationError};
use board::{Filter, Status, TaskId};
use command::{render_board, Notice, NotificationLevel, Shell};
use config::{Config, ConfigError, API_URL_ENV};

#[derive(Parser)]
#[command(name = "taskboard", about = "A two-column task board over a REST todo API")]
struct Cli {
    /// Base URL of the todo resource (overrides the config file and TASKBOARD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Config file (defaults to <config dir>/taskboard/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print both columns
    List {
        /// Column filter (all, todo, done)
        #[arg(short, long, default_value = "all")]
        filter: Filter,
        /// Case-insensitive title search
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Create a task
    Add {
        /// Task title (1-120 characters)
        title: String,
        /// Column to create it in (todo, done)
        #[arg(short, long, default_value = "todo")]
        status: Status,
    },
    /// Rename a task
    Edit {
        id: TaskId,
        title: String,
    },
    /// Move a task to the other column
    Toggle {
        id: TaskId,
    },
    /// Move a task to a column, at its head or at a position
    Move {
        id: TaskId,
        /// Target column (todo, done)
        status: Status,
        /// Position in the target column (0 = head)
        #[arg(short, long)]
        index: Option<usize>,
    },
    /// Delete a task
    Delete {
        id: TaskId,
    },
    /// Check configuration and remote reachability
    Doctor,
    /// Interactive session (default)
    Shell,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Install color_eyre for unexpected panics/errors (developer bugs).
    let _ = color_eyre::install();
    let cli = Cli::parse();

    if matches!(cli.command, Some(Command::Doctor)) {
        init_logging("warn");
        if let Err(e) = cmd_doctor(&cli).await {
            print_user_error(&e);
            std::process::exit(1);
        }
        return;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            print_user_error(&e);
            std::process::exit(1);
        }
    };
    init_logging(&config.log.filter);

    let result = match connect(&config) {
        Ok(ctl) => run(ctl, cli.command).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        print_user_error(&e);
        std::process::exit(1);
    }
}

async fn run(ctl: BoardController<HttpGateway>, command: Option<Command>) -> color_eyre::Result<()> {
    match command {
        Some(Command::List { filter, search }) => cmd_list(&ctl, filter, search.as_deref()).await,
        Some(Command::Add { title, status }) => cmd_add(&ctl, &title, status).await,
        Some(Command::Edit { id, title }) => cmd_edit(&ctl, id, &title).await,
        Some(Command::Toggle { id }) => cmd_toggle(&ctl, id).await,
        Some(Command::Move { id, status, index }) => cmd_move(&ctl, id, status, index).await,
        Some(Command::Delete { id }) => cmd_delete(&ctl, id).await,
        Some(Command::Doctor) => Ok(()),
        Some(Command::Shell) | None => cmd_shell(ctl).await,
    }
}

/// `RUST_LOG` wins; otherwise the config file's filter.
fn init_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> color_eyre::Result<Config> {
    let (mut config, _) = Config::load(cli.config.as_deref())?;
    config.apply_overrides(cli.api_url.clone(), env::var(API_URL_ENV).ok());
    config.validate()?;
    Ok(config)
}

fn connect(config: &Config) -> color_eyre::Result<BoardController<HttpGateway>> {
    let gateway = HttpGateway::new(config.api.base_url.clone(), config.api.user_id, config.api.timeout())
        .wrap_err("could not build the HTTP client")?;
    Ok(BoardController::new(
        Arc::new(gateway),
        MutationCoordinator::new(config.api.user_id),
    ))
}

/// Print a user-friendly error message, with actionable hints for known error types.
fn print_user_error(error: &color_eyre::Report) {
    if let Some(mutation_err) = error.downcast_ref::<MutationError>() {
        match mutation_err {
            MutationError::UnknownTask(id) => {
                eprintln!("error: no task #{id} on the board.");
                eprintln!("  Run `taskboard list` to see task ids.");
            }
            MutationError::Busy(id) => {
                eprintln!("error: task #{id} is still being saved.");
                eprintln!("  Wait for the change in flight to settle, then retry.");
            }
            MutationError::InvalidTitle(e) => {
                eprintln!("error: {e}.");
                eprintln!("  Titles are 1 to {} characters.", board::MAX_TITLE_CHARS);
            }
            MutationError::Remote(e) => print_gateway_error(e),
            other => eprintln!("error: {other}"),
        }
        return;
    }

    if let Some(gateway_err) = error.downcast_ref::<GatewayError>() {
        print_gateway_error(gateway_err);
        return;
    }

    if let Some(config_err) = error.downcast_ref::<ConfigError>() {
        match config_err {
            ConfigError::NotFound(path) => {
                eprintln!("error: config file not found: {}", path.display());
                eprintln!("  Check the --config path.");
            }
            ConfigError::TomlDe { path, source } => {
                eprintln!("error: config file has invalid TOML syntax: {}", path.display());
                eprintln!("  {source}");
                eprintln!("  Run `taskboard doctor` to diagnose.");
            }
            ConfigError::Io { path, source } => {
                eprintln!("error: could not read config file {}.", path.display());
                eprintln!("  {source}");
            }
            ConfigError::InvalidUrl(url) => {
                eprintln!("error: invalid api url: {url:?}");
                eprintln!("  Use a full URL such as https://dummyjson.com/todos");
            }
        }
        return;
    }

    eprintln!("error: {e:#}", e = error);
}

fn print_gateway_error(error: &GatewayError) {
    eprintln!("error: {error}");
    match error {
        GatewayError::Status { status, .. } if *status == StatusCode::NOT_FOUND => match error.operation() {
            Operation::Update(id) | Operation::Remove(id) => {
                eprintln!("  The server has no task #{id}. Run `taskboard list` to refresh ids.");
            }
            Operation::List | Operation::Create => {
                eprintln!("  Nothing is served at this URL. Check --api-url.");
            }
        },
        GatewayError::Status { .. } => {
            eprintln!("  The change was rolled back. Retry once the server recovers.");
        }
        GatewayError::Transport { .. } => {
            eprintln!("  Check your network connection and --api-url, or run `taskboard doctor`.");
        }
        GatewayError::Decode { .. } => {
            eprintln!("  The server's response was not a todo resource. Check --api-url.");
        }
    }
}

async fn cmd_list(
    ctl: &BoardController<HttpGateway>,
    filter: Filter,
    search: Option<&str>,
) -> color_eyre::Result<()> {
    ctl.refresh().await?;
    ctl.set_filter(filter);
    if let Some(search) = search {
        ctl.set_search(search);
    }
    let columns = ctl.columns();
    println!("{}", render_board(&columns, None, Utc::now()));
    if ctl.view().is_active() {
        let (todo, done) = ctl.counts();
        if columns.is_empty() {
            println!("No tasks match.");
        } else {
            println!("{} of {} tasks shown", columns.len(), todo + done);
        }
    }
    Ok(())
}

async fn cmd_add(ctl: &BoardController<HttpGateway>, title: &str, status: Status) -> color_eyre::Result<()> {
    let id = ctl.add(title, status).await?;
    println!("Created #{id} in {}", status.label());
    Ok(())
}

async fn cmd_edit(ctl: &BoardController<HttpGateway>, id: TaskId, title: &str) -> color_eyre::Result<()> {
    ctl.refresh().await?;
    ctl.edit(id, title).await?;
    println!("Saved #{id}");
    Ok(())
}

async fn cmd_toggle(ctl: &BoardController<HttpGateway>, id: TaskId) -> color_eyre::Result<()> {
    ctl.refresh().await?;
    let status = ctl.toggle(id).await?;
    println!("#{id} moved to {}", status.label());
    Ok(())
}

async fn cmd_move(
    ctl: &BoardController<HttpGateway>,
    id: TaskId,
    status: Status,
    index: Option<usize>,
) -> color_eyre::Result<()> {
    ctl.refresh().await?;
    match ctl.move_to(id, status, index).await? {
        DropOutcome::Moved => println!("Moved #{id} to {}", status.label()),
        DropOutcome::Reordered => {
            println!("#{id} is already in {}; reordered locally only", status.label())
        }
        DropOutcome::Cancelled => println!("Nothing to move"),
    }
    Ok(())
}

async fn cmd_delete(ctl: &BoardController<HttpGateway>, id: TaskId) -> color_eyre::Result<()> {
    ctl.refresh().await?;
    ctl.delete(id).await?;
    println!("Deleted #{id}");
    Ok(())
}

async fn cmd_doctor(cli: &Cli) -> color_eyre::Result<()> {
    let mut errors = 0u32;

    println!("\ntaskboard doctor\n");
    println!("Config");

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok((config, Some(path))) => {
            println!("  \u{2713} Loaded {}", path.display());
            config
        }
        Ok((config, None)) => {
            println!("  \u{2013} No config file (using defaults)");
            config
        }
        Err(e) => {
            println!("  \u{2717} {e}");
            println!("    \u{2192} Fix the file or point --config elsewhere");
            errors += 1;
            Config::default()
        }
    };
    config.apply_overrides(cli.api_url.clone(), env::var(API_URL_ENV).ok());

    if let Err(e) = config.validate() {
        println!("  \u{2717} {e}");
        errors += 1;
        print_summary(errors);
        return Ok(());
    }
    println!("  \u{2713} API: {}", config.api.base_url);
    match config.api.timeout() {
        Some(t) => println!("  \u{2713} Timeout: {}s", t.as_secs()),
        None => println!("  \u{2013} No request timeout (hung calls stay pending)"),
    }

    println!("\nRemote");
    let gateway = HttpGateway::new(config.api.base_url.clone(), config.api.user_id, config.api.timeout())
        .wrap_err("could not build the HTTP client")?;
    let started = Instant::now();
    match gateway.list().await {
        Ok(tasks) => println!(
            "  \u{2713} Reachable ({} tasks listed in {} ms)",
            tasks.len(),
            started.elapsed().as_millis()
        ),
        Err(e) => {
            println!("  \u{2717} {e}");
            println!("    \u{2192} Check your network connection and --api-url");
            errors += 1;
        }
    }

    print_summary(errors);
    Ok(())
}

fn print_summary(errors: u32) {
    println!();
    if errors == 0 {
        println!("All checks passed!");
    } else {
        println!(
            "{errors} issue{} found.",
            if errors == 1 { "" } else { "s" }
        );
    }
    println!();
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NotificationLevel::Info => println!("{}", notice.text),
        NotificationLevel::Error => eprintln!("error: {}", notice.text),
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn cmd_shell(ctl: BoardController<HttpGateway>) -> color_eyre::Result<()> {
    ctl.refresh().await?;
    println!("{}", render_board(&ctl.columns(), None, Utc::now()));
    println!("\nType `help` for commands.");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut shell = Shell::new(ctl, tx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt();
    while !shell.should_quit {
        tokio::select! {
            line = lines.next_line() => {
                match line.wrap_err("could not read from stdin")? {
                    Some(line) => shell.execute_command(&line).await,
                    None => break,
                }
                prompt();
            }
            Some(notice) = rx.recv() => {
                println!();
                print_notice(&notice);
                prompt();
            }
        }
    }

    // Let changes still in flight settle before the runtime shuts down.
    let in_flight = shell.controller().pending_count();
    if in_flight > 0 {
        println!("Waiting for {in_flight} change(s) to settle...");
    }
    while shell.controller().pending_count() > 0 {
        match rx.recv().await {
            Some(notice) => print_notice(&notice),
            None => break,
        }
    }
    Ok(())
}

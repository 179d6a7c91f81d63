//! Review-loop CLI.
//!
//! Drives an issue through review and into an approved pull request. Workflow
//! state lives in hidden markers on the GitHub thread; every command prints a
//! single JSON response on stdout and diagnostics on stderr.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::error;

use review_loop::core::step::verify_step_order;
use review_loop::core::types::ThreadRef;
use review_loop::exit_codes;
use review_loop::io::config::{CONFIG_FILE_NAME, LoopConfig, load_config, write_config};
use review_loop::io::git::Git;
use review_loop::io::github::GhCli;
use review_loop::io::persist::RetryingPersister;
use review_loop::io::snapshot::collect_snapshot;
use review_loop::io::store::StateStore;
use review_loop::lint::StateLinter;
use review_loop::logging;
use review_loop::response::{Response, TemplateFormatter};
use review_loop::router::{Outcome, Router, default_thread};

#[derive(Parser)]
#[command(
    name = "review-loop",
    version,
    about = "Issue-to-PR review workflow persisted in GitHub comments"
)]
struct Cli {
    /// Repository as `owner/name`. Overrides the config file.
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Config file. Defaults to `.review-loop.toml` in the working directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Git working directory.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Debug logging for this crate on stderr (ignored when `RUST_LOG` is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved workflow state as JSON.
    State,
    /// Run guards and print instructions for the current step.
    Next,
    /// Complete the current step and persist the new state.
    Complete {
        /// Step being completed, e.g. `p1-2`. Must be the current step.
        #[arg(long)]
        step: String,
        /// The step found problems that were fixed: start a new iteration.
        #[arg(long)]
        fixes_needed: bool,
        /// Free-form note appended to the state comment.
        #[arg(long)]
        note: Option<String>,
    },
    /// Check whether a command token was ever mentioned on a thread.
    Evidence {
        token: String,
        #[command(flatten)]
        target: ThreadArgs,
    },
    /// Append a state payload (JSON) to a thread, e.g. after a persistence failure.
    Persist {
        #[arg(long)]
        state: String,
        #[command(flatten)]
        target: ThreadArgs,
    },
    /// Strictly validate every state marker on a thread.
    Lint {
        #[command(flatten)]
        target: ThreadArgs,
    },
    /// Write the default config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct ThreadArgs {
    /// Thread kind. Defaults to the thread of the detected phase.
    #[arg(long, value_enum, requires = "number")]
    thread: Option<ThreadKind>,
    #[arg(long, requires = "thread")]
    number: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ThreadKind {
    Issue,
    Pr,
}

impl ThreadArgs {
    fn explicit(&self) -> Result<Option<ThreadRef>> {
        match (self.thread, self.number) {
            (Some(_), Some(0)) => bail!("--number must be a positive integer"),
            (Some(ThreadKind::Issue), Some(number)) => Ok(Some(ThreadRef::issue(number))),
            (Some(ThreadKind::Pr), Some(number)) => Ok(Some(ThreadRef::pull_request(number))),
            _ => Ok(None),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let violations = verify_step_order();
    if !violations.is_empty() {
        eprintln!("step order is inconsistent:\n- {}", violations.join("\n- "));
        std::process::exit(exit_codes::INVALID);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            if let Err(write_err) = print_json(&Response::error(format!("{err:#}"))) {
                error!(error = %format!("{write_err:#}"), "failed to write error response");
            }
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.workdir.join(CONFIG_FILE_NAME));

    match cli.command {
        Command::Init { force } => cmd_init(&config_path, cli.repo, force),
        command => run_workflow(command, &cli.workdir, cli.repo, &config_path),
    }
}

fn run_workflow(
    command: Command,
    workdir: &Path,
    repo: Option<String>,
    config_path: &Path,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let repo = repo.or_else(|| cfg.repo.clone());
    let platform = GhCli::new(workdir, repo, cfg.command_timeout());
    let git = Git::new(workdir).with_timeout(cfg.command_timeout());
    let formatter = TemplateFormatter::new().context("load response templates")?;
    let router = Router::new(
        StateStore::new(
            &platform,
            cfg.read_policy(),
            cfg.stale_read_threshold(),
            cfg.invalid_step_policy,
        ),
        RetryingPersister::new(cfg.persist_policy()),
        &formatter,
    );
    let external = || collect_snapshot(&git, &platform, &cfg.read_policy());
    let thread_for = |args: &ThreadArgs| -> Result<ThreadRef> {
        match args.explicit()? {
            Some(thread) => Ok(thread),
            None => Ok(default_thread(&external()?)?),
        }
    };

    match command {
        Command::State => {
            let current = router.current_state(&external()?)?;
            print_json(&current.report())?;
            Ok(exit_codes::OK)
        }
        Command::Next => emit(router.next(&external()?)?),
        Command::Complete {
            step,
            fixes_needed,
            note,
        } => emit(router.complete_step(
            &external()?,
            &step,
            fixes_needed,
            note.as_deref(),
        )?),
        Command::Evidence { token, target } => {
            emit(router.check_evidence(thread_for(&target)?, &token)?)
        }
        Command::Persist { state, target } => {
            emit(router.persist_state(thread_for(&target)?, &state)?)
        }
        Command::Lint { target } => {
            let thread = thread_for(&target)?;
            let comments = router
                .store()
                .fetch_comments(thread)
                .with_context(|| format!("fetch comments for {thread}"))?;
            let report = StateLinter::new()?.lint(&comments);
            let clean = report.is_clean();
            let text = format!("Lint of {thread}:\n{}", report.summary());
            print_json(&if clean {
                Response::ok(text)
            } else {
                Response::error(text)
            })?;
            Ok(if clean {
                exit_codes::OK
            } else {
                exit_codes::INVALID
            })
        }
        Command::Init { force } => cmd_init(config_path, cfg.repo.clone(), force),
    }
}

fn cmd_init(path: &Path, repo: Option<String>, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    let cfg = LoopConfig {
        repo,
        ..LoopConfig::default()
    };
    write_config(path, &cfg)?;
    print_json(&Response::ok(format!("Wrote {}", path.display())))?;
    Ok(exit_codes::OK)
}

fn emit(outcome: Outcome) -> Result<i32> {
    print_json(outcome.response())?;
    Ok(outcome.exit_code())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    write_json(io::stdout().lock(), value)
}

fn write_json<W: Write, T: Serialize>(mut out: W, value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize response")?;
    writeln!(out, "{payload}").context("write response to stdout")?;
    out.flush().context("flush stdout")
}

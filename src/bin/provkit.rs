// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use provkit::{
    action::{Action, ActionName, Context, Tracked, OPTIONS_END},
    clock::Clock,
    config::Settings,
    dispatch::Dispatcher,
    path::default_config_file,
    stage::{StagePolicy, Stager},
    state::StateRecord,
};

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use glob::Pattern;
use std::{ffi::OsString, path::PathBuf, process::exit};
use tracing::{error, warn, Level};
use tracing_subscriber::{fmt, fmt::writer::MakeWriterExt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  provkit [options] <provkit-command>\n  provkit [options] <action> [--force] [<action-args>]...",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "PROVKIT_CONFIG", value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        let settings = match &self.config {
            Some(path) => Settings::load(path)?,
            None => Settings::load_or_default(default_config_file()?)?,
        };

        match self.command {
            Command::List(opts) => run_list(&settings, opts),
            Command::Run(opts) => {
                // INVARIANT: Arguments after `--` are never read as help or force.
                let mut args = opts.args;
                if !args.is_empty() {
                    args.insert(0, OPTIONS_END.into());
                }
                run_action(&settings, &opts.action, &args, opts.force)
            }
            Command::Stage(opts) => run_stage(&settings, opts),
            Command::Status(opts) => run_status(&settings, opts),
            Command::Version => run_version(&settings),
            Command::Action(args) => run_shorthand(&settings, &args),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List staged actions.
    #[command(override_usage = "provkit list [options] [<pattern>]")]
    List(ListOptions),

    /// Run staged action.
    #[command(override_usage = "provkit run [options] <action> [-- <action-args>...]")]
    Run(RunOptions),

    /// Stage action catalog and dispatcher from a checkout.
    #[command(override_usage = "provkit stage [options]")]
    Stage(StageOptions),

    /// Show recorded outcome of actions.
    #[command(override_usage = "provkit status [options] [<action>]")]
    Status(StatusOptions),

    /// Show dispatcher and catalog version.
    Version,

    /// Run staged action directly by name.
    #[command(external_subcommand)]
    Action(Vec<OsString>),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Glob pattern to filter action names with.
    #[arg(value_name = "pattern")]
    pub pattern: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Name of action to run.
    #[arg(required = true, value_name = "action")]
    pub action: String,

    /// Run even if a prior run already succeeded.
    #[arg(short, long)]
    pub force: bool,

    /// Arguments forwarded to the action.
    #[arg(last = true, value_name = "action-args")]
    pub args: Vec<OsString>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StageOptions {
    /// Checkout to stage the catalog from.
    #[arg(short, long, default_value = ".", value_name = "checkout")]
    pub source: PathBuf,

    /// Keep staged actions that are gone from the checkout.
    #[arg(short, long)]
    pub keep_existing: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Show only this action.
    #[arg(value_name = "action")]
    pub action: Option<String>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr.with_max_level(Level::WARN).or_else(std::io::stdout));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match Cli::parse().run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

fn context(settings: &Settings) -> Result<Context> {
    let layout = settings.layout()?;
    let clock = Clock::new(settings.clock.timezone.clone());

    Ok(Context::new(layout, clock))
}

fn run_list(settings: &Settings, opts: ListOptions) -> Result<i32> {
    let ctx = context(settings)?;
    let pattern = opts.pattern.as_deref().map(Pattern::new).transpose()?;
    for name in Dispatcher::new(&ctx).list(pattern.as_ref())? {
        println!("{name}");
    }

    Ok(0)
}

fn run_action(settings: &Settings, action: &str, args: &[OsString], force: bool) -> Result<i32> {
    let ctx = context(settings)?;
    match Dispatcher::new(&ctx).run(action, args, force) {
        Ok(code) => Ok(code),
        Err(err) if err.wants_usage() => {
            error!("{err}");
            Cli::command().print_help()?;
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}

fn run_shorthand(settings: &Settings, args: &[OsString]) -> Result<i32> {
    let Some((action, args)) = args.split_first() else {
        return Err(anyhow!("no action given"));
    };
    let action = action.to_string_lossy();

    let ctx = context(settings)?;
    let dispatcher = Dispatcher::new(&ctx);
    dispatcher.catalog()?;
    if !dispatcher.is_known(&action) {
        error!("unknown action {action:?}");
        Cli::command().print_help()?;
        return Ok(1);
    }

    run_action(settings, &action, args, false)
}

fn run_stage(settings: &Settings, opts: StageOptions) -> Result<i32> {
    let ctx = context(settings)?;
    let policy = if opts.keep_existing {
        StagePolicy::Merge
    } else {
        StagePolicy::Resync
    };

    let mut stager = Stager::new(opts.source, ctx.layout().clone()).with_policy(policy);
    match std::env::current_exe() {
        Ok(exe) => stager = stager.with_dispatcher_exe(exe),
        Err(err) => warn!("cannot locate running dispatcher, not staging it: {err}"),
    }
    if settings.stage.register_path {
        stager = stager.with_profile(settings.profile()?);
    }

    // INVARIANT: Staging always re-syncs, a prior success never skips it.
    Ok(Tracked::new(stager, &ctx).run(&[], true))
}

fn run_status(settings: &Settings, opts: StatusOptions) -> Result<i32> {
    let ctx = context(settings)?;
    let records = match opts.action {
        Some(action) => {
            let name = ActionName::new(action)?;
            match ctx.states().read(&name)? {
                Some(record) => vec![record],
                None => {
                    error!("no recorded run of {name}");
                    return Ok(1);
                }
            }
        }
        None => ctx.states().records()?,
    };

    for record in &records {
        println!("{}", status_line(record));
    }

    Ok(0)
}

fn status_line(record: &StateRecord) -> String {
    format!(
        "{:<24} {:<8} rc={:<4} {} {}@{} {}",
        record.action,
        record.status.to_string(),
        record.rc,
        record.finished_at.format("%Y-%m-%d %H:%M:%S %:z"),
        record.user,
        record.host,
        record.version
    )
}

fn run_version(settings: &Settings) -> Result<i32> {
    let ctx = context(settings)?;
    println!("provkit {}", env!("CARGO_PKG_VERSION"));
    println!("catalog {}", Dispatcher::new(&ctx).version());

    Ok(0)
}

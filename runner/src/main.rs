//! Acceptance-test run orchestrator.
//!
//! Reads a TOML run file describing hosts, setup actions and test suites, then
//! provisions the hosts, runs setup, pre-suite, acceptance and post-suite, and
//! tears the hosts down according to the configured failure mode.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use acceptance_runner::core::error::render_chain;
use acceptance_runner::core::options::{OptionOverrides, RunOptions, apply_overrides};
use acceptance_runner::core::types::{FailureMode, SuiteKind};
use acceptance_runner::exit_codes;
use acceptance_runner::interrupt::CancelToken;
use acceptance_runner::io::config::{RunFile, base_dir, load_run_file, resolve_path};
use acceptance_runner::io::fleet::{CommandFleet, HostFleet, Hosts};
use acceptance_runner::io::report::{RunReport, write_report};
use acceptance_runner::io::setup::command_actions;
use acceptance_runner::io::suite::CommandSuiteRunner;
use acceptance_runner::logging;
use acceptance_runner::orchestrator::RunOrchestrator;
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "acceptance", version, about = "Acceptance-test run orchestrator")]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision hosts, run every phase, then clean up.
    Run(RunArgs),
    /// Print the resolved setup actions and test order without running anything.
    Plan(RunArgs),
    /// Load and validate a run file.
    Validate {
        /// Run file (TOML).
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Run file (TOML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// `stop` leaves hosts in place after a failure; anything else continues.
    #[arg(long, value_name = "MODE")]
    fail_mode: Option<String>,

    /// Provision and set up hosts, skip the acceptance suite.
    #[arg(long)]
    install_only: bool,

    /// Shuffle the acceptance tests.
    #[arg(long = "random")]
    randomize: bool,

    /// Seed for `--random`.
    #[arg(long)]
    seed: Option<u64>,

    /// Acceptance tests to run instead of the run file's.
    #[arg(long, value_delimiter = ',', value_name = "PATH")]
    tests: Option<Vec<String>>,

    /// Pre-suite tests to run instead of the run file's.
    #[arg(long, value_delimiter = ',', value_name = "PATH")]
    pre_suite: Option<Vec<String>>,

    /// Post-suite tests to run instead of the run file's.
    #[arg(long, value_delimiter = ',', value_name = "PATH")]
    post_suite: Option<Vec<String>>,

    /// Enable a declared setup action (repeatable).
    #[arg(long, value_name = "KEY")]
    enable: Vec<String>,

    /// Disable a declared setup action (repeatable).
    #[arg(long, value_name = "KEY")]
    disable: Vec<String>,

    /// Write the JSON run report here.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Directory for per-command logs.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> OptionOverrides {
        OptionOverrides {
            fail_mode: self.fail_mode.as_deref().map(FailureMode::from),
            install_only: self.install_only,
            randomize: self.randomize,
            seed: self.seed,
            pre_suite: self.pre_suite.clone(),
            tests: self.tests.clone(),
            post_suite: self.post_suite.clone(),
            enable: self.enable.clone(),
            disable: self.disable.clone(),
        }
    }
}

/// Everything a run needs once the run file and overrides are merged.
struct Prepared {
    file: RunFile,
    options: RunOptions,
    base_dir: PathBuf,
    log_dir: PathBuf,
    report_path: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Plan(args) => cmd_plan(&args),
        Command::Validate { config } => cmd_validate(config.as_deref()),
    }
}

fn require_config(config: Option<&Path>) -> Result<&Path> {
    config.ok_or_else(|| anyhow!("no run file given (use --config <FILE>)"))
}

fn prepare(args: &RunArgs) -> Result<Prepared> {
    let config = require_config(args.config.as_deref())?;
    let file = load_run_file(config)?;
    let options = apply_overrides(file.run_options(), &args.overrides(), &file.setup_keys())?;
    let base_dir = base_dir(config);
    let base_dir = base_dir
        .canonicalize()
        .with_context(|| format!("resolve {}", base_dir.display()))?;

    // Paths from the run file are relative to it; paths from the CLI to the cwd.
    let log_dir = match &args.log_dir {
        Some(dir) => dir.clone(),
        None => resolve_path(&base_dir, &file.log_dir),
    };
    let report_path = match (&args.report, &file.report_path) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(path)) => Some(resolve_path(&base_dir, path)),
        (None, None) => None,
    };

    Ok(Prepared {
        file,
        options,
        base_dir,
        log_dir,
        report_path,
    })
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let Prepared {
        file,
        options,
        base_dir,
        log_dir,
        report_path,
    } = prepare(args)?;

    let token = CancelToken::new();
    let fleet = CommandFleet::new(
        file.hosts(),
        base_dir.clone(),
        log_dir.clone(),
        file.execution.fleet_limits(),
    )
    .with_provision_command(file.fleet.provision_command.clone())
    .with_cleanup_command(file.fleet.cleanup_command.clone());

    let started_at = Utc::now();
    let hosts = match fleet.provision() {
        Ok(hosts) => hosts,
        Err(err) => {
            if !options.fail_mode.is_stop()
                && let Err(cleanup_err) = fleet.cleanup()
            {
                warn!(err = %format!("{cleanup_err:#}"), "cleanup after failed provisioning failed");
            }
            return Err(err.context("provision hosts"));
        }
    };
    info!(hosts = %hosts.names().join(","), "hosts provisioned");

    let setup = command_actions(
        &file.setup,
        &hosts,
        &base_dir,
        &log_dir,
        file.execution.setup_limits(),
    );
    let suites = CommandSuiteRunner::new(
        base_dir.clone(),
        log_dir.clone(),
        file.execution.test_limits(),
        token.clone(),
    );
    let fail_mode = options.fail_mode;
    let result = RunOrchestrator::new(options, setup, &hosts, &suites, &fleet)
        .with_interrupts(file.interrupt.policy(), token)
        .execute();
    let finished_at = Utc::now();

    if let Some(path) = &report_path {
        let report = RunReport::new(&result, fail_mode, started_at, finished_at);
        match write_report(path, &report) {
            Ok(()) => info!(path = %path.display(), "wrote run report"),
            Err(err) => warn!(err = %format!("{err:#}"), "failed to write run report"),
        }
    }

    match result {
        Ok(_) => {
            println!("ok");
            Ok(exit_codes::OK)
        }
        Err(failure) => {
            eprintln!("{}", render_chain(&failure));
            eprintln!("logs: {}", log_dir.display());
            if failure.cause.is_interrupted() {
                Ok(exit_codes::INTERRUPTED)
            } else {
                Ok(exit_codes::RUN_FAILED)
            }
        }
    }
}

fn cmd_plan(args: &RunArgs) -> Result<i32> {
    let prepared = prepare(args)?;
    let suites = CommandSuiteRunner::new(
        prepared.base_dir.clone(),
        prepared.log_dir.clone(),
        prepared.file.execution.test_limits(),
        CancelToken::new(),
    );
    print!("{}", render_plan(&prepared, &suites)?);
    Ok(exit_codes::OK)
}

fn render_plan(prepared: &Prepared, suites: &CommandSuiteRunner) -> Result<String> {
    let options = &prepared.options;
    let mut out = String::new();
    writeln!(out, "fail mode: {}", options.fail_mode)?;
    writeln!(out, "hosts: {}", describe_hosts(&prepared.file.hosts()))?;

    writeln!(out, "setup:")?;
    for entry in &prepared.file.setup {
        let mark = if options.setup_enabled(&entry.key, entry.default_enabled) {
            "x"
        } else {
            " "
        };
        writeln!(out, "  [{mark}] {}: {}", entry.key, entry.description)?;
    }

    for kind in [SuiteKind::PreSuite, SuiteKind::Acceptance, SuiteKind::PostSuite] {
        if kind == SuiteKind::Acceptance && options.install_only {
            writeln!(out, "{}: skipped (install only)", kind.name())?;
            continue;
        }
        let view = options.suite_view(kind);
        let tests = suites
            .plan(&view)
            .with_context(|| format!("plan suite '{}'", kind.name()))?;
        match (view.randomize, view.seed) {
            (true, Some(seed)) => writeln!(out, "{}: (randomized, seed {seed})", kind.name())?,
            (true, None) => writeln!(out, "{}: (randomized, seed drawn at run time)", kind.name())?,
            (false, _) => writeln!(out, "{}:", kind.name())?,
        }
        for test in tests {
            let shown = test.strip_prefix(&prepared.base_dir).unwrap_or(test.as_path());
            writeln!(out, "  {}", shown.display())?;
        }
    }
    Ok(out)
}

fn describe_hosts(hosts: &Hosts) -> String {
    hosts
        .iter()
        .map(|host| {
            if host.roles.is_empty() {
                host.name.clone()
            } else {
                format!("{} ({})", host.name, host.roles.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn cmd_validate(config: Option<&Path>) -> Result<i32> {
    let config = require_config(config)?;
    let file = load_run_file(config)?;
    println!(
        "ok: {} hosts, {} setup actions",
        file.hosts.len(),
        file.setup.len()
    );
    Ok(exit_codes::OK)
}

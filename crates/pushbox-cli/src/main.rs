//! Pushbox CLI: sandboxed end-to-end suites for remote deployment tools.
//!
//! Command-line interface for running, setting up and cleaning up suites.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use pushbox::model::{RunStatus, ScenarioTarget, SuiteConfig, SuiteReport};
use pushbox::suite::{load_suite_file, validate_suite};
use pushbox::{ErrorCode, HarnessError, HarnessResult, ProcessRunner, RunOptions, Suite};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod progress;

/// Exit code for an interrupted run.
const EXIT_INTERRUPTED: i32 = 130;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "pushbox",
    version,
    about = "Sandboxed end-to-end suites for remote deployment tools"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct SuiteArg {
    /// Suite file (YAML or JSON); the built-in suite when omitted
    #[arg(long, env = "PUSHBOX_SUITE")]
    suite: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    suite: SuiteArg,
    #[arg(long, help = "Print the suite report as JSON on stdout")]
    json: bool,
    #[arg(long, short = 'v', help = "Show scenario progress on stderr")]
    verbose: bool,
    #[arg(
        long,
        value_name = "NAME",
        help = "Run only this scenario (repeatable; suite order is kept)"
    )]
    only: Vec<String>,
    #[arg(long, help = "Reuse artifacts, keys and images from an earlier setup")]
    skip_setup: bool,
    #[arg(long, value_name = "PATH", help = "Also write the JSON report here")]
    report: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Set up, run every selected scenario, then clean up
    Run(RunArgs),
    /// Build artifacts, key material and images without running scenarios
    Setup {
        #[command(flatten)]
        suite: SuiteArg,
        #[arg(long)]
        json: bool,
        #[arg(long, short = 'v', help = "Show setup phases on stderr")]
        verbose: bool,
    },
    /// Remove every sandbox left behind by earlier runs
    Cleanup {
        #[command(flatten)]
        suite: SuiteArg,
        #[arg(long)]
        json: bool,
    },
    /// List the suite's scenarios
    List {
        #[command(flatten)]
        suite: SuiteArg,
        #[arg(long)]
        json: bool,
    },
    /// Check a suite file without touching the container runtime
    Validate {
        #[command(flatten)]
        suite: SuiteArg,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment.
/// Returns whether color is in use.
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                // Diagnostics and logs go to stderr
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

/// Logs go to stderr so `--json` stdout stays machine readable.
fn init_tracing(debug: bool, ansi: bool) {
    let default = if debug { "pushbox=debug" } else { "pushbox=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(ansi)
                .with_writer(io::stderr),
        )
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let use_color = configure_colors(cli.color);
    init_tracing(cli.debug, use_color);
    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Setup {
            suite,
            json,
            verbose,
        } => cmd_setup(&suite, json, verbose).await,
        Commands::Cleanup { suite, json } => cmd_cleanup(&suite, json).await,
        Commands::List { suite, json } => cmd_list(&suite, json),
        Commands::Validate { suite, json } => cmd_validate(&suite, json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

/// Load the suite named by `--suite`, or the built-in one.
fn load_config(arg: &SuiteArg) -> HarnessResult<SuiteConfig> {
    tracing::debug!(suite = ?arg.suite, "loading suite");
    match &arg.suite {
        Some(path) => load_suite_file(path),
        None => Ok(SuiteConfig::default()),
    }
}

/// Load and validate, then wire the real process runner.
fn open_suite(arg: &SuiteArg) -> HarnessResult<Suite<ProcessRunner>> {
    Suite::new(load_config(arg)?, ProcessRunner)
}

/// Stop the suite before its next scenario on Ctrl-C; cleanup still runs.
fn install_interrupt() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .into_diagnostic()?;
    Ok(flag)
}

/// Handle the run command.
async fn cmd_run(args: RunArgs) -> Result<()> {
    let suite = match open_suite(&args.suite) {
        Ok(suite) => suite,
        Err(err) => return emit_error(args.json, &err),
    };
    let mut suite = suite.with_interrupt(install_interrupt()?);
    if args.verbose {
        suite = suite.with_progress(Box::new(progress::VerboseProgress::new()));
    }

    let options = RunOptions {
        skip_setup: args.skip_setup,
        only: args.only,
    };
    let report = suite.run(&options).await;

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    emit_report(args.json, &report)
}

fn write_report(path: &Path, report: &SuiteReport) -> Result<()> {
    let payload = serde_json::to_vec_pretty(report).into_diagnostic()?;
    std::fs::write(path, payload).into_diagnostic()?;
    Ok(())
}

/// Handle the setup command.
async fn cmd_setup(arg: &SuiteArg, json: bool, verbose: bool) -> Result<()> {
    let suite = match open_suite(arg) {
        Ok(suite) => suite,
        Err(err) => return emit_error(json, &err),
    };
    let mut suite = suite.with_interrupt(install_interrupt()?);
    if verbose {
        suite = suite.with_progress(Box::new(progress::VerboseProgress::new()));
    }
    match suite.setup().await {
        Ok(report) => {
            if json {
                let payload = serde_json::to_string(&report).into_diagnostic()?;
                println!("{payload}");
            } else {
                let cached = report.artifacts.iter().filter(|a| a.cached).count();
                eprintln!(
                    "setup complete: {} artifacts ({cached} cached), {} images, key {}",
                    report.artifacts.len(),
                    report.images.len(),
                    if report.key_generated { "generated" } else { "reused" }
                );
            }
            Ok(())
        }
        Err(err) => emit_error(json, &err),
    }
}

/// Handle the cleanup command.
async fn cmd_cleanup(arg: &SuiteArg, json: bool) -> Result<()> {
    let suite = match open_suite(arg) {
        Ok(suite) => suite,
        Err(err) => return emit_error(json, &err),
    };
    let report = suite.cleanup().await;
    if json {
        let payload = serde_json::to_string(&report).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("removed {} of {} sandboxes", report.removed, report.found);
        for name in &report.failed {
            eprintln!("  could not remove {name}");
        }
    }
    Ok(())
}

/// Handle the list command.
fn cmd_list(arg: &SuiteArg, json: bool) -> Result<()> {
    let config = match load_config(arg) {
        Ok(config) => config,
        Err(err) => return emit_error(json, &err),
    };
    if json {
        let payload = serde_json::to_string(&config.scenarios).into_diagnostic()?;
        println!("{payload}");
        return Ok(());
    }
    for scenario in &config.scenarios {
        let target = match &scenario.target {
            ScenarioTarget::Sandbox { image, sandbox } => format!("{sandbox} ({image})"),
            ScenarioTarget::Direct { destination } => format!("direct {destination}"),
        };
        println!("{:<24} {target:<48} {}", scenario.name, scenario.expect);
    }
    Ok(())
}

/// Handle the validate command.
fn cmd_validate(arg: &SuiteArg, json: bool) -> Result<()> {
    let config = match load_config(arg).and_then(|config| {
        validate_suite(&config)?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(err) => return emit_error(json, &err),
    };
    if json {
        let payload = serde_json::json!({
            "valid": true,
            "suite": config.name,
            "scenarios": config.scenarios.len(),
            "images": config.images.len(),
        });
        println!("{payload}");
    } else {
        eprintln!(
            "suite '{}' is valid: {} scenarios, {} images",
            config.name,
            config.scenarios.len(),
            config.images.len()
        );
    }
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

fn emit_report(json: bool, report: &SuiteReport) -> Result<()> {
    if json {
        let payload = serde_json::to_string(report).into_diagnostic()?;
        println!("{payload}");
    } else {
        render_report(report);
    }
    match exit_code_for_report(report) {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

/// Human summary on stderr; failures carry the expected pattern and the
/// captured output.
fn render_report(report: &SuiteReport) {
    for scenario in &report.scenarios {
        if scenario.passed() {
            eprintln!("PASS {}", scenario.name);
        } else {
            eprintln!("FAIL {} (expected {})", scenario.name, scenario.expected);
            if let Some(err) = &scenario.error {
                for line in err.message.lines() {
                    eprintln!("    {line}");
                }
            }
        }
    }
    if let Some(cleanup) = &report.cleanup {
        if !cleanup.failed.is_empty() {
            eprintln!("cleanup could not remove: {}", cleanup.failed.join(", "));
        }
    }
    if let Some(err) = &report.error {
        eprintln!("error: {}: {}", err.code, err.message);
    }
    let passed = report.scenarios.iter().filter(|s| s.passed()).count();
    eprintln!(
        "suite {} {:?}: {passed}/{} scenarios passed",
        report.suite,
        report.status,
        report.scenarios.len()
    );
}

fn exit_code_for_report(report: &SuiteReport) -> i32 {
    match report.status {
        RunStatus::Passed => 0,
        RunStatus::Failed => 1,
        RunStatus::Canceled => EXIT_INTERRUPTED,
        RunStatus::Errored => report
            .error
            .as_ref()
            .and_then(|err| ErrorCode::parse(&err.code))
            .map_or(1, ErrorCode::exit_code),
    }
}

fn emit_error(json: bool, err: &HarnessError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("error: {err}");
        if let Some(context) = &err.context {
            eprintln!("  {context}");
        }
    }
    std::process::exit(err.exit_code());
}

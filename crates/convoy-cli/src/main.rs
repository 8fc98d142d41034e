use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use convoy::config::{self, Config};
use convoy::engine::Reporter;
use convoy::types::{
    ChangeOrigin, PublishOptions, PublishingPlan, PublishingResult, RangeStrategy,
    WorkspaceAnalysis,
};

#[derive(Parser, Debug)]
#[command(name = "convoy", version)]
#[command(about = "Coordinated release waves across sibling package repositories")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "convoy.toml")]
    config: PathBuf,

    /// Output format for reports.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Exact,
    Caret,
    Tilde,
}

impl From<StrategyArg> for RangeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Exact => RangeStrategy::Exact,
            StrategyArg::Caret => RangeStrategy::Caret,
            StrategyArg::Tilde => RangeStrategy::Tilde,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect the dependency graph: packages, order, classified cycles.
    Analyze,
    /// Compute and print the publishing plan without executing it.
    Plan,
    /// Execute the publishing plan (resumes automatically when matching
    /// state exists).
    Publish(PublishArgs),
}

#[derive(clap::Args, Debug)]
struct PublishArgs {
    /// Report the wave without performing any side effects.
    #[arg(long)]
    dry_run: bool,

    /// Require a state file from an interrupted wave and continue it.
    #[arg(long)]
    resume: bool,

    /// Keep going after a package fails.
    #[arg(long)]
    continue_on_error: bool,

    /// Skip the build step and the pre-flight build check.
    #[arg(long)]
    skip_build: bool,

    /// Prefix for rewritten ranges that carry none.
    #[arg(long, value_enum)]
    range_strategy: Option<StrategyArg>,

    /// Prefix used when pinning wildcard ranges.
    #[arg(long, value_enum)]
    wildcard_strategy: Option<StrategyArg>,

    /// First delay between registry availability polls (e.g. 1s, 500ms).
    #[arg(long)]
    initial_delay: Option<String>,

    /// Cap for the growing poll delay (e.g. 1m).
    #[arg(long)]
    max_delay: Option<String>,

    /// Total time to wait for registry propagation per package (e.g. 5m).
    #[arg(long)]
    timeout: Option<String>,

    /// Poll attempt budget per package.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-package build deadline (e.g. 10m).
    #[arg(long)]
    build_timeout: Option<String>,

    /// Per-package publish deadline (e.g. 10m).
    #[arg(long)]
    publish_timeout: Option<String>,

    /// State directory; relative paths resolve against the project.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[error] {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::load_config(&cli.config)?;

    match cli.cmd {
        Commands::Analyze => {
            let analysis = convoy::analyze(&config)?;
            match cli.format {
                Format::Json => print_json(&analysis)?,
                Format::Text => print_analysis(&analysis),
            }
            Ok(exit_for(analysis.errors.is_empty()))
        }
        Commands::Plan => {
            let plan = convoy::plan(&config)?;
            match cli.format {
                Format::Json => print_json(&plan)?,
                Format::Text => print_plan(&plan),
            }
            Ok(exit_for(plan.errors.is_empty()))
        }
        Commands::Publish(args) => {
            let opts = publish_options(&config, &args)?;
            let result = convoy::publish(&config, &opts, &mut CliReporter)?;
            match cli.format {
                Format::Json => print_json(&result)?,
                Format::Text => print_result(&result),
            }
            Ok(exit_for(result.ok()))
        }
    }
}

fn exit_for(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn publish_options(config: &Config, args: &PublishArgs) -> Result<PublishOptions> {
    let mut opts = config.publish_options();

    opts.dry_run = args.dry_run;
    opts.resume = args.resume;
    opts.continue_on_error |= args.continue_on_error;
    if args.skip_build {
        opts.skip_build = true;
        opts.preflight.check_build = false;
    }
    if let Some(strategy) = args.range_strategy {
        opts.range_strategy = strategy.into();
    }
    if let Some(strategy) = args.wildcard_strategy {
        opts.wildcard_strategy = strategy.into();
    }
    if let Some(raw) = &args.initial_delay {
        opts.monitor.initial_delay = parse_duration(raw)?;
    }
    if let Some(raw) = &args.max_delay {
        opts.monitor.max_delay = parse_duration(raw)?;
    }
    if let Some(raw) = &args.timeout {
        opts.monitor.timeout = parse_duration(raw)?;
    }
    if let Some(max_attempts) = args.max_attempts {
        opts.monitor.max_attempts = max_attempts;
    }
    if let Some(raw) = &args.build_timeout {
        opts.build_timeout = parse_duration(raw)?;
        opts.preflight.build_timeout = opts.build_timeout;
    }
    if let Some(raw) = &args.publish_timeout {
        opts.publish_timeout = parse_duration(raw)?;
    }
    if let Some(state_dir) = &args.state_dir {
        opts.state_dir = state_dir.clone();
    }

    Ok(opts)
}

fn parse_duration(raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw).with_context(|| format!("invalid duration: {raw}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_analysis(analysis: &WorkspaceAnalysis) {
    println!("Packages:");
    for pkg in &analysis.packages {
        println!(
            "  {} {} ({}{} dependencies, {} dependents{})",
            pkg.name,
            pkg.version,
            if pkg.publishable { "" } else { "private, " },
            pkg.dependency_count,
            pkg.dependent_count,
            if pkg.has_changesets {
                ", changesets pending"
            } else {
                ""
            }
        );
    }

    if !analysis.publishing_order.is_empty() {
        println!("\nPublishing order:");
        for (i, name) in analysis.publishing_order.iter().enumerate() {
            println!("  {}. {name}", i + 1);
        }
    }

    for cycle in &analysis.production_cycles {
        println!("\nProduction cycle: {}", cycle.join(" -> "));
    }
    for cycle in &analysis.development_cycles {
        println!("\nDevelopment cycle: {}", cycle.join(" -> "));
    }

    print_diagnostics(&analysis.warnings, &[]);
    for error in &analysis.errors {
        println!("error[{}]: {}", error.kind.as_str(), error.message);
    }
}

fn print_plan(plan: &PublishingPlan) {
    if plan.publishing_order.is_empty() {
        println!("No publishable order (see errors below).");
    } else {
        println!("Publishing order:");
        for (i, name) in plan.publishing_order.iter().enumerate() {
            println!("  {}. {name}", i + 1);
        }
    }

    if !plan.version_changes.is_empty() {
        println!("\nVersion changes:");
        for (name, change) in &plan.version_changes {
            let origin = match &change.origin {
                ChangeOrigin::Explicit => "changesets".to_string(),
                ChangeOrigin::Auto => "auto-changeset".to_string(),
                ChangeOrigin::Escalated {
                    existing_bump,
                    required_bump,
                } => format!("escalated {existing_bump} -> {required_bump}"),
            };
            println!(
                "  {name}: {} -> {} ({}{}; {origin})",
                change.from,
                change.to,
                change.bump_type,
                if change.breaking { ", breaking" } else { "" }
            );
        }
    }

    if !plan.dependency_updates.is_empty() {
        println!("\nDependency updates:");
        for (dependent, rows) in &plan.dependency_updates {
            for row in rows {
                println!(
                    "  {dependent}: {} -> {} ({:?}{})",
                    row.dependency,
                    row.new_version,
                    row.kind,
                    if row.causes_republish {
                        ", republishes"
                    } else {
                        ""
                    }
                );
            }
        }
    }

    if !plan.breaking_cascades.is_empty() {
        println!("\nBreaking cascades:");
        for (name, dependents) in &plan.breaking_cascades {
            println!("  {name} -> {}", dependents.join(", "));
        }
    }

    print_diagnostics(&plan.warnings, &plan.info);
    for error in &plan.errors {
        println!("error[{}]: {}", error.kind.as_str(), error.message);
    }
}

fn print_result(result: &PublishingResult) {
    if !result.preflight.ok {
        println!("Pre-flight failed:");
        for error in &result.preflight.errors {
            println!("  {error}");
        }
        return;
    }

    if result.dry_run {
        println!("Dry run; nothing was published.\n");
    }

    if result.published.is_empty() {
        println!("Nothing published.");
    } else {
        println!("Published:");
        for pkg in &result.published {
            println!("  {}@{}", pkg.name, pkg.version);
        }
    }

    if !result.skipped.is_empty() {
        println!("\nSkipped:");
        for skip in &result.skipped {
            println!("  {} ({})", skip.name, skip.reason);
        }
    }

    if !result.failed.is_empty() {
        println!("\nFailed:");
        for failure in &result.failed {
            println!(
                "  {}: {}: {}",
                failure.name,
                failure.kind.as_str(),
                failure.message
            );
        }
    }

    print_diagnostics(&result.warnings, &[]);
}

fn print_diagnostics(warnings: &[String], info: &[String]) {
    if !warnings.is_empty() {
        println!();
        for warning in warnings {
            println!("warning: {warning}");
        }
    }
    if !info.is_empty() {
        println!();
        for line in info {
            println!("info: {line}");
        }
    }
}

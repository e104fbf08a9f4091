use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use archivebot_core::archive::{
    RunOptions, RunReport, check_page, reset_checkpoint, run_archival, show_checkpoint,
};
use archivebot_core::config::{BotConfig, load_config};
use archivebot_core::eligibility::Eligibility;
use clap::{Args, CommandFactory, Parser, Subcommand};

const DEFAULT_CONFIG_FILENAME: &str = "archivebot.toml";

#[derive(Debug, Parser)]
#[command(
    name = "archivebot",
    version,
    about = "Archives wiki pages flagged for archival once their markers age out"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Run(RunArgs),
    Check(CheckArgs),
    Checkpoint(CheckpointArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Report what would be archived without writing")]
    dry_run: bool,
    #[arg(long, help = "Walk the category from the start, ignoring the checkpoint")]
    full: bool,
    #[arg(long, value_name = "N", help = "Stop after scanning N pages")]
    limit: Option<usize>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    title: String,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckpointArgs {
    #[command(subcommand)]
    command: CheckpointSubcommand,
}

#[derive(Debug, Subcommand)]
enum CheckpointSubcommand {
    Show,
    Reset,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_bot_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Run(args)) => run_archive(&config, args),
        Some(Commands::Check(args)) => run_check(&config, args),
        Some(Commands::Checkpoint(CheckpointArgs { command })) => match command {
            CheckpointSubcommand::Show => run_checkpoint_show(&config),
            CheckpointSubcommand::Reset => run_checkpoint_reset(&config),
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn load_bot_config(path: Option<&Path>) -> Result<BotConfig> {
    match path {
        Some(path) => load_config(path),
        None => load_config(Path::new(DEFAULT_CONFIG_FILENAME)),
    }
}

fn run_archive(config: &BotConfig, args: RunArgs) -> Result<()> {
    let options = RunOptions {
        dry_run: args.dry_run,
        full: args.full,
        limit: args.limit,
    };
    let report = run_archival(config, &options)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }
    if !report.success {
        bail!(
            "archival run finished with {} failed pages",
            report.errors.len()
        );
    }
    Ok(())
}

fn print_run_report(report: &RunReport) {
    println!("archival run");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("batches: {}", report.batches);
    println!("scanned: {}", report.scanned);
    println!("eligible: {}", report.eligible);
    println!("archived: {}", report.archived);
    println!("moved: {}", report.moved);
    println!("skipped: {}", report.skipped);
    println!("move_failures: {}", report.move_failures);
    println!("request_count: {}", report.request_count);
    match &report.checkpoint {
        Some(checkpoint) => println!("checkpoint: {}", checkpoint.title),
        None => println!("checkpoint: <none>"),
    }
    if !report.pages.is_empty() {
        println!("pages:");
        for page in &report.pages {
            match &page.detail {
                Some(detail) => println!("  - {} [{}] {detail}", page.title, page.action),
                None => println!("  - {} [{}]", page.title, page.action),
            }
        }
    }
    if !report.errors.is_empty() {
        println!("errors:");
        for error in &report.errors {
            println!("  - {error}");
        }
    }
    println!("success: {}", format_flag(report.success));
}

fn run_check(config: &BotConfig, args: CheckArgs) -> Result<()> {
    let report = check_page(config, &args.title)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("archive check");
    println!("title: {}", report.title);
    println!("cutoff: {}", report.cutoff);
    println!(
        "eligible: {}",
        format_flag(report.eligibility == Eligibility::Eligible)
    );
    println!("markers: {}", report.markers.len());
    for marker in &report.markers {
        println!(
            "  - date: {} old_enough: {} args: {}",
            marker.date.as_deref().unwrap_or("<unparsed>"),
            format_flag(marker.old_enough),
            marker.args
        );
    }
    Ok(())
}

fn run_checkpoint_show(config: &BotConfig) -> Result<()> {
    let checkpoint = show_checkpoint(config)?;
    println!("archive checkpoint");
    println!("page: {}", config.checkpoint_page());
    match checkpoint {
        Some(checkpoint) => {
            println!("title: {}", checkpoint.title);
            println!("user: {}", checkpoint.user);
            println!("time: {}", checkpoint.time);
        }
        None => println!("checkpoint: <none>"),
    }
    Ok(())
}

fn run_checkpoint_reset(config: &BotConfig) -> Result<()> {
    reset_checkpoint(config)?;
    println!("archive checkpoint");
    println!("page: {}", config.checkpoint_page());
    println!("reset: yes");
    Ok(())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

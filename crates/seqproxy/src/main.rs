//! seqproxy CLI
//!
//! Usage:
//!   seqproxy <PLAN> [--tport <PORT>] [--check [--output json]] [-v]
//!
//! `PLAN` is a JSON test plan file, or `-` to read it from stdin. Exits 0
//! only when every assertion in the plan was consumed.

use anyhow::Context;
use clap::Parser;
use seqproxy::config::{PlanReport, TestPlan};
use seqproxy::Harness;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Sequential HTTP contract-test harness
#[derive(Parser, Debug)]
#[command(name = "seqproxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON test plan, or `-` for stdin
    plan: String,

    /// Port of the target server (overrides the plan's TargetPort)
    #[arg(short = 't', long = "tport", visible_alias = "target-port")]
    target_port: Option<u16>,

    /// Check the plan for mistakes and exit without running it
    #[arg(long)]
    check: bool,

    /// Output format for --check: text (default), json
    #[arg(short, long, default_value = "text")]
    output: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut plan = TestPlan::load(&args.plan).context("must specify a valid test plan")?;
    if let Some(port) = args.target_port {
        plan = plan.with_target_port(port);
    }

    let report = PlanReport::new(&plan);
    if args.check {
        if args.output == "json" {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            for issue in &report.issues {
                println!("{issue}");
            }
            if report.errors == 0 {
                println!("plan OK: {} assertions", plan.len());
            }
        }
        if report.errors > 0 {
            anyhow::bail!("plan has {} error(s)", report.errors);
        }
        return Ok(());
    }

    for issue in &report.issues {
        warn!("{}", issue);
    }

    Harness::new(plan).run().await?;
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use agent_core::{ChecklistStore, FileChecklist, HttpOracle, Oracle};
use anyhow::{bail, Context, Result};
use clap::Args;
use qapilot::replay::{replay, ReplayOptions, ReplayReport, Scenario};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Scenario file (YAML)
    pub scenario: PathBuf,

    /// Override the scenario's step budget
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Override the scenario's consecutive-failure budget
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Print the replay report as JSON
    #[arg(long)]
    pub json: bool,

    /// Ask the configured HTTP oracle instead of the scripted decisions
    #[arg(long)]
    pub live_oracle: bool,

    /// Checklist file; defaults to `checklist_path` from the configuration
    #[arg(long, value_name = "FILE")]
    pub checklist: Option<PathBuf>,
}

pub async fn cmd_replay(args: ReplayArgs, ctx: &CliContext) -> Result<()> {
    let scenario = Scenario::load(&args.scenario)
        .await
        .with_context(|| format!("loading {}", args.scenario.display()))?;
    let config = ctx.config();

    let oracle: Option<Arc<dyn Oracle>> = if args.live_oracle {
        info!(endpoint = %config.oracle.endpoint, "Using live oracle");
        Some(Arc::new(HttpOracle::new(
            config.oracle.clone(),
            config.agent.enable_vision,
        )?))
    } else {
        None
    };
    let checklist: Option<Arc<dyn ChecklistStore>> = args
        .checklist
        .clone()
        .or_else(|| config.checklist_path.clone())
        .map(|path| Arc::new(FileChecklist::new(path)) as Arc<dyn ChecklistStore>);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling run");
            signal.cancel();
        }
    });

    let options = ReplayOptions {
        max_steps: args.max_steps,
        max_failures: args.max_failures,
        oracle,
        checklist,
        cancel: Some(cancel),
    };
    let report = replay(&scenario, &config.agent, options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.unused_decisions > 0 {
        warn!(
            unused = report.unused_decisions,
            "Scenario has decisions the run never asked for"
        );
    }
    if !report.passed() {
        bail!(
            "scenario {} did not match its expectations: {}",
            report.scenario,
            report.mismatches.join("; ")
        );
    }
    Ok(())
}

fn print_report(report: &ReplayReport) {
    let outcome = &report.outcome;
    println!("Scenario: {}", report.scenario);
    println!(
        "Outcome:  {} (completed={}, success={}, steps={})",
        outcome.termination().describe(),
        outcome.completed,
        outcome.success,
        outcome.step_count
    );
    println!("Summary:  {}", outcome.report.summary);
    println!("Final URL: {}", outcome.report.final_url);
    if let Some(error) = &outcome.error {
        println!("Error:    {error}");
    }
    println!("Steps:");
    for step in &outcome.report.steps {
        let verdict = step.verdict.map(|v| v.as_str()).unwrap_or("-");
        println!(
            "  {:>3}  {:<7} {:<8} {:<12} {}",
            step.step,
            format!("{:?}", step.phase).to_lowercase(),
            format!("{:?}", step.class).to_lowercase(),
            verdict,
            step.summary
        );
    }
    println!(
        "Elapsed:  {} ms (started {})",
        outcome.report.elapsed_ms,
        outcome.report.started_at.to_rfc3339()
    );
    if report.passed() {
        println!("Expectations: met");
    } else {
        println!("Expectations: NOT met");
        for mismatch in &report.mismatches {
            println!("  - {mismatch}");
        }
    }
}

//! Convoy CLI - deployment orchestrator
//!
//! Usage: convoy <COMMAND>
//!
//! Commands:
//!   deploy    Roll a release out to the targeted hosts
//!   rollback  Roll one host back to its last-known-good release
//!   status    Show recorded release state per host

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use convoy::config::Config;
use convoy::error::ConvoyError;
use convoy::events::{ConsoleEventSink, EventSink, JsonEventSink};
use convoy::executor::Executor;
use convoy::models::{HostPhase, Release};
use convoy::planner;
use convoy::recorder::{StateRecorder, TomlStateRecorder};
use convoy::transport::SshTransport;
use convoy::{inventory, release};

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Deploy {
            version,
            artifact,
            checksum,
            hosts,
            dry_run,
            no_rollback,
        } => cmd_deploy(
            &cli.config,
            version,
            artifact,
            checksum,
            hosts,
            dry_run,
            no_rollback,
            cli.json,
            cli.verbose,
        ),
        Commands::Rollback { host } => cmd_rollback(&cli.config, &host, cli.json, cli.verbose),
        Commands::Status { host } => cmd_status(&cli.config, host.as_deref(), cli.json),
    }
}

fn make_sink(json: bool, verbose: u8) -> Box<dyn EventSink> {
    if json {
        Box::new(JsonEventSink::stdout())
    } else {
        Box::new(ConsoleEventSink::new(verbose))
    }
}

fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    // A second Ctrl-C during shutdown exits immediately
    let _ = ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("cancelling: waiting for in-flight steps to finish");
    });
    cancel
}

#[allow(clippy::too_many_arguments)]
fn cmd_deploy(
    config_path: &PathBuf,
    version: String,
    artifact: PathBuf,
    checksum: Option<String>,
    hosts: Option<String>,
    dry_run: bool,
    no_rollback: bool,
    json: bool,
    verbose: u8,
) -> Result<i32> {
    let config = Config::load(config_path)?;
    let targets = inventory::resolve_filtered(&config, hosts.as_deref())?;

    let mut rel = Release::new(version, artifact);
    rel.checksum = checksum;

    let plan = planner::plan_deploy(rel, targets);

    if dry_run {
        // Staging validates the artifact and checksum without touching
        // any host.
        let staged = release::stage(&plan.release, &config.sync.exclude)?;
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "event": "plan",
                    "release": plan.release.version,
                    "digest": staged.digest,
                    "files": staged.files.len(),
                    "hosts": plan.hosts.iter().map(|h| h.id.clone()).collect::<Vec<_>>(),
                    "steps": plan.steps.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                })
            );
        } else {
            println!("dry run: {}", plan.describe());
            println!(
                "  artifact: {} file(s), digest {}",
                staged.files.len(),
                staged.digest
            );
        }
        return Ok(0);
    }

    let sink = make_sink(json, verbose);
    let transport = SshTransport::new();
    let recorder = TomlStateRecorder::new(config.state_path());
    let cancel = install_cancel_handler();

    let executor = Executor::new(&config, &transport, &recorder, sink.as_ref())
        .rollback_on_failure(!no_rollback)
        .with_cancel_flag(cancel);

    let report = executor.run(&plan)?;

    if !json {
        print_summary(&report);
    }
    Ok(if report.all_succeeded() { 0 } else { 1 })
}

fn cmd_rollback(config_path: &PathBuf, host_id: &str, json: bool, verbose: u8) -> Result<i32> {
    let config = Config::load(config_path)?;
    let host = inventory::find_host(&config, host_id)?;
    let recorder = TomlStateRecorder::new(config.state_path());

    let plan = match planner::plan_rollback(host, &recorder) {
        Ok(plan) => plan,
        Err(e @ ConvoyError::NoLastGood { .. }) => {
            eprintln!("error: {e}");
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    let sink = make_sink(json, verbose);
    let transport = SshTransport::new();
    let cancel = install_cancel_handler();

    let executor = Executor::new(&config, &transport, &recorder, sink.as_ref())
        .with_cancel_flag(cancel);

    let report = executor.run(&plan)?;

    if !json {
        print_summary(&report);
    }
    Ok(if report.all_succeeded() { 0 } else { 1 })
}

fn cmd_status(config_path: &PathBuf, host: Option<&str>, json: bool) -> Result<i32> {
    let config = Config::load(config_path)?;
    let recorder = TomlStateRecorder::new(config.state_path());

    let states = recorder.all()?;
    let selected: Vec<(&String, &convoy::models::HostState)> = states
        .iter()
        .filter(|(id, _)| host.is_none_or(|h| h == id.as_str()))
        .collect();

    if let Some(host) = host {
        if selected.is_empty() {
            eprintln!("no recorded state for '{host}'");
            return Ok(1);
        }
    }

    if json {
        for (id, state) in &selected {
            println!(
                "{}",
                serde_json::json!({
                    "host": id,
                    "current": state.current.version,
                    "last_good": state.last_good.version,
                    "updated_at": state.updated_at.to_rfc3339(),
                })
            );
        }
    } else if selected.is_empty() {
        println!("no recorded deployments");
    } else {
        for (id, state) in &selected {
            println!(
                "{}: current {} (last good {}, updated {})",
                id,
                state.current.version,
                state.last_good.version,
                state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    Ok(0)
}

fn print_summary(report: &convoy::executor::RunReport) {
    println!();
    for host in &report.hosts {
        match (&host.phase, &host.error) {
            (HostPhase::Live | HostPhase::RolledBack, None) => {
                println!("  {} -> {}", host.host, host.phase);
            }
            (phase, Some(error)) => {
                println!("  {} -> {}: {}", host.host, phase, error);
            }
            (phase, None) => {
                println!("  {} -> {}", host.host, phase);
            }
        }
    }
}

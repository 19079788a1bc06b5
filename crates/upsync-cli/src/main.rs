//! `upsync` binary
//!
//! Logs go to stderr. `RUST_LOG` sets the filter (default `info`) and
//! `UPSYNC_LOG_FORMAT=json` switches to JSON lines.

use anyhow::{Context, Result};
use clap::ArgMatches;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upsync_cli::{build_cli, commands, run_events, InstanceSpec};
use upsync_core::{RefreshOutcome, SyncConfig, UpstreamSync};
use upsync_ssh::SshTransport;

fn instance_specs(args: &ArgMatches) -> Vec<InstanceSpec> {
    args.get_many::<InstanceSpec>("instance")
        .into_iter()
        .flatten()
        .cloned()
        .collect()
}

fn load_config(args: &ArgMatches) -> Result<SyncConfig> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    SyncConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn connect(config: &SyncConfig) -> UpstreamSync {
    let transport = SshTransport::from_remote(&config.remote);
    UpstreamSync::new(config, Arc::new(transport))
}

#[tokio::main]
async fn main() -> Result<()> {
    let json = std::env::var("UPSYNC_LOG_FORMAT").is_ok_and(|format| format == "json");
    tracing_subscriber::registry()
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("render", args)) => {
            let config = commands::render_instances(&instance_specs(args))?;
            print!("{config}");
        }
        Some(("check", args)) => {
            let config = load_config(args)?;
            println!("Configuration OK");
            print!("{}", commands::describe_config(&config));
        }
        Some(("push", args)) => {
            let config = load_config(args)?;
            let sync = connect(&config);
            match commands::push(&sync, &instance_specs(args)).await? {
                RefreshOutcome::Applied(report) => {
                    println!(
                        "Pushed {} instance(s), {} bytes, reload exit status {}",
                        report.instance_count, report.bytes_uploaded, report.exit_status
                    );
                }
                other => println!("No push performed: {other:?}"),
            }
        }
        Some(("run", args)) => {
            let config = load_config(args)?;
            let sync = connect(&config);
            tracing::info!("reading registrar events from stdin");

            let summary = run_events(&sync, BufReader::new(tokio::io::stdin())).await?;
            let stats = sync.stats();
            tracing::info!(
                events = summary.events,
                malformed = summary.malformed,
                pushed = summary.pushed,
                contended = summary.contended,
                unchanged = summary.unchanged,
                failed = summary.failed,
                cycles_applied = stats.applied,
                cycles_failed = stats.failed,
                "event stream finished"
            );
        }
        _ => unreachable!("subcommand_required is set"),
    }

    Ok(())
}

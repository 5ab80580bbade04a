//! Command-line surface.
//!
//! Thin front-end over the reconciliation engine: `install` and `upgrade`
//! run the full pipeline, `lint` stops after validation and ordering, and
//! `reinit` is reserved.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::chart::load_chart_dir;
use crate::engine::PodmanEngine;
use crate::graph::DependencyGraph;
use crate::manifest::parse_manifests;
use crate::reconcile::Reconciler;
use crate::report::ReconcileReport;

/// Local, ephemeral, Kubernetes-inspired reconciler for podman charts
#[derive(Debug, Parser)]
#[command(name = "cutepod", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose per-action output
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Cli {
    /// Whether verbose output was requested
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install a chart from a manifest directory
    Install {
        /// Name scoping the chart's engine objects
        chart_name: String,
        /// Directory containing the chart's manifests
        path: PathBuf,
    },
    /// Re-reconcile an installed chart against updated manifests
    Upgrade {
        /// Name scoping the chart's engine objects
        chart_name: String,
        /// Directory containing the chart's manifests
        path: PathBuf,
    },
    /// Parse and validate manifests without contacting the engine
    Lint {
        /// Directory containing the chart's manifests
        path: PathBuf,
    },
    /// Reserved
    Reinit,
}

/// Run the parsed command line; returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Install { chart_name, path } => {
            reconcile_command(&chart_name, &path, cli.verbose).await
        }
        Command::Upgrade { chart_name, path } => {
            reconcile_command(&chart_name, &path, cli.verbose).await
        }
        Command::Lint { path } => lint_command(&path).await,
        Command::Reinit => {
            println!("reinit is reserved and currently does nothing");
            0
        }
    }
}

async fn reconcile_command(chart_name: &str, path: &std::path::Path, verbose: bool) -> i32 {
    let manifests = match load_chart_dir(path).await {
        Ok(manifests) => manifests,
        Err(err) => {
            error!("failed to load chart: {err}");
            return 1;
        }
    };

    let engine = match PodmanEngine::connect().await {
        Ok(engine) => engine,
        Err(err) => {
            error!("engine unreachable: {err}");
            return 1;
        }
    };

    // Ctrl-C cancels the run; in-flight actions finalise as cancelled
    let cancel = CancellationToken::new();
    let signal_guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_guard.cancel();
        }
    });

    let reconciler = Reconciler::new(Arc::new(engine));
    match reconciler
        .reconcile(&manifests, chart_name, false, cancel)
        .await
    {
        Ok(report) => {
            print_report(&report, verbose);
            i32::from(!report.is_clean())
        }
        Err(err) => {
            error!("reconcile failed: {err}");
            1
        }
    }
}

fn print_report(report: &ReconcileReport, verbose: bool) {
    if verbose {
        for record in report
            .created
            .iter()
            .chain(&report.updated)
            .chain(&report.deleted)
        {
            let outcome = match &record.error {
                Some(error) => format!("failed: {error}"),
                None => record
                    .message
                    .clone()
                    .unwrap_or_else(|| "ok".to_string()),
            };
            println!(
                "{} {}/{}: {} ({:?})",
                record.action, record.kind, record.name, outcome, record.duration
            );
        }
    }
    println!("{}", report.summary());
    for entry in &report.errors {
        let resource = entry.resource.as_deref().unwrap_or("-");
        println!("error [{}] {}: {}", entry.category, resource, entry.message);
    }
}

async fn lint_command(path: &std::path::Path) -> i32 {
    let manifests = match load_chart_dir(path).await {
        Ok(manifests) => manifests,
        Err(err) => {
            error!("failed to load chart: {err}");
            return 1;
        }
    };

    let registry = match parse_manifests(&manifests) {
        Ok(registry) => registry,
        Err(err) => {
            print_lint_error(&err);
            return 1;
        }
    };
    if let Err(err) = registry.validate_dependencies() {
        print_lint_error(&err);
        return 1;
    }
    if let Err(err) = DependencyGraph::build(&registry) {
        print_lint_error(&err);
        return 1;
    }

    println!("{} resources validated, no problems found", registry.len());
    0
}

fn print_lint_error(err: &crate::error::Error) {
    match err.locator() {
        Some(locator) => println!("error at {locator}: {err}"),
        None => println!("error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_args_parse_in_order() {
        let cli = Cli::try_parse_from(["cutepod", "install", "shop", "./charts/shop"]).unwrap();
        match &cli.command {
            Command::Install { chart_name, path } => {
                assert_eq!(chart_name, "shop");
                assert_eq!(path, &PathBuf::from("./charts/shop"));
            }
            _ => panic!("expected install"),
        }
        assert!(!cli.verbose());
    }

    #[test]
    fn test_upgrade_verbose_flag() {
        let cli =
            Cli::try_parse_from(["cutepod", "upgrade", "shop", "./charts/shop", "-v"]).unwrap();
        assert!(cli.verbose());
        assert!(matches!(cli.command, Command::Upgrade { .. }));
    }

    #[test]
    fn test_lint_takes_only_a_path() {
        let cli = Cli::try_parse_from(["cutepod", "lint", "./charts/shop"]).unwrap();
        assert!(matches!(cli.command, Command::Lint { .. }));
        assert!(Cli::try_parse_from(["cutepod", "lint"]).is_err());
    }

    #[test]
    fn test_reinit_parses() {
        let cli = Cli::try_parse_from(["cutepod", "reinit"]).unwrap();
        assert!(matches!(cli.command, Command::Reinit));
    }
}

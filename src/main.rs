// src/main.rs

mod cli;

use anyhow::{Context, Result};
use bundleguard::{CollisionVerdict, Engine, EngineConfig, RunRequest, RunResult, ScanReport};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::process;
use tracing::info;

fn load_config(path: Option<&Path>) -> Result<EngineConfig, bundleguard::Error> {
    match path {
        Some(path) => {
            info!("Loading engine configuration from {}", path.display());
            EngineConfig::from_file(path)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn print_result(result: &RunResult) {
    if result.success {
        println!("{}", result.message);
        for change in &result.changes {
            let old = if change.old_identifier.is_empty() {
                "<empty>"
            } else {
                change.old_identifier.as_str()
            };
            println!("  {}: {} -> {}", change.component_path, old, change.new_identifier);
        }
        if let Some(digest) = &result.output_sha256 {
            println!("  sha256: {}", digest);
        }
    } else {
        eprintln!("Error: {}", result.message);
        for residual in &result.residual {
            eprintln!(
                "  {}: {:?} ({})",
                residual.component_path, residual.identifier, residual.reason
            );
        }
    }
    if let Some(backup) = &result.backup_path {
        println!("  Backup: {}", backup.display());
    }
    if let Some(diagnostics) = &result.diagnostics_path {
        println!("  Diagnostics: {}", diagnostics.display());
    }
}

fn print_scan(report: &ScanReport) {
    println!(
        "{} component(s) in {} (canonical {})",
        report.analysis.len(),
        report.archive.display(),
        report.canonical_identifier
    );
    for classified in &report.analysis.components {
        let component = &classified.component;
        let verdict = match &classified.verdict {
            CollisionVerdict::Compliant => "ok".to_string(),
            CollisionVerdict::Offending(reason) => reason.to_string(),
        };
        println!(
            "  [{}] {} {:?}: {}",
            component.role, component.path, component.declared_identifier, verdict
        );
    }
    if report.plan.is_empty() {
        println!("No rewrites needed");
    } else {
        println!("Planned rewrites:");
        for rewrite in report.plan.iter() {
            println!("  {}: -> {}", rewrite.component_path, rewrite.new_identifier);
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve {
            archive,
            identifier,
            token,
            config,
            diagnostics,
            report,
            json,
        } => {
            let config = match load_config(config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(e.kind().exit_code());
                }
            };

            let token = token.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut request = RunRequest::new(archive, identifier, token);
            request.diagnostics_path = diagnostics;
            request.report_path = report;

            let result = Engine::new(config).run(&request);
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("Failed to serialize result")?
                );
            } else {
                print_result(&result);
            }

            if let Some(kind) = result.failure {
                process::exit(kind.exit_code());
            }
            Ok(())
        }
        Commands::Scan {
            archive,
            identifier,
            config,
            json,
        } => {
            let report = load_config(config.as_deref())
                .and_then(|config| Engine::new(config).scan(&archive, &identifier));
            let report = match report {
                Ok(report) => report,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(e.kind().exit_code());
                }
            };

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialize scan")?
                );
            } else {
                print_scan(&report);
            }
            Ok(())
        }
    }
}

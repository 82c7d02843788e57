// src/verify.rs

//! Post-rewrite verification
//!
//! Re-runs discovery and analysis against the rewritten archive. This is a
//! read-only check that catches rewrite defects before anything is
//! persisted.

use crate::analyzer::{analyze, Analysis, CollisionVerdict, OffenseReason};
use crate::archive::Archive;
use crate::components::discover;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::identifier::CanonicalIdentifier;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, error};

/// A component still offending after the rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResidualCollision {
    pub component_path: String,
    pub identifier: String,
    #[serde(flatten)]
    pub reason: OffenseReason,
}

/// Diagnostic listing written when verification fails
#[derive(Debug, Serialize)]
struct DiagnosticReport<'a> {
    archive: &'a Path,
    canonical_identifier: &'a str,
    correlation_token: &'a str,
    residual_collisions: &'a [ResidualCollision],
}

/// Confirm that no component of `archive` is offending
///
/// Returns the fresh analysis on success.
pub fn verify(
    archive: &Archive,
    canonical: &CanonicalIdentifier,
    config: &EngineConfig,
) -> Result<Analysis> {
    let analysis = analyze(discover(archive, config)?, canonical);

    let residuals: Vec<ResidualCollision> = analysis
        .offending()
        .filter_map(|c| match &c.verdict {
            CollisionVerdict::Offending(reason) => Some(ResidualCollision {
                component_path: c.component.path.clone(),
                identifier: c.component.declared_identifier.clone(),
                reason: reason.clone(),
            }),
            CollisionVerdict::Compliant => None,
        })
        .collect();

    if residuals.is_empty() {
        debug!("Verified {} component(s)", analysis.len());
        return Ok(analysis);
    }

    for residual in &residuals {
        error!(
            "Residual collision at {}: {:?} ({})",
            residual.component_path, residual.identifier, residual.reason
        );
    }
    Err(Error::VerificationFailed(residuals))
}

/// Write the residual collision listing as JSON
pub fn write_diagnostics(
    dest: &Path,
    archive: &Path,
    canonical: &CanonicalIdentifier,
    correlation_token: &str,
    residuals: &[ResidualCollision],
) -> Result<()> {
    let report = DiagnosticReport {
        archive,
        canonical_identifier: canonical.as_str(),
        correlation_token,
        residual_collisions: residuals,
    };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::write(dest, std::io::Error::other(e)))?;

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
    }
    fs::write(dest, json).map_err(|e| Error::write(dest, e))?;
    Ok(())
}

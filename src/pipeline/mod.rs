// src/pipeline/mod.rs

//! Pipeline controller
//!
//! Drives one collision resolution run over an archive on disk:
//!
//! ```text
//! Validating -> Extracted -> Analyzed -> Rewritten -> Verified -> Repacked -> Done
//!      \____________\____________\___________\____________\___________> Failed
//! ```
//!
//! # Guarantees
//!
//! - Inputs are validated before anything on disk is touched.
//! - A second run on the same archive fails with `Busy` instead of waiting.
//! - A backup copy exists before the archive is read; it is kept whenever
//!   the run fails.
//! - The archive path is only ever replaced by an atomic rename of a fully
//!   written and synced file, and only when something was rewritten.
//! - Every outcome, including failures, is reported as a [`RunResult`].

mod backup;
mod lock;

pub use backup::{backup_path, create_backup, remove_backup, replace_atomic, sanitize_token};
pub use lock::ArchiveLock;

use crate::analyzer::{analyze, Analysis};
use crate::archive::{Archive, WriteOptions};
use crate::components::discover;
use crate::config::EngineConfig;
use crate::error::{Error, FailureKind, Result};
use crate::hash::sha256_file;
use crate::identifier::CanonicalIdentifier;
use crate::rewrite::{IdentifierRewriter, RewritePlan, Rewriter};
use crate::verify::{verify, write_diagnostics, ResidualCollision};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validating,
    Extracted,
    Analyzed,
    Rewritten,
    Verified,
    Repacked,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Extracted => "extracted",
            Self::Analyzed => "analyzed",
            Self::Rewritten => "rewritten",
            Self::Verified => "verified",
            Self::Repacked => "repacked",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub archive_path: PathBuf,
    pub canonical_identifier: String,
    /// Caller-supplied token used in backup and temp file names
    pub correlation_token: String,
    /// Where to write the residual listing if verification fails
    pub diagnostics_path: Option<PathBuf>,
    /// Where to write the run result as JSON
    pub report_path: Option<PathBuf>,
}

impl RunRequest {
    pub fn new(
        archive_path: impl Into<PathBuf>,
        canonical_identifier: impl Into<String>,
        correlation_token: impl Into<String>,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            canonical_identifier: canonical_identifier.into(),
            correlation_token: correlation_token.into(),
            diagnostics_path: None,
            report_path: None,
        }
    }

    pub fn with_diagnostics(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostics_path = Some(path.into());
        self
    }

    pub fn with_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }
}

/// One identifier rewrite persisted to the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierChange {
    pub component_path: String,
    pub old_identifier: String,
    pub new_identifier: String,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub failure: Option<FailureKind>,
    pub message: String,
    pub archive: PathBuf,
    pub correlation_token: String,
    /// Number of components inspected
    pub inspected: usize,
    /// Number of components whose new identifier was persisted
    pub rewritten: usize,
    pub changes: Vec<IdentifierChange>,
    /// Offending components left after rewriting (verification failures only)
    pub residual: Vec<ResidualCollision>,
    /// Backup still on disk after the run
    pub backup_path: Option<PathBuf>,
    pub diagnostics_path: Option<PathBuf>,
    pub final_state: PipelineState,
    /// Stages passed through, in order, ending with `done` or `failed`
    pub stages: Vec<PipelineState>,
    /// Last stage reached before a failure
    pub failed_stage: Option<PipelineState>,
    /// SHA-256 of the archive at the end of a successful run
    pub output_sha256: Option<String>,
}

impl RunResult {
    /// Write this result as pretty-printed JSON
    pub fn write_json(&self, dest: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::write(dest, std::io::Error::other(e)))?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
        }
        fs::write(dest, json).map_err(|e| Error::write(dest, e))
    }
}

/// Read-only view of what a run would do
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub archive: PathBuf,
    pub canonical_identifier: CanonicalIdentifier,
    pub analysis: Analysis,
    pub plan: RewritePlan,
}

/// Bookkeeping shared by the stages of one run
struct Progress {
    state: PipelineState,
    stages: Vec<PipelineState>,
    inspected: usize,
    changes: Vec<IdentifierChange>,
    backup_path: Option<PathBuf>,
    diagnostics_path: Option<PathBuf>,
    output_sha256: Option<String>,
    summary: String,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: PipelineState::Validating,
            stages: vec![PipelineState::Validating],
            inspected: 0,
            changes: Vec::new(),
            backup_path: None,
            diagnostics_path: None,
            output_sha256: None,
            summary: String::new(),
        }
    }

    fn advance(&mut self, state: PipelineState) {
        info!("Pipeline: {} -> {}", self.state, state);
        self.state = state;
        self.stages.push(state);
    }
}

/// Collision resolution engine
pub struct Engine {
    config: EngineConfig,
    rewriter: Box<dyn Rewriter>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Create an engine with the default identifier rewriter
    pub fn new(config: EngineConfig) -> Self {
        let rewriter: Box<dyn Rewriter> = Box::new(IdentifierRewriter::new(&config));
        Self { config, rewriter }
    }

    /// Replace the rewrite strategy
    pub fn with_rewriter(mut self, rewriter: Box<dyn Rewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline
    ///
    /// Never panics on bad input; every failure is folded into the result.
    pub fn run(&self, request: &RunRequest) -> RunResult {
        let mut progress = Progress::new();
        let outcome = self.execute(request, &mut progress);
        let result = finish(request, progress, outcome);

        if let Some(dest) = &request.report_path {
            match result.write_json(dest) {
                Ok(()) => info!("Wrote run report to {}", dest.display()),
                Err(e) => warn!("Failed to write run report: {}", e),
            }
        }
        result
    }

    fn execute(&self, request: &RunRequest, progress: &mut Progress) -> Result<()> {
        let path = request.archive_path.as_path();

        self.config.validate()?;
        let canonical = CanonicalIdentifier::parse(&request.canonical_identifier)?;
        let token = sanitize_token(&request.correlation_token)?;
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }

        let _lock = ArchiveLock::try_acquire(path)?;
        info!(
            "Resolving identifier collisions in {} (canonical {}, token {})",
            path.display(),
            canonical,
            token
        );

        progress.backup_path = Some(create_backup(
            path,
            &token,
            self.config.backup_dir.as_deref(),
        )?);

        let mut archive = Archive::open(path)?;
        progress.advance(PipelineState::Extracted);

        let analysis = analyze(discover(&archive, &self.config)?, &canonical);
        progress.inspected = analysis.len();
        if analysis.is_empty() {
            info!("No components found in {}", path.display());
        }
        progress.advance(PipelineState::Analyzed);

        let plan = if analysis.is_clean() {
            RewritePlan::default()
        } else {
            let plan = self.rewriter.plan(&analysis, &canonical);
            self.rewriter.apply(&plan, &mut archive)?;
            progress.advance(PipelineState::Rewritten);
            plan
        };

        match verify(&archive, &canonical, &self.config) {
            Ok(_) => {}
            Err(Error::VerificationFailed(residuals)) => {
                if let Some(dest) = &request.diagnostics_path {
                    match write_diagnostics(dest, path, &canonical, &token, &residuals) {
                        Ok(()) => progress.diagnostics_path = Some(dest.clone()),
                        Err(e) => error!("Failed to write diagnostics: {}", e),
                    }
                }
                return Err(Error::VerificationFailed(residuals));
            }
            Err(e) => return Err(e),
        }
        progress.advance(PipelineState::Verified);

        if !plan.is_empty() {
            let options = WriteOptions {
                compression_level: self.config.compression_level,
            };
            replace_atomic(&archive, path, &token, &options)?;
            progress.changes = plan
                .iter()
                .map(|r| IdentifierChange {
                    component_path: r.component_path.clone(),
                    old_identifier: r.old_identifier.clone(),
                    new_identifier: r.new_identifier.clone(),
                })
                .collect();
            progress.advance(PipelineState::Repacked);
        }

        // The archive is final from here on; later failures only cost bookkeeping
        progress.output_sha256 = match sha256_file(path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!("Failed to hash {}: {}", path.display(), e);
                None
            }
        };

        if !self.config.keep_backup
            && let Some(backup) = progress.backup_path.clone()
        {
            match remove_backup(&backup) {
                Ok(()) => progress.backup_path = None,
                Err(e) => warn!("Failed to remove backup {}: {}", backup.display(), e),
            }
        }

        progress.summary = if plan.is_empty() {
            format!("No collisions among {} component(s)", progress.inspected)
        } else {
            format!(
                "Rewrote {} of {} component(s)",
                plan.len(),
                progress.inspected
            )
        };
        progress.advance(PipelineState::Done);
        Ok(())
    }

    /// Analyze an archive and plan rewrites without touching it
    pub fn scan(&self, archive_path: &Path, canonical_identifier: &str) -> Result<ScanReport> {
        self.config.validate()?;
        let canonical = CanonicalIdentifier::parse(canonical_identifier)?;

        let archive = Archive::open(archive_path)?;
        let analysis = analyze(discover(&archive, &self.config)?, &canonical);
        let plan = if analysis.is_clean() {
            RewritePlan::default()
        } else {
            self.rewriter.plan(&analysis, &canonical)
        };

        Ok(ScanReport {
            archive: archive_path.to_path_buf(),
            canonical_identifier: canonical,
            analysis,
            plan,
        })
    }
}

fn finish(request: &RunRequest, mut progress: Progress, outcome: Result<()>) -> RunResult {
    let (success, failure, message, residual, failed_stage) = match outcome {
        Ok(()) => {
            info!("{}", progress.summary);
            (true, None, progress.summary, Vec::new(), None)
        }
        Err(e) => {
            error!("Run failed during {}: {}", progress.state, e);
            if let Some(backup) = &progress.backup_path {
                info!("Backup retained at {}", backup.display());
            }
            let kind = e.kind();
            let message = e.to_string();
            let residual = match e {
                Error::VerificationFailed(residuals) => residuals,
                _ => Vec::new(),
            };
            let failed_stage = progress.state;
            progress.stages.push(PipelineState::Failed);
            (false, Some(kind), message, residual, Some(failed_stage))
        }
    };

    let rewritten = progress.changes.len();
    RunResult {
        success,
        failure,
        message,
        archive: request.archive_path.clone(),
        correlation_token: request.correlation_token.clone(),
        inspected: progress.inspected,
        rewritten,
        changes: progress.changes,
        residual,
        backup_path: progress.backup_path,
        diagnostics_path: progress.diagnostics_path,
        final_state: if success {
            PipelineState::Done
        } else {
            PipelineState::Failed
        },
        stages: progress.stages,
        failed_stage,
        output_sha256: progress.output_sha256,
    }
}

/// Resolve identifier collisions in place with the default configuration
///
/// # Example
///
/// ```ignore
/// let result = bundleguard::resolve_collisions("Runner.ipa", "com.acme.app", "build-1842");
/// if !result.success {
///     eprintln!("{}: {}", result.failure.unwrap(), result.message);
/// }
/// ```
pub fn resolve_collisions(
    archive_path: impl AsRef<Path>,
    canonical_identifier: &str,
    correlation_token: &str,
) -> RunResult {
    let request = RunRequest::new(
        archive_path.as_ref(),
        canonical_identifier,
        correlation_token,
    );
    Engine::default().run(&request)
}

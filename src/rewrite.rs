// src/rewrite.rs

//! Rewrite planning and application
//!
//! Offending components receive identifiers of the form
//! `<canonical>.<tag><n>`, where the tag comes from the component's role
//! (`ext`, `framework`, ...) and `n` is a counter per role starting at 1.
//! A candidate already held by a compliant component, or planned earlier,
//! bumps the counter. The designated root is the one component that gets
//! the bare canonical identifier back.
//!
//! Plans are built in component path order, so the same archive always
//! yields the same plan.

use crate::analyzer::Analysis;
use crate::archive::Archive;
use crate::components::ComponentRole;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::identifier::{normalize, CanonicalIdentifier};
use crate::plist::{MetadataError, PlistDocument};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// New identifier assigned to one offending component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedRewrite {
    pub component_path: String,
    pub metadata_path: String,
    pub role: ComponentRole,
    pub old_identifier: String,
    pub new_identifier: String,
    /// Suffix tag mirrored into the display name; `None` for the root
    pub marker: Option<String>,
}

/// All rewrites of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewritePlan {
    pub rewrites: Vec<PlannedRewrite>,
}

impl RewritePlan {
    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rewrites.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedRewrite> {
        self.rewrites.iter()
    }
}

/// Strategy for fixing offending components
///
/// The pipeline owns the archive and calls `apply` exactly once per run,
/// after `plan`. Implementations must not touch the filesystem.
pub trait Rewriter {
    /// Assign new identifiers to the offending components of `analysis`
    fn plan(&self, analysis: &Analysis, canonical: &CanonicalIdentifier) -> RewritePlan;

    /// Write the plan into the archive's metadata documents, returning the
    /// number of documents rewritten
    fn apply(&self, plan: &RewritePlan, archive: &mut Archive) -> Result<usize>;
}

/// Default rewriter: rewrites the identifier key and mirrors the display name
#[derive(Debug, Clone)]
pub struct IdentifierRewriter {
    identifier_key: String,
    display_name_key: Option<String>,
}

impl IdentifierRewriter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            identifier_key: config.identifier_key.clone(),
            display_name_key: config
                .mirror_display_name
                .then(|| config.display_name_key.clone()),
        }
    }

    fn rewrite_document(&self, rewrite: &PlannedRewrite, data: &[u8]) -> Result<Vec<u8>> {
        let parse_error = |e: MetadataError| Error::ParseError {
            path: rewrite.metadata_path.clone(),
            reason: e.to_string(),
        };

        let mut doc = PlistDocument::parse(data).map_err(parse_error)?;
        doc.write_string(&self.identifier_key, &rewrite.new_identifier)
            .map_err(parse_error)?;

        if let (Some(key), Some(marker)) = (&self.display_name_key, &rewrite.marker) {
            match doc.read_string(key) {
                Ok(name) => {
                    let suffix = format!(" ({})", marker);
                    if !name.ends_with(&suffix) {
                        doc.write_string(key, &format!("{}{}", name, suffix))
                            .map_err(parse_error)?;
                    }
                }
                Err(e) => debug!("{}: display name not mirrored: {}", rewrite.metadata_path, e),
            }
        }

        Ok(doc.into_bytes())
    }
}

impl Rewriter for IdentifierRewriter {
    fn plan(&self, analysis: &Analysis, canonical: &CanonicalIdentifier) -> RewritePlan {
        plan_rewrites(analysis, canonical)
    }

    fn apply(&self, plan: &RewritePlan, archive: &mut Archive) -> Result<usize> {
        for rewrite in plan.iter() {
            let entry = archive
                .entry(&rewrite.metadata_path)
                .ok_or_else(|| Error::ParseError {
                    path: rewrite.metadata_path.clone(),
                    reason: "metadata document missing from archive".to_string(),
                })?;
            let updated = self.rewrite_document(rewrite, entry.data())?;
            archive.replace_data(&rewrite.metadata_path, updated)?;

            info!(
                "Rewrote {} ({}): {:?} -> {}",
                rewrite.component_path, rewrite.role, rewrite.old_identifier, rewrite.new_identifier
            );
        }
        Ok(plan.len())
    }
}

/// Build the collision-free plan for every offending component
pub fn plan_rewrites(analysis: &Analysis, canonical: &CanonicalIdentifier) -> RewritePlan {
    let mut taken: HashSet<String> = analysis
        .compliant()
        .map(|c| normalize(&c.component.declared_identifier))
        .collect();
    taken.insert(canonical.normalized());

    let mut counters: HashMap<ComponentRole, u32> = HashMap::new();
    let mut rewrites = Vec::new();

    for offending in analysis.offending() {
        let component = &offending.component;

        let (new_identifier, marker) = if offending.designated_root {
            (canonical.to_string(), None)
        } else {
            let tag = component.role.tag();
            let counter = counters.entry(component.role).or_insert(0);
            loop {
                *counter += 1;
                let suffix = format!("{}{}", tag, counter);
                let candidate = canonical.derive(&suffix);
                if taken.insert(normalize(&candidate)) {
                    break (candidate, Some(suffix));
                }
            }
        };

        rewrites.push(PlannedRewrite {
            component_path: component.path.clone(),
            metadata_path: component.metadata_path.clone(),
            role: component.role,
            old_identifier: component.declared_identifier.clone(),
            new_identifier,
            marker,
        });
    }

    RewritePlan { rewrites }
}

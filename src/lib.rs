// src/lib.rs

//! Bundleguard
//!
//! Identifier collision resolution for packaged application archives.
//!
//! An application archive bundles a root app together with extensions,
//! frameworks and test bundles, each declaring its own identifier in a
//! metadata document. Distribution services reject archives where two
//! components share an identifier or where a component does not derive its
//! identifier from the app's. This crate finds those collisions and
//! rewrites the offending identifiers in place.
//!
//! # Architecture
//!
//! - Archive: zip container read fully into memory, repacked preserving
//!   entry order and attributes
//! - Plist: structural reading and editing of XML metadata documents
//! - Components: discovery and role classification of bundles
//! - Analyzer: per-component verdicts against the canonical identifier
//! - Rewrite: deterministic, collision-free identifier assignment
//! - Verify: post-rewrite re-analysis
//! - Pipeline: locking, backup, atomic replacement and run reporting

pub mod analyzer;
pub mod archive;
pub mod components;
pub mod config;
mod error;
pub mod hash;
pub mod identifier;
pub mod pipeline;
pub mod plist;
pub mod rewrite;
pub mod verify;

pub use analyzer::{analyze, Analysis, ClassifiedComponent, CollisionVerdict, OffenseReason};
pub use archive::{Archive, ArchiveEntry, WriteOptions};
pub use components::{Component, ComponentRole};
pub use config::EngineConfig;
pub use error::{Error, FailureKind, Result};
pub use identifier::CanonicalIdentifier;
pub use pipeline::{
    resolve_collisions, Engine, IdentifierChange, PipelineState, RunRequest, RunResult, ScanReport,
};
pub use plist::{MetadataError, PlistDocument};
pub use rewrite::{IdentifierRewriter, PlannedRewrite, RewritePlan, Rewriter};
pub use verify::{verify, ResidualCollision};

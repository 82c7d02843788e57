// src/analyzer.rs

//! Collision analysis
//!
//! Classifies every discovered component against the canonical identifier.
//!
//! # Rules
//!
//! - The designated root is the first component in path order whose role is
//!   root app, or simply the first component when no bundle has that role.
//! - The designated root is compliant iff it declares exactly the canonical
//!   identifier.
//! - Any other component is compliant iff it declares a well-formed
//!   identifier nested under the canonical one (`<canonical>.<suffix>`) that
//!   no earlier compliant component already holds.
//! - Comparisons for collisions use normalized identifiers (trimmed,
//!   ASCII-lowercased).

use crate::components::Component;
use crate::identifier::{is_well_formed, normalize, CanonicalIdentifier};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Why a component's identifier is unacceptable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OffenseReason {
    /// No identifier declared
    Empty,
    /// Identifier is not a dot-separated sequence of valid segments
    Malformed,
    /// A non-root component declares the canonical identifier itself
    EqualsRoot,
    /// A second root app claims the canonical identifier
    DuplicateRoot,
    /// The designated root declares something other than the canonical identifier
    RootMismatch,
    /// Identifier is not nested under the canonical identifier
    ForeignPrefix,
    /// Identifier already held by the component at `of`
    Duplicate { of: String },
}

impl fmt::Display for OffenseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier is empty"),
            Self::Malformed => write!(f, "identifier is malformed"),
            Self::EqualsRoot => write!(f, "identifier equals the root identifier"),
            Self::DuplicateRoot => write!(f, "a second root app claims the root identifier"),
            Self::RootMismatch => write!(f, "root app does not declare the canonical identifier"),
            Self::ForeignPrefix => write!(f, "identifier is not derived from the canonical identifier"),
            Self::Duplicate { of } => write!(f, "identifier duplicates {}", of),
        }
    }
}

/// Classification of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CollisionVerdict {
    Compliant,
    Offending(OffenseReason),
}

impl CollisionVerdict {
    pub fn is_offending(&self) -> bool {
        matches!(self, Self::Offending(_))
    }
}

/// A component together with its verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedComponent {
    pub component: Component,
    pub verdict: CollisionVerdict,
    /// Whether this component is the one entitled to the bare canonical identifier
    pub designated_root: bool,
}

/// Verdicts for every component of an archive, in path order
#[derive(Debug, Clone, Default, Serialize)]
pub struct Analysis {
    pub components: Vec<ClassifiedComponent>,
}

impl Analysis {
    /// Components that must be rewritten
    pub fn offending(&self) -> impl Iterator<Item = &ClassifiedComponent> {
        self.components.iter().filter(|c| c.verdict.is_offending())
    }

    /// Components whose identifiers are kept
    pub fn compliant(&self) -> impl Iterator<Item = &ClassifiedComponent> {
        self.components.iter().filter(|c| !c.verdict.is_offending())
    }

    /// True when nothing needs rewriting
    pub fn is_clean(&self) -> bool {
        self.offending().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Classify components against the canonical identifier
pub fn analyze(mut components: Vec<Component>, canonical: &CanonicalIdentifier) -> Analysis {
    components.sort_by(|a, b| a.path.cmp(&b.path));

    let root_index = components
        .iter()
        .position(|c| c.role.is_root())
        .or(if components.is_empty() { None } else { Some(0) });
    let canonical_key = canonical.normalized();

    // normalized identifier -> path of the compliant component holding it
    let mut held: HashMap<String, String> = HashMap::new();
    let mut classified = Vec::with_capacity(components.len());

    for (i, component) in components.into_iter().enumerate() {
        let designated_root = root_index == Some(i);
        let verdict = classify(&component, designated_root, canonical, &canonical_key, &held);

        if verdict == CollisionVerdict::Compliant {
            held.insert(
                normalize(&component.declared_identifier),
                component.path.clone(),
            );
        }
        classified.push(ClassifiedComponent {
            component,
            verdict,
            designated_root,
        });
    }

    Analysis {
        components: classified,
    }
}

fn classify(
    component: &Component,
    designated_root: bool,
    canonical: &CanonicalIdentifier,
    canonical_key: &str,
    held: &HashMap<String, String>,
) -> CollisionVerdict {
    use CollisionVerdict::{Compliant, Offending};

    let id = component.declared_identifier.as_str();
    if id.trim().is_empty() {
        return Offending(OffenseReason::Empty);
    }
    if !is_well_formed(id) {
        return Offending(OffenseReason::Malformed);
    }

    let key = normalize(id);
    if key == canonical_key {
        return if designated_root && canonical.is_exact(id) {
            Compliant
        } else if designated_root {
            Offending(OffenseReason::RootMismatch)
        } else if component.role.is_root() {
            Offending(OffenseReason::DuplicateRoot)
        } else {
            Offending(OffenseReason::EqualsRoot)
        };
    }

    if designated_root {
        return Offending(OffenseReason::RootMismatch);
    }
    if !canonical.is_parent_of(id) {
        return Offending(OffenseReason::ForeignPrefix);
    }
    if let Some(first) = held.get(&key) {
        return Offending(OffenseReason::Duplicate { of: first.clone() });
    }
    Compliant
}

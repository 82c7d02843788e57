// src/components/classifier.rs

//! Component role inference from bundle path conventions
//!
//! Roles are decided by the bundle suffixes along a component's path inside
//! the archive. Only the innermost bundle segment decides the role, except
//! that an `.app` is the root app only when no other bundle encloses it.

use serde::Serialize;

/// Directory suffixes that mark a bundle
const BUNDLE_SUFFIXES: &[&str] = &["app", "appex", "framework", "xctest", "bundle", "xpc"];

/// Role of a component inside an application archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    /// The top-level application bundle (`Payload/Name.app`)
    RootApp,
    /// App extensions: widgets, share sheets, notification services (`.appex`)
    Extension,
    /// Embedded frameworks (`.framework`)
    Framework,
    /// Test bundles (`.xctest`)
    TestTarget,
    /// Anything else: nested apps, unrecognised bundles
    Unknown,
}

impl ComponentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RootApp => "root_app",
            Self::Extension => "extension",
            Self::Framework => "framework",
            Self::TestTarget => "test_target",
            Self::Unknown => "unknown",
        }
    }

    /// Stem of the derived identifier suffix for this role (`ext` → `ext1`)
    pub fn tag(&self) -> &'static str {
        match self {
            Self::RootApp => "app",
            Self::Extension => "ext",
            Self::Framework => "framework",
            Self::TestTarget => "tests",
            Self::Unknown => "component",
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::RootApp)
    }
}

impl std::fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies component directories into roles
pub struct RoleClassifier;

impl RoleClassifier {
    /// Classify a component directory path (e.g. `Payload/Runner.app/PlugIns/Share.appex`)
    ///
    /// Order of checks matters - the innermost bundle wins.
    pub fn classify(component_path: &str) -> ComponentRole {
        let bundles: Vec<&str> = component_path
            .split('/')
            .filter_map(bundle_suffix)
            .filter(|suffix| BUNDLE_SUFFIXES.contains(suffix))
            .collect();

        match bundles.last() {
            Some(&"appex") => ComponentRole::Extension,
            Some(&"framework") => ComponentRole::Framework,
            Some(&"xctest") => ComponentRole::TestTarget,
            Some(&"app") if bundles.len() == 1 => ComponentRole::RootApp,
            _ => ComponentRole::Unknown,
        }
    }

    /// Whether the last path segment carries one of `suffixes`
    pub fn has_suffix(component_path: &str, suffixes: &[String]) -> bool {
        component_path
            .rsplit('/')
            .next()
            .and_then(bundle_suffix)
            .is_some_and(|suffix| suffixes.iter().any(|s| s == suffix))
    }
}

/// Extension of a path segment that looks like a bundle directory
fn bundle_suffix(segment: &str) -> Option<&str> {
    let (stem, suffix) = segment.rsplit_once('.')?;
    (!stem.is_empty() && !suffix.is_empty()).then_some(suffix)
}

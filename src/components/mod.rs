// src/components/mod.rs

//! Components of an application archive
//!
//! A component is any bundle in the archive that declares its own
//! identifier in a metadata document: the app itself, its extensions
//! (widgets, share sheets, notification services), embedded frameworks and
//! test bundles.
//!
//! # Roles
//!
//! | Role | Path convention | Rewrite tag |
//! |------|-----------------|-------------|
//! | root app | `Payload/Name.app` | `app` |
//! | extension | `*.appex` | `ext` |
//! | framework | `*.framework` | `framework` |
//! | test target | `*.xctest` | `tests` |
//! | unknown | nested `.app`, other bundles | `component` |
//!
//! # Usage
//!
//! ```ignore
//! use bundleguard::components::{discover, ComponentRole};
//!
//! let components = discover(&archive, &config)?;
//! let root = components.iter().find(|c| c.role == ComponentRole::RootApp);
//! ```

mod classifier;
mod discovery;

pub use classifier::{ComponentRole, RoleClassifier};
pub use discovery::{discover, metadata_entries, read_component, Component};

// src/components/discovery.rs

//! Component discovery
//!
//! Walks the archive for metadata documents that mark a component root and
//! reads each component's declared identifier. Discovery never modifies the
//! archive; calling it again on the same archive yields the same components.

use super::classifier::{ComponentRole, RoleClassifier};
use crate::archive::{Archive, ArchiveEntry};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::plist::{MetadataError, PlistDocument};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

/// Resource-fork noise added by macOS archivers
const MACOS_METADATA_DIR: &str = "__MACOSX/";

/// A bundle inside the archive with its own identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    /// Directory of the component within the archive
    pub path: String,
    /// Entry path of the component's metadata document
    pub metadata_path: String,
    /// Identifier declared in the metadata document (empty when missing)
    pub declared_identifier: String,
    /// Human-readable name, when the document has one
    pub display_name: Option<String>,
    pub role: ComponentRole,
}

/// Metadata documents that mark a component root, with their component directory
///
/// Lazy and side-effect free; iterate again to restart.
pub fn metadata_entries<'a>(
    archive: &'a Archive,
    config: &'a EngineConfig,
) -> impl Iterator<Item = (&'a ArchiveEntry, &'a str)> + 'a {
    archive.entries().iter().filter_map(move |entry| {
        if entry.is_dir()
            || entry.is_symlink()
            || entry.name().starts_with(MACOS_METADATA_DIR)
        {
            return None;
        }
        if entry.name().rsplit('/').next() != Some(config.metadata_filename.as_str()) {
            return None;
        }

        let Some(dir) = component_dir(entry.name()) else {
            debug!("Skipping metadata document outside any bundle: {}", entry.name());
            return None;
        };

        if !config.include_unrecognized_bundles
            && !RoleClassifier::has_suffix(dir, &config.component_suffixes)
        {
            debug!("Skipping non-component metadata document: {}", entry.name());
            return None;
        }

        Some((entry, dir))
    })
}

/// Discover every component of the archive, ordered by component path
///
/// A missing identifier key is not an error: the component is reported
/// with an empty identifier. A document that cannot be parsed is.
pub fn discover(archive: &Archive, config: &EngineConfig) -> Result<Vec<Component>> {
    let mut candidates: Vec<(&ArchiveEntry, &str)> = metadata_entries(archive, config).collect();
    candidates.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.name().cmp(b.0.name())));

    let results: Vec<Result<Component>> = if config.parallel_discovery {
        candidates
            .par_iter()
            .map(|(entry, dir)| read_component(entry, dir, config))
            .collect()
    } else {
        candidates
            .iter()
            .map(|(entry, dir)| read_component(entry, dir, config))
            .collect()
    };

    let components: Vec<Component> = results.into_iter().collect::<Result<_>>()?;
    debug!(
        "Discovered {} component(s) in {}",
        components.len(),
        archive.source().display()
    );
    Ok(components)
}

/// Read one component from its metadata document
pub fn read_component(entry: &ArchiveEntry, dir: &str, config: &EngineConfig) -> Result<Component> {
    let parse_error = |e: MetadataError| Error::ParseError {
        path: entry.name().to_string(),
        reason: e.to_string(),
    };

    let doc = PlistDocument::parse(entry.data()).map_err(parse_error)?;

    let declared_identifier = match doc.read_string(&config.identifier_key) {
        Ok(identifier) => identifier,
        Err(MetadataError::KeyNotFound(_)) => {
            debug!("{} has no {}", entry.name(), config.identifier_key);
            String::new()
        }
        Err(e @ MetadataError::WrongType { .. }) => {
            warn!("{}: {}; treating identifier as empty", entry.name(), e);
            String::new()
        }
        Err(e) => return Err(parse_error(e)),
    };

    let display_name = doc.read_string(&config.display_name_key).ok();

    Ok(Component {
        path: dir.to_string(),
        metadata_path: entry.name().to_string(),
        declared_identifier,
        display_name,
        role: RoleClassifier::classify(dir),
    })
}

/// Directory owning a metadata document
///
/// macOS-style bundles keep the document in `Contents/`; the bundle is the
/// directory above it.
fn component_dir(entry_name: &str) -> Option<&str> {
    let (parent, _) = entry_name.rsplit_once('/')?;
    match parent.rsplit_once('/') {
        Some((bundle, "Contents")) => Some(bundle),
        None if parent == "Contents" => None,
        _ => Some(parent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::path::Path;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn plist(identifier: Option<&str>) -> String {
        let id = identifier
            .map(|id| format!("<key>CFBundleIdentifier</key><string>{}</string>", id))
            .unwrap_or_default();
        format!("<plist><dict><key>CFBundleName</key><string>X</string>{}</dict></plist>", id)
    }

    fn archive(files: &[(&str, String)]) -> Archive {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        let bytes = zip.finish().unwrap().into_inner();
        Archive::from_reader(Cursor::new(bytes), Path::new("test.ipa")).unwrap()
    }

    #[test]
    fn test_component_dir() {
        assert_eq!(component_dir("Payload/A.app/Info.plist"), Some("Payload/A.app"));
        assert_eq!(component_dir("A.app/Contents/Info.plist"), Some("A.app"));
        assert_eq!(component_dir("Info.plist"), None);
        assert_eq!(component_dir("Contents/Info.plist"), None);
    }

    #[test]
    fn test_discover_orders_by_path_and_infers_roles() {
        let archive = archive(&[
            ("Payload/Runner.app/PlugIns/Widget.appex/Info.plist", plist(Some("com.acme.app.widget"))),
            ("Payload/Runner.app/Info.plist", plist(Some("com.acme.app"))),
            ("Payload/Runner.app/Frameworks/Flutter.framework/Info.plist", plist(Some("io.flutter.flutter"))),
            ("Payload/Runner.app/Runner", "binary".to_string()),
        ]);

        let components = discover(&archive, &EngineConfig::default()).unwrap();
        let summary: Vec<(&str, ComponentRole)> = components
            .iter()
            .map(|c| (c.path.as_str(), c.role))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Payload/Runner.app", ComponentRole::RootApp),
                ("Payload/Runner.app/Frameworks/Flutter.framework", ComponentRole::Framework),
                ("Payload/Runner.app/PlugIns/Widget.appex", ComponentRole::Extension),
            ]
        );
        assert_eq!(components[0].declared_identifier, "com.acme.app");
        assert_eq!(components[0].display_name, None);
    }

    #[test]
    fn test_missing_identifier_is_empty() {
        let archive = archive(&[("Payload/Runner.app/Info.plist", plist(None))]);
        let components = discover(&archive, &EngineConfig::default()).unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].declared_identifier, "");
    }

    #[test]
    fn test_wrong_typed_identifier_is_empty() {
        let archive = archive(&[(
            "Payload/Runner.app/Info.plist",
            "<plist><dict><key>CFBundleIdentifier</key><integer>7</integer></dict></plist>".to_string(),
        )]);
        let components = discover(&archive, &EngineConfig::default()).unwrap();
        assert_eq!(components[0].declared_identifier, "");
    }

    #[test]
    fn test_skips_resource_bundles_and_noise() {
        let files = [
            ("Payload/Runner.app/Info.plist", plist(Some("com.acme.app"))),
            ("Payload/Runner.app/Assets.bundle/Info.plist", plist(Some("org.cocoapods.assets"))),
            ("__MACOSX/Payload/Runner.app/._Info.plist", "junk".to_string()),
            ("__MACOSX/Payload/Runner.app/Info.plist", "junk".to_string()),
            ("Info.plist", plist(Some("stray"))),
        ];
        let archive = archive(&files);

        let config = EngineConfig::default();
        assert_eq!(metadata_entries(&archive, &config).count(), 1);

        let inclusive = EngineConfig {
            include_unrecognized_bundles: true,
            ..EngineConfig::default()
        };
        let components = discover(&archive, &inclusive).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[1].role, ComponentRole::Unknown);
    }

    #[test]
    fn test_parse_error_names_document() {
        let archive = archive(&[
            ("Payload/Runner.app/Info.plist", plist(Some("com.acme.app"))),
            ("Payload/Runner.app/PlugIns/Bad.appex/Info.plist", "<plist><dict>".to_string()),
        ]);
        for parallel in [true, false] {
            let config = EngineConfig {
                parallel_discovery: parallel,
                ..EngineConfig::default()
            };
            match discover(&archive, &config) {
                Err(Error::ParseError { path, .. }) => {
                    assert_eq!(path, "Payload/Runner.app/PlugIns/Bad.appex/Info.plist")
                }
                other => panic!("expected parse error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_discovery_is_restartable() {
        let archive = archive(&[("Payload/Runner.app/Info.plist", plist(Some("com.acme.app")))]);
        let config = EngineConfig::default();
        let first = discover(&archive, &config).unwrap();
        let second = discover(&archive, &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(archive.rewritten_entries().count(), 0);
    }
}

// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One entry of a fixture archive
pub enum Fixture {
    Dir(&'static str),
    Stored(&'static str, Vec<u8>),
    Deflated(&'static str, Vec<u8>),
    /// Symbolic link (name, target)
    Symlink(&'static str, &'static str),
}

/// Build an Apple-style XML property list
///
/// Keys are written in the order given; `None` values are skipped.
pub fn info_plist(identifier: Option<&str>, display_name: Option<&str>) -> Vec<u8> {
    let mut body = String::new();
    body.push_str("\t<key>CFBundleExecutable</key>\n\t<string>Runner</string>\n");
    if let Some(name) = display_name {
        body.push_str(&format!(
            "\t<key>CFBundleDisplayName</key>\n\t<string>{}</string>\n",
            name
        ));
    }
    if let Some(id) = identifier {
        body.push_str(&format!(
            "\t<key>CFBundleIdentifier</key>\n\t<string>{}</string>\n",
            id
        ));
    }
    body.push_str("\t<key>CFBundleVersion</key>\n\t<string>42</string>\n");
    body.push_str("\t<key>UIRequiredDeviceCapabilities</key>\n\t<array>\n\t\t<string>arm64</string>\n\t</array>\n");

    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" ",
            "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
            "<plist version=\"1.0\">\n<dict>\n{}</dict>\n</plist>\n"
        ),
        body
    )
    .into_bytes()
}

/// Serialize fixture entries into zip bytes
pub fn zip_bytes(entries: &[Fixture]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o755);
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in entries {
        match entry {
            Fixture::Dir(name) => zip.add_directory(*name, stored).unwrap(),
            Fixture::Stored(name, data) => {
                zip.start_file(*name, stored).unwrap();
                zip.write_all(data).unwrap();
            }
            Fixture::Deflated(name, data) => {
                zip.start_file(*name, deflated).unwrap();
                zip.write_all(data).unwrap();
            }
            Fixture::Symlink(name, target) => zip.add_symlink(*name, *target, stored).unwrap(),
        }
    }
    zip.finish().unwrap().into_inner()
}

/// Write a fixture archive into a fresh temp dir
///
/// Returns (TempDir, archive path) - keep the TempDir alive to prevent cleanup.
pub fn write_archive(entries: &[Fixture]) -> (TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Runner.ipa");
    fs::write(&path, zip_bytes(entries)).unwrap();
    (temp_dir, path)
}

/// A typical app: root, one widget extension, one framework and a binary
pub fn app_fixture(root_id: &str, widget_id: Option<&str>) -> Vec<Fixture> {
    vec![
        Fixture::Dir("Payload/"),
        Fixture::Dir("Payload/Runner.app/"),
        Fixture::Deflated("Payload/Runner.app/Info.plist", info_plist(Some(root_id), Some("Runner"))),
        Fixture::Stored("Payload/Runner.app/Runner", vec![0xCF, 0xFA, 0xED, 0xFE, 7, 0, 0, 1]),
        Fixture::Deflated(
            "Payload/Runner.app/Frameworks/Flutter.framework/Info.plist",
            info_plist(Some(&format!("{}.flutter", root_id)), None),
        ),
        Fixture::Deflated(
            "Payload/Runner.app/PlugIns/Widget.appex/Info.plist",
            info_plist(widget_id, Some("Widget")),
        ),
        Fixture::Deflated("Payload/Runner.app/Assets.car", b"asset catalog".to_vec()),
    ]
}

/// Names of the files in a directory, sorted
pub fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

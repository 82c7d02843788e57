// tests/pipeline.rs

//! End-to-end collision resolution runs against archives on disk.

mod common;

use bundleguard::pipeline::ArchiveLock;
use bundleguard::rewrite::plan_rewrites;
use bundleguard::{
    resolve_collisions, Analysis, Archive, CanonicalIdentifier, Engine, EngineConfig, FailureKind,
    IdentifierChange, IdentifierRewriter, PipelineState, PlistDocument, RewritePlan, Rewriter, RunRequest,
};
use common::{app_fixture, dir_listing, info_plist, write_archive, zip_bytes, Fixture};
use std::fs;

const CANONICAL: &str = "com.acme.app";
const WIDGET_PLIST: &str = "Payload/Runner.app/PlugIns/Widget.appex/Info.plist";

fn read_plist(archive: &Archive, name: &str) -> PlistDocument {
    PlistDocument::parse(archive.entry(name).unwrap().data()).unwrap()
}

/// Removes every backup next to the archive, then rewrites normally
struct BackupSweepingRewriter(IdentifierRewriter);

impl Rewriter for BackupSweepingRewriter {
    fn plan(&self, analysis: &Analysis, canonical: &CanonicalIdentifier) -> RewritePlan {
        self.0.plan(analysis, canonical)
    }

    fn apply(&self, plan: &RewritePlan, archive: &mut Archive) -> bundleguard::Result<usize> {
        let dir = archive.source().parent().unwrap().to_path_buf();
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|ext| ext == "bak") {
                fs::remove_file(&path).unwrap();
            }
        }
        self.0.apply(plan, archive)
    }
}

/// Plans like the real rewriter but never writes anything
struct NoopRewriter;

impl Rewriter for NoopRewriter {
    fn plan(&self, analysis: &Analysis, canonical: &CanonicalIdentifier) -> RewritePlan {
        plan_rewrites(analysis, canonical)
    }

    fn apply(&self, plan: &RewritePlan, _archive: &mut Archive) -> bundleguard::Result<usize> {
        Ok(plan.len())
    }
}

#[test]
fn test_clean_archive_is_untouched() {
    let (dir, path) = write_archive(&app_fixture(CANONICAL, Some("com.acme.app.widget")));
    let before = fs::read(&path).unwrap();

    let result = resolve_collisions(&path, CANONICAL, "clean-1");

    assert!(result.success, "{}", result.message);
    assert_eq!(result.final_state, PipelineState::Done);
    assert_eq!(
        result.stages,
        vec![
            PipelineState::Validating,
            PipelineState::Extracted,
            PipelineState::Analyzed,
            PipelineState::Verified,
            PipelineState::Done,
        ]
    );
    assert_eq!(result.inspected, 3);
    assert_eq!(result.rewritten, 0);
    assert!(result.changes.is_empty());
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(
        result.output_sha256.as_deref(),
        Some(bundleguard::hash::sha256(&before).as_str())
    );

    // Backup removed, only the lock file remains next to the archive
    assert!(result.backup_path.is_none());
    assert_eq!(dir_listing(dir.path()), vec![".Runner.ipa.lock", "Runner.ipa"]);
}

#[test]
fn test_extension_sharing_root_identifier() {
    let (_dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));

    let result = resolve_collisions(&path, CANONICAL, "collide-1");

    assert!(result.success, "{}", result.message);
    assert_eq!(result.rewritten, 1);
    assert_eq!(
        result.stages,
        vec![
            PipelineState::Validating,
            PipelineState::Extracted,
            PipelineState::Analyzed,
            PipelineState::Rewritten,
            PipelineState::Verified,
            PipelineState::Repacked,
            PipelineState::Done,
        ]
    );
    assert_eq!(
        result.changes,
        vec![IdentifierChange {
            component_path: "Payload/Runner.app/PlugIns/Widget.appex".to_string(),
            old_identifier: CANONICAL.to_string(),
            new_identifier: "com.acme.app.ext1".to_string(),
        }]
    );

    let archive = Archive::open(&path).unwrap();
    let widget = read_plist(&archive, WIDGET_PLIST);
    assert_eq!(widget.read_string("CFBundleIdentifier").unwrap(), "com.acme.app.ext1");
    assert_eq!(widget.read_string("CFBundleDisplayName").unwrap(), "Widget (ext1)");

    let root = read_plist(&archive, "Payload/Runner.app/Info.plist");
    assert_eq!(root.read_string("CFBundleIdentifier").unwrap(), CANONICAL);
    assert_eq!(root.read_string("CFBundleDisplayName").unwrap(), "Runner");
}

#[test]
fn test_empty_identifier_is_assigned() {
    let (_dir, path) = write_archive(&app_fixture(CANONICAL, None));

    let result = resolve_collisions(&path, CANONICAL, "empty-1");

    assert!(result.success, "{}", result.message);
    assert_eq!(result.changes[0].old_identifier, "");
    assert_eq!(result.changes[0].new_identifier, "com.acme.app.ext1");

    let archive = Archive::open(&path).unwrap();
    let widget = read_plist(&archive, WIDGET_PLIST);
    assert_eq!(widget.read_string("CFBundleIdentifier").unwrap(), "com.acme.app.ext1");
}

#[test]
fn test_untargeted_content_is_preserved() {
    let (_dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let original = Archive::open(&path).unwrap();

    let result = resolve_collisions(&path, CANONICAL, "keep-1");
    assert!(result.success, "{}", result.message);

    let rewritten = Archive::open(&path).unwrap();
    let names = |a: &Archive| a.entries().iter().map(|e| e.name().to_string()).collect::<Vec<_>>();
    assert_eq!(names(&rewritten), names(&original));

    for (before, after) in original.entries().iter().zip(rewritten.entries()) {
        assert_eq!(before.is_dir(), after.is_dir(), "{}", before.name());
        assert_eq!(before.is_stored(), after.is_stored(), "{}", before.name());
        if before.name() != WIDGET_PLIST {
            assert_eq!(before.data(), after.data(), "{} changed", before.name());
        }
    }

    // Untargeted keys keep their exact text
    let text = String::from_utf8(rewritten.entry(WIDGET_PLIST).unwrap().data().to_vec()).unwrap();
    assert!(text.contains("\t<key>CFBundleVersion</key>\n\t<string>42</string>\n"));
    assert!(text.contains("\t<array>\n\t\t<string>arm64</string>\n\t</array>\n"));
    assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE plist"));
}

#[test]
fn test_second_run_is_a_no_op() {
    let (_dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));

    let first = resolve_collisions(&path, CANONICAL, "idem-1");
    assert!(first.success, "{}", first.message);
    assert_eq!(first.rewritten, 1);
    let after_first = fs::read(&path).unwrap();

    let second = resolve_collisions(&path, CANONICAL, "idem-2");
    assert!(second.success, "{}", second.message);
    assert_eq!(second.rewritten, 0);
    assert_eq!(fs::read(&path).unwrap(), after_first);
    assert_eq!(first.output_sha256, second.output_sha256);
}

#[test]
fn test_runs_on_copies_are_deterministic() {
    let fixture = vec![
        Fixture::Deflated("Payload/Runner.app/Info.plist", info_plist(Some(CANONICAL), None)),
        Fixture::Deflated("Payload/Runner.app/PlugIns/A.appex/Info.plist", info_plist(Some(CANONICAL), Some("A"))),
        Fixture::Deflated("Payload/Runner.app/PlugIns/B.appex/Info.plist", info_plist(None, Some("B"))),
        Fixture::Deflated("Payload/Runner.app/Frameworks/Lib.framework/Info.plist", info_plist(Some("org.vendor.lib"), None)),
    ];
    let (_a, first_path) = write_archive(&fixture);
    let (_b, second_path) = write_archive(&fixture);

    let first = resolve_collisions(&first_path, CANONICAL, "det-1");
    let second = resolve_collisions(&second_path, CANONICAL, "det-2");

    assert!(first.success && second.success);
    assert_eq!(first.changes, second.changes);
    assert_eq!(first.output_sha256, second.output_sha256);

    let assigned: Vec<&str> = first.changes.iter().map(|c| c.new_identifier.as_str()).collect();
    assert_eq!(
        assigned,
        vec!["com.acme.app.framework1", "com.acme.app.ext1", "com.acme.app.ext2"]
    );
}

#[test]
fn test_output_has_no_offending_components() {
    let fixture = vec![
        Fixture::Deflated("Payload/Runner.app/Info.plist", info_plist(Some("com.other.app"), None)),
        Fixture::Deflated("Payload/Runner.app/PlugIns/A.appex/Info.plist", info_plist(Some("com.acme.app.x"), None)),
        Fixture::Deflated("Payload/Runner.app/PlugIns/B.appex/Info.plist", info_plist(Some("COM.ACME.APP.X"), None)),
        Fixture::Deflated("Payload/Runner.app/PlugIns/C.appex/Info.plist", info_plist(Some("bad..id"), None)),
        Fixture::Deflated("Payload/Runner.app/Tests.xctest/Info.plist", info_plist(Some(CANONICAL), None)),
    ];
    let (_dir, path) = write_archive(&fixture);

    let result = resolve_collisions(&path, CANONICAL, "complete-1");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.rewritten, 4);

    let report = Engine::default().scan(&path, CANONICAL).unwrap();
    assert!(report.analysis.is_clean());
    assert!(report.plan.is_empty());
    assert_eq!(report.analysis.len(), 5);
}

#[test]
fn test_rewrite_defect_fails_verification() {
    let (dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let before = fs::read(&path).unwrap();
    let diagnostics = dir.path().join("out/residuals.json");

    let engine = Engine::default().with_rewriter(Box::new(NoopRewriter));
    let request = RunRequest::new(&path, CANONICAL, "defect-1").with_diagnostics(&diagnostics);
    let result = engine.run(&request);

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::VerificationFailed));
    assert_eq!(result.final_state, PipelineState::Failed);
    assert_eq!(result.failed_stage, Some(PipelineState::Rewritten));
    assert_eq!(result.stages.last(), Some(&PipelineState::Failed));
    assert_eq!(result.rewritten, 0);
    assert_eq!(result.residual.len(), 1);
    assert_eq!(
        result.residual[0].component_path,
        "Payload/Runner.app/PlugIns/Widget.appex"
    );

    // Original untouched, backup kept and identical to it
    assert_eq!(fs::read(&path).unwrap(), before);
    let backup = result.backup_path.clone().unwrap();
    assert_eq!(fs::read(&backup).unwrap(), before);
    assert!(backup.file_name().unwrap().to_string_lossy().starts_with("Runner.ipa.defect-1."));

    assert_eq!(result.diagnostics_path.as_deref(), Some(diagnostics.as_path()));
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&diagnostics).unwrap()).unwrap();
    assert_eq!(json["correlation_token"], "defect-1");
    assert_eq!(json["residual_collisions"][0]["reason"], "equals_root");
}

#[test]
fn test_concurrent_run_is_busy() {
    let (dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let before = fs::read(&path).unwrap();

    let _held = ArchiveLock::try_acquire(&path).unwrap();
    let result = resolve_collisions(&path, CANONICAL, "busy-1");

    assert_eq!(result.failure, Some(FailureKind::Busy));
    assert!(result.backup_path.is_none());
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(dir_listing(dir.path()), vec![".Runner.ipa.lock", "Runner.ipa"]);
}

#[test]
fn test_corrupt_archive() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Runner.ipa");
    fs::write(&path, b"this is not a zip file").unwrap();

    let result = resolve_collisions(&path, CANONICAL, "corrupt-1");

    assert_eq!(result.failure, Some(FailureKind::CorruptArchive));
    assert_eq!(fs::read(&path).unwrap(), b"this is not a zip file");
    assert!(result.backup_path.unwrap().exists());
}

#[test]
fn test_truncated_zip_is_corrupt() {
    let mut bytes = zip_bytes(&app_fixture(CANONICAL, None));
    bytes.truncate(bytes.len() / 2);
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("Runner.ipa");
    fs::write(&path, &bytes).unwrap();

    let result = resolve_collisions(&path, CANONICAL, "trunc-1");
    assert_eq!(result.failure, Some(FailureKind::CorruptArchive));
    assert_eq!(fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_unparseable_metadata_document() {
    let mut fixture = app_fixture(CANONICAL, Some(CANONICAL));
    fixture.push(Fixture::Deflated(
        "Payload/Runner.app/PlugIns/Broken.appex/Info.plist",
        b"<plist><dict><key>CFBundleIdentifier</key>".to_vec(),
    ));
    let (_dir, path) = write_archive(&fixture);
    let before = fs::read(&path).unwrap();

    let result = resolve_collisions(&path, CANONICAL, "parse-1");

    assert_eq!(result.failure, Some(FailureKind::ParseError));
    assert!(result.message.contains("Broken.appex/Info.plist"));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn test_invalid_inputs() {
    let (dir, path) = write_archive(&app_fixture(CANONICAL, None));

    let malformed = resolve_collisions(&path, "com.acme.", "t1");
    assert_eq!(malformed.failure, Some(FailureKind::InvalidInput));

    let missing = resolve_collisions(dir.path().join("Missing.ipa"), CANONICAL, "t1");
    assert_eq!(missing.failure, Some(FailureKind::InvalidInput));

    // Nothing was locked or backed up
    assert_eq!(dir_listing(dir.path()), vec!["Runner.ipa"]);
}

#[test]
fn test_archive_without_components() {
    let (_dir, path) = write_archive(&[
        Fixture::Dir("Payload/"),
        Fixture::Deflated("README.txt", b"nothing here".to_vec()),
    ]);

    let result = resolve_collisions(&path, CANONICAL, "none-1");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.inspected, 0);
    assert_eq!(result.rewritten, 0);
}

#[test]
fn test_keep_backup_in_backup_dir_and_report() {
    let (dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let original = fs::read(&path).unwrap();
    let backup_dir = dir.path().join("backups");
    let report = dir.path().join("reports/run.json");

    let config = EngineConfig {
        backup_dir: Some(backup_dir.clone()),
        keep_backup: true,
        compression_level: 6,
        ..EngineConfig::default()
    };
    let request = RunRequest::new(&path, CANONICAL, "ci/job 9").with_report(&report);
    let result = Engine::new(config).run(&request);

    assert!(result.success, "{}", result.message);
    let backup = result.backup_path.clone().unwrap();
    assert!(backup.starts_with(&backup_dir));
    assert!(backup.file_name().unwrap().to_string_lossy().starts_with("Runner.ipa.ci_job_9."));
    assert_eq!(fs::read(&backup).unwrap(), original);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["rewritten"], 1);
    assert_eq!(json["final_state"], "done");
    assert_eq!(json["changes"][0]["new_identifier"], "com.acme.app.ext1");
}

#[test]
fn test_mirroring_can_be_disabled() {
    let (_dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let config = EngineConfig {
        mirror_display_name: false,
        ..EngineConfig::default()
    };

    let result = Engine::new(config).run(&RunRequest::new(&path, CANONICAL, "mirror-1"));
    assert!(result.success, "{}", result.message);

    let archive = Archive::open(&path).unwrap();
    let widget = read_plist(&archive, WIDGET_PLIST);
    assert_eq!(widget.read_string("CFBundleDisplayName").unwrap(), "Widget");
}

#[test]
fn test_scan_does_not_modify() {
    let (dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let before = fs::read(&path).unwrap();

    let report = Engine::default().scan(&path, CANONICAL).unwrap();
    assert!(!report.analysis.is_clean());
    assert_eq!(report.plan.len(), 1);
    assert_eq!(report.plan.rewrites[0].new_identifier, "com.acme.app.ext1");

    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(dir_listing(dir.path()), vec!["Runner.ipa"]);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["canonical_identifier"], CANONICAL);
}

#[test]
fn test_symlinks_survive_rewrite() {
    let mut fixture = app_fixture(CANONICAL, Some(CANONICAL));
    fixture.push(Fixture::Stored(
        "Payload/Runner.app/Frameworks/Kit.framework/Versions/A/Kit",
        b"kit binary".to_vec(),
    ));
    fixture.push(Fixture::Symlink(
        "Payload/Runner.app/Frameworks/Kit.framework/Versions/Current",
        "A",
    ));
    fixture.push(Fixture::Symlink(
        "Payload/Runner.app/Frameworks/Kit.framework/Kit",
        "Versions/Current/Kit",
    ));
    let (_dir, path) = write_archive(&fixture);

    let result = resolve_collisions(&path, CANONICAL, "links-1");
    assert!(result.success, "{}", result.message);
    assert_eq!(result.rewritten, 1);

    let archive = Archive::open(&path).unwrap();
    let current = archive
        .entry("Payload/Runner.app/Frameworks/Kit.framework/Versions/Current")
        .unwrap();
    assert!(current.is_symlink());
    assert_eq!(current.data(), b"A");
    let binary = archive.entry("Payload/Runner.app/Frameworks/Kit.framework/Kit").unwrap();
    assert!(binary.is_symlink());
    assert_eq!(binary.data(), b"Versions/Current/Kit");
    assert!(!archive
        .entry("Payload/Runner.app/Frameworks/Kit.framework/Versions/A/Kit")
        .unwrap()
        .is_symlink());
}

#[test]
fn test_backup_cleanup_failure_after_replace_is_success() {
    let (_dir, path) = write_archive(&app_fixture(CANONICAL, Some(CANONICAL)));
    let before = fs::read(&path).unwrap();

    let rewriter = BackupSweepingRewriter(IdentifierRewriter::new(&EngineConfig::default()));
    let engine = Engine::default().with_rewriter(Box::new(rewriter));
    let result = engine.run(&RunRequest::new(&path, CANONICAL, "sweep-1"));

    // The archive was replaced, so the run reports what it persisted
    assert!(result.success, "{}", result.message);
    assert_eq!(result.final_state, PipelineState::Done);
    assert_eq!(result.rewritten, 1);
    assert_ne!(fs::read(&path).unwrap(), before);
    assert!(result.output_sha256.is_some());

    // The failed removal leaves the backup path reported
    let backup = result.backup_path.unwrap();
    assert!(backup.file_name().unwrap().to_string_lossy().starts_with("Runner.ipa.sweep-1."));
}

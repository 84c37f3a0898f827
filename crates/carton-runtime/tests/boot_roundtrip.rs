//! Full lifecycle: pack a project, patch a host binary, boot the result.

use std::fs;
use std::path::PathBuf;

use carton_pack::collect::FileFilter;
use carton_pack::descriptor::ProjectDescriptor;
use carton_pack::packer::{pack, write_native};
use carton_pack::patch::{package_marker, version_marker, VERSION_BODY_SIZE};
use carton_runtime::{
    BootOptions, BootStatus, Loader, Location, ResolvedStartup, ScriptEngine,
};

struct RecordingEngine;

impl ScriptEngine for RecordingEngine {
    fn execute(&self, startup: &ResolvedStartup) -> Result<i32, String> {
        assert_eq!(startup.virtual_path, "main.js");
        assert_eq!(startup.source, b"require('dep');");
        Ok(0)
    }
}

fn make_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("node_modules/dep")).unwrap();
    fs::create_dir_all(root.join("assets")).unwrap();
    fs::write(root.join("main.js"), "require('dep');").unwrap();
    fs::write(root.join("dep.js"), "shadowed by the package").unwrap();
    fs::write(root.join("node_modules/dep/index.js"), "the package").unwrap();
    fs::write(root.join("assets/logo.bin"), [9u8, 9, 9]).unwrap();
    dir
}

fn make_host(path: &PathBuf) {
    let mut host = vec![0x90u8; 5_000];
    host.extend_from_slice(&version_marker());
    host.extend_from_slice(&[b'_'; VERSION_BODY_SIZE]);
    host.extend_from_slice(&[0x90; 200]);
    host.extend_from_slice(&package_marker());
    host.extend_from_slice(&[0x90; 1_000]);
    fs::write(path, host).unwrap();
}

fn build_package(descriptor_json: &str) -> (tempfile::TempDir, PathBuf) {
    let project = make_project();
    let descriptor = ProjectDescriptor::from_str(descriptor_json).unwrap();
    let output = pack(project.path(), descriptor, &FileFilter::empty()).unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let host = out_dir.path().join("carton-host");
    make_host(&host);
    let target = write_native(&output, out_dir.path(), &host).unwrap();
    (out_dir, target)
}

#[test]
fn boot_from_patched_binary() {
    let (_out_dir, target) = build_package(
        r#"{"name": "demo", "version": "1.2.3", "startup": "main.js", "native": true}"#,
    );

    let loader = Loader::from_file(&target).unwrap();
    assert_eq!(loader.archive().manifest.version, "1.2.3");

    let outcome = loader
        .boot(&BootOptions::default(), &RecordingEngine)
        .unwrap();
    assert_eq!(outcome.status, BootStatus::Executed(0));
    assert!(outcome.warnings.is_empty());
}

#[test]
fn resolution_precedence_survives_packing() {
    let (_out_dir, target) = build_package(
        r#"{"name": "demo", "startup": "main.js", "native": true}"#,
    );
    let loader = Loader::from_file(&target).unwrap();
    loader
        .boot(&BootOptions::default(), &RecordingEngine)
        .unwrap();

    let resolver = loader.resolver();

    // Bare request prefers the node_modules package over the virtual file.
    let bare = resolver.resolve(".", "dep").unwrap();
    assert_eq!(bare.path, "node_modules/dep/index.js");
    assert_eq!(bare.location, Location::Embedded);

    // The explicit path still reaches the shadowed virtual file.
    let literal = resolver.resolve(".", "./dep").unwrap();
    assert_eq!(literal.path, "dep.js");
}

#[test]
fn extraction_policy_applies_on_boot() {
    let (out_dir, target) = build_package(
        r#"{
            "name": "demo",
            "startup": "main.js",
            "native": true,
            "extract": {"what": ["*.bin"], "where": "data"}
        }"#,
    );

    let loader = Loader::from_file(&target).unwrap();
    let outcome = loader
        .boot(&BootOptions::default(), &RecordingEngine)
        .unwrap();
    assert_eq!(outcome.status, BootStatus::Executed(0));

    // Only the matching asset landed on disk; sources stay embedded.
    assert!(out_dir.path().join("data/assets/logo.bin").exists());
    assert!(!out_dir.path().join("data/main.js").exists());

    // A second boot skips the already-extracted file.
    let again = Loader::from_file(&target).unwrap();
    again
        .boot(&BootOptions::default(), &RecordingEngine)
        .unwrap();
    assert_eq!(
        fs::read(out_dir.path().join("data/assets/logo.bin")).unwrap(),
        [9, 9, 9]
    );
}

#[test]
fn in_place_extraction_lands_next_to_executable() {
    let (out_dir, target) = build_package(
        r#"{
            "name": "demo",
            "startup": "main.js",
            "native": true,
            "extract": {"what": ["*.bin"], "where": "./"}
        }"#,
    );

    let loader = Loader::from_file(&target).unwrap();
    let outcome = loader
        .boot(&BootOptions::default(), &RecordingEngine)
        .unwrap();
    assert_eq!(outcome.status, BootStatus::Executed(0));

    // The asset lands beside the executable; the startup stays embedded,
    // which RecordingEngine checks by reading the packed source.
    assert_eq!(
        fs::read(out_dir.path().join("assets/logo.bin")).unwrap(),
        [9, 9, 9]
    );
    assert!(!out_dir.path().join("main.js").exists());
}

#[test]
fn standalone_archive_loads_without_patching() {
    let project = make_project();
    let descriptor = ProjectDescriptor::from_str(
        r#"{"name": "demo", "startup": "main.js"}"#,
    )
    .unwrap();
    let output = pack(project.path(), descriptor, &FileFilter::empty()).unwrap();

    let out_dir = tempfile::tempdir().unwrap();
    let path = carton_pack::packer::write_archive(&output, out_dir.path()).unwrap();

    let loader = Loader::from_file(&path).unwrap();
    let outcome = loader
        .boot(&BootOptions::default(), &RecordingEngine)
        .unwrap();
    assert_eq!(outcome.status, BootStatus::Executed(0));
}

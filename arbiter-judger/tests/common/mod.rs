#![allow(dead_code)]

use arbiter_judger::system::backend::LocalBackend;
use arbiter_judger::system::identity::IdentityPolicy;
use arbiter_judger::System;
use arbiter_utils::tracing::setup_tracing;

use std::fs;
use std::path::Path;
use std::sync::Once;

use tempfile::TempDir;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        setup_tracing();
    });
}

/// A system over a fresh output root. Keep the `TempDir` alive while the system is used.
pub fn system() -> (TempDir, System) {
    init();
    let dir = tempfile::tempdir().unwrap();
    let system = System::new(dir.path(), Box::new(LocalBackend::new()))
        .unwrap()
        .with_identity_policy(IdentityPolicy::SkipUnprivileged);
    (dir, system)
}

pub fn write(system: &System, relative: &str, content: &str) {
    let path = system.output_directory().join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

pub fn read(system: &System, relative: impl AsRef<Path>) -> String {
    fs::read_to_string(system.output_directory().join(relative)).unwrap()
}

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

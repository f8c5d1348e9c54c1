//! Shared test utilities for archlive tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use archlive::config::Config;
use archlive::pipeline::{Pipeline, Step};

/// Test environment with a project directory and a fake archiso profile.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Base directory (project root simulation)
    pub base_dir: PathBuf,
    /// Fake `/usr/share/archiso/configs/releng`
    pub releng: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with temporary directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().join("project");
        let releng = temp_dir.path().join("releng");
        fs::create_dir_all(&base_dir).expect("Failed to create project dir");
        create_mock_releng(&releng);

        Self {
            _temp_dir: temp_dir,
            base_dir,
            releng,
        }
    }

    /// Configuration pointing every directory into the temp tree.
    pub fn config(&self) -> Config {
        self.config_with(&[])
    }

    pub fn config_with(&self, extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = HashMap::new();
        vars.insert(
            "ARCHLIVE_ARCHISO_CONFIG".into(),
            self.releng.to_string_lossy().into_owned(),
        );
        vars.insert("ARCHLIVE_DOWNLOAD_DIR".into(), "cache".into());
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Config::from_vars(&self.base_dir, &vars).expect("Failed to build config")
    }
}

/// Create a minimal archiso profile resembling releng.
pub fn create_mock_releng(dir: &Path) {
    fs::create_dir_all(dir.join("airootfs/etc/systemd/system/getty@tty1.service.d"))
        .expect("Failed to create releng dirs");
    fs::create_dir_all(dir.join("syslinux")).expect("Failed to create syslinux dir");

    fs::write(
        dir.join("profiledef.sh"),
        r#"#!/usr/bin/env bash
# shellcheck disable=SC2034

iso_name="archlinux"
iso_label="ARCH_$(date --date="@${SOURCE_DATE_EPOCH:-$(date +%s)}" +%Y%m)"
iso_publisher="Arch Linux <https://archlinux.org>"
iso_application="Arch Linux Live/Rescue DVD"
iso_version="$(date --date="@${SOURCE_DATE_EPOCH:-$(date +%s)}" +%Y.%m.%d)"
install_dir="arch"
buildmodes=('iso')
bootmodes=('bios.syslinux.mbr' 'bios.syslinux.eltorito'
           'uefi-x64.systemd-boot.esp' 'uefi-x64.systemd-boot.eltorito')
arch="x86_64"
pacman_conf="pacman.conf"
airootfs_image_type="squashfs"
file_permissions=(
  ["/etc/shadow"]="0:0:400"
  ["/root"]="0:0:750"
)
"#,
    )
    .expect("Failed to write profiledef.sh");

    fs::write(
        dir.join("packages.x86_64"),
        "alsa-utils\narch-install-scripts\nbase\ncryptsetup\nlinux\nsyslinux\nzsh\n",
    )
    .expect("Failed to write packages.x86_64");

    fs::write(
        dir.join("pacman.conf"),
        "[options]\nHoldPkg     = pacman glibc\nArchitecture = auto\nParallelDownloads = 5\n\n[core]\nInclude = /etc/pacman.d/mirrorlist\n\n[extra]\nInclude = /etc/pacman.d/mirrorlist\n",
    )
    .expect("Failed to write pacman.conf");

    fs::write(
        dir.join("airootfs/etc/systemd/system/getty@tty1.service.d/autologin.conf"),
        "[Service]\nExecStart=\nExecStart=-/sbin/agetty -o '-p -f -- \\\\u' --noclear --autologin root - $TERM\n",
    )
    .expect("Failed to write autologin.conf");

    fs::write(dir.join("syslinux/syslinux.cfg"), "DEFAULT select\n")
        .expect("Failed to write syslinux.cfg");
}

/// Contents of the first `WriteFile` step targeting `path`.
pub fn written_file<'a>(pipeline: &'a Pipeline, path: &Path) -> &'a str {
    pipeline
        .steps()
        .find_map(|step| match step {
            Step::WriteFile { path: p, contents, .. } if p == path => Some(contents.as_str()),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no write of {} in:\n{}", path.display(), pipeline.describe()))
}

/// Index of the first step whose description contains `needle`.
pub fn step_index(pipeline: &Pipeline, needle: &str) -> usize {
    pipeline
        .position(needle)
        .unwrap_or_else(|| panic!("step '{}' missing from:\n{}", needle, pipeline.describe()))
}

/// Assert that a symlink exists and points to the expected target.
pub fn assert_symlink(path: &Path, expected_target: &str) {
    assert!(
        path.is_symlink(),
        "Expected symlink at {}, but it's not a symlink",
        path.display()
    );

    let target = fs::read_link(path).expect("Failed to read symlink");
    assert_eq!(
        target.to_string_lossy(),
        expected_target,
        "Symlink {} points to {:?}, expected {}",
        path.display(),
        target,
        expected_target
    );
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

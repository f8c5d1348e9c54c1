//! Host environment checks (privileges, directories, disk space).

use std::path::Path;

use crate::config::Config;
use crate::process::{self, Cmd};

use super::types::CheckResult;
use super::Target;

/// Below this much free space in the work directory, warn.
pub const MIN_FREE_GB: u64 = 20;

/// Check the operation can run in this environment.
pub fn check_environment(target: Target, config: &Config) -> Vec<CheckResult> {
    let mut results = vec![check_root()];

    if matches!(target, Target::Iso | Target::All) {
        results.push(check_archiso_profile(&config.archiso_config));
    }
    if matches!(target, Target::Zfs | Target::All) {
        results.push(check_chroot(&config.chroot_dir));
        if let Some(dir) = &config.zfs_recipe_dir {
            results.push(check_recipe_dir(dir));
        }
    }

    results.push(check_writable("output directory", &config.output_dir));
    results.push(check_disk_space(&config.work_dir));
    results
}

/// Every operation mounts, partitions or builds chroots: root is required.
pub fn check_root() -> CheckResult {
    if process::is_root() {
        CheckResult::pass("root privileges")
    } else {
        CheckResult::fail("root privileges", "Run archlive as root (e.g. with sudo)")
    }
}

fn check_archiso_profile(profile: &Path) -> CheckResult {
    let name = "archiso profile";
    let required = ["profiledef.sh", "packages.x86_64", "pacman.conf", "airootfs"];
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|f| !profile.join(f).exists())
        .collect();
    if missing.is_empty() {
        CheckResult::pass_with(name, &profile.display().to_string())
    } else if !profile.exists() {
        CheckResult::fail(
            name,
            &format!("{} not found - install the 'archiso' package", profile.display()),
        )
    } else {
        CheckResult::fail(
            name,
            &format!("{} is missing {}", profile.display(), missing.join(", ")),
        )
    }
}

fn check_chroot(chroot: &Path) -> CheckResult {
    let name = "build chroot";
    if chroot.join("root/.arch-chroot").exists() {
        CheckResult::pass_with(name, &format!("{} (will be updated)", chroot.display()))
    } else {
        CheckResult::skip(name, &format!("{} will be created", chroot.display()))
    }
}

fn check_recipe_dir(dir: &Path) -> CheckResult {
    let name = "PKGBUILD templates";
    if dir.is_dir() {
        CheckResult::pass_with(name, &dir.display().to_string())
    } else {
        CheckResult::fail(
            name,
            &format!("ARCHLIVE_ZFS_RECIPE_DIR {} is not a directory", dir.display()),
        )
    }
}

fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let test_file = dir.join(".preflight-test");
    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_file);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

/// Free space under `dir` (or its nearest existing ancestor).
fn check_disk_space(dir: &Path) -> CheckResult {
    let probe = dir
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"));
    let result = Cmd::new("df")
        .args(["--output=avail", "-B1"])
        .arg_path(probe)
        .allow_fail()
        .run();
    match result {
        Ok(r) if r.success() => match parse_df_avail(&r.stdout) {
            Some(bytes) => disk_space_result(bytes),
            None => CheckResult::warn("disk space", "Could not parse df output"),
        },
        _ => CheckResult::warn("disk space", "df failed"),
    }
}

/// Available bytes from `df --output=avail -B1` output.
pub fn parse_df_avail(output: &str) -> Option<u64> {
    output.lines().nth(1)?.trim().parse().ok()
}

fn disk_space_result(avail_bytes: u64) -> CheckResult {
    let free_gb = avail_bytes / (1024 * 1024 * 1024);
    if free_gb < MIN_FREE_GB {
        CheckResult::warn(
            "disk space",
            &format!("{}GB free - builds need about {}GB", free_gb, MIN_FREE_GB),
        )
    } else {
        CheckResult::pass_with("disk space", &format!("{}GB free", free_gb))
    }
}

//! Mount-aware directory removal.
//!
//! `remove_dir_all` crosses mount points. A killed mkarchiso or a failed USB
//! install can leave `/proc`, `/dev` or a device mounted inside the work
//! directory, so every recursive removal goes through [`remove_tree`].

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Mount points at or below `dir`, from `/proc/self/mounts` contents.
pub fn mounts_under(mounts: &str, dir: &Path) -> Vec<PathBuf> {
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        // /proc/mounts escapes spaces as \040
        .map(|m| PathBuf::from(m.replace("\\040", " ")))
        .filter(|m| m.starts_with(dir))
        .collect()
}

/// Fail when `mounts` lists anything at or below `dir`.
pub fn check_unmounted(mounts: &str, dir: &Path) -> Result<()> {
    let busy = mounts_under(mounts, dir);
    if busy.is_empty() {
        return Ok(());
    }
    let list: Vec<String> = busy.iter().map(|m| format!("  {}", m.display())).collect();
    bail!(
        "Refusing to remove {}: still mounted:\n{}\nUnmount them first.",
        dir.display(),
        list.join("\n")
    );
}

/// [`check_unmounted`] against the live mount table.
pub fn ensure_unmounted(dir: &Path) -> Result<()> {
    let mounts = fs::read_to_string(PROC_MOUNTS)
        .with_context(|| format!("Failed to read {}", PROC_MOUNTS))?;
    // the mount table holds resolved paths
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    check_unmounted(&mounts, &dir)
}

/// `remove_dir_all`, refused while anything is mounted inside `dir`.
pub fn remove_tree(dir: &Path) -> Result<()> {
    ensure_unmounted(dir)?;
    fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))
}

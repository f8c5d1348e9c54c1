//! Removing work, output and download directories.

use anyhow::Result;
use std::path::Path;

use crate::common::{ensure_unmounted, remove_tree};
use crate::config::Config;

/// Remove `dir` and report it. Missing directories are a no-op.
///
/// Refuses while anything is mounted inside it: a leftover USB or chroot
/// mount would otherwise have its contents deleted.
fn remove_dir(label: &str, dir: &Path) -> Result<bool> {
    if !dir.exists() {
        println!("  [SKIP] {} ({}) does not exist", label, dir.display());
        return Ok(false);
    }

    ensure_unmounted(dir)?;
    println!("Removing {} ({})...", label, dir.display());
    remove_tree(dir)?;
    tracing::info!(dir = %dir.display(), "removed");
    Ok(true)
}

/// Work directory: prepared profiles, mkarchiso scratch, mount points and
/// the build chroot.
pub fn clean_work(config: &Config) -> Result<()> {
    remove_dir("work directory", &config.work_dir)?;
    if !config.chroot_dir.starts_with(&config.work_dir) {
        remove_dir("build chroot", &config.chroot_dir)?;
    }
    Ok(())
}

/// Built ISOs, checksums and the local ZFS repository.
pub fn clean_output(config: &Config) -> Result<()> {
    remove_dir("output directory", &config.output_dir)?;
    Ok(())
}

/// Cached ZFS sources and kernel headers.
pub fn clean_downloads(config: &Config) -> Result<()> {
    remove_dir("download cache", &config.download_dir)?;
    Ok(())
}

pub fn clean_all(config: &Config) -> Result<()> {
    clean_work(config)?;
    clean_output(config)?;
    clean_downloads(config)?;
    println!("Clean complete.");
    Ok(())
}

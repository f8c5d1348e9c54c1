//! Utilities for managing temporary work directories.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::mounts::remove_tree;

/// Prepare a work directory, removing it if it exists and creating it fresh.
///
/// # Example
/// ```ignore
/// let profile_dir = prepare_work_dir(&config.work_dir, "profile")?;
/// // profile_dir is ready to use, empty and fresh
/// ```
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> Result<PathBuf> {
    let work_dir = parent_dir.join(name);

    if work_dir.exists() {
        remove_tree(&work_dir).context("Cannot reset the work directory")?;
    }

    fs::create_dir_all(&work_dir)
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;

    Ok(work_dir)
}

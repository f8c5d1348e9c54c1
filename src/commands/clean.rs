//! Clean command - removes work, output and download directories.

use anyhow::Result;

use crate::clean;
use crate::config::Config;

/// Clean target for the clean command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanTarget {
    /// Work directory and build chroot (default)
    #[default]
    Work,
    /// Built ISOs and the local ZFS repository
    Output,
    /// Download cache
    Downloads,
    /// Everything
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    match target {
        CleanTarget::Work => clean::clean_work(config)?,
        CleanTarget::Output => clean::clean_output(config)?,
        CleanTarget::Downloads => clean::clean_downloads(config)?,
        CleanTarget::All => clean::clean_all(config)?,
    }
    Ok(())
}

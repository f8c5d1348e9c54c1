//! `zfs build` command.

use anyhow::Result;

use crate::config::Config;
use crate::zfs::{self, ZfsOptions};

pub fn cmd_zfs_build(config: &Config, options: &ZfsOptions) -> Result<()> {
    let packages = zfs::build_zfs(config, options)?;
    tracing::info!(count = packages.len(), "zfs packages published");
    Ok(())
}

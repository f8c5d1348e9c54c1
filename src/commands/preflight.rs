//! Preflight command - runs preflight checks.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::preflight::{self, Target};

/// Execute the preflight command.
pub fn cmd_preflight(
    config: &Config,
    target: Target,
    device: Option<&Path>,
    strict: bool,
) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(target, config, device)?;
    } else {
        let report = preflight::run_preflight(target, config, device);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to exit with an error.");
        }
    }
    Ok(())
}

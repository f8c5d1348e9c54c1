//! Preflight checks for archlive operations.
//!
//! Validates privileges, host tools, packages and the target device before
//! anything is built or written. Run with `archlive preflight [iso|usb|zfs]`.

mod environment;
mod host_tools;
mod types;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::usb;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Which operation to check for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    Iso,
    Usb,
    Zfs,
    #[default]
    All,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Target::Iso => "iso",
            Target::Usb => "usb",
            Target::Zfs => "zfs",
            Target::All => "all",
        })
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "iso" => Ok(Target::Iso),
            "usb" => Ok(Target::Usb),
            "zfs" => Ok(Target::Zfs),
            "all" => Ok(Target::All),
            other => bail!("Unknown preflight target '{}'. Choose iso, usb, zfs or all", other),
        }
    }
}

/// Run all preflight checks for `target`.
pub fn run_preflight(target: Target, config: &Config, device: Option<&Path>) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks ({})...\n", target);

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools(target));

    println!("Checking packages...");
    checks.extend(host_tools::check_packages(target));

    println!("Checking environment...");
    checks.extend(environment::check_environment(target, config));

    if matches!(target, Target::Usb | Target::All) {
        checks.push(check_target_device(config, device));
    }

    println!();

    PreflightReport { checks }
}

fn check_target_device(config: &Config, device: Option<&Path>) -> CheckResult {
    let Some(device) = device else {
        return CheckResult::skip("target device", "no --device given");
    };
    let name = format!("target device {}", device.display());
    match usb::validate_device(device, config.min_device_bytes()) {
        Ok(validated) if validated.warnings.is_empty() => {
            CheckResult::pass_with(&name, &validated.device.summary())
        }
        Ok(validated) => CheckResult::warn(&name, &validated.warnings.join("; ")),
        Err(e) => CheckResult::fail(&name, &e.to_string()),
    }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(target: Target, config: &Config, device: Option<&Path>) -> Result<()> {
    let report = run_preflight(target, config, device);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above first.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

//! Show command - displays information.

use anyhow::Result;

use crate::config::Config;
use crate::profile::IsoProfile;
use crate::usb::device::format_size;
use crate::usb::{self, BlockDevice};

/// Show target for the show command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// List ISO profiles
    Profiles,
    /// List whole-disk block devices
    Devices,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Profiles => {
            println!("ISO profiles:");
            for profile in IsoProfile::all() {
                let marker = if *profile == config.default_profile { "*" } else { " " };
                println!(
                    " {} {:<9} {:<36} {}",
                    marker,
                    profile.name(),
                    profile.description(),
                    profile.display_manager().unwrap_or("-")
                );
            }
            println!("\n* default (ARCHLIVE_PROFILE)");
        }
        ShowTarget::Devices => {
            let disks = usb::list_disks()?;
            if disks.is_empty() {
                println!("No block devices found.");
                return Ok(());
            }
            println!("{:<14} {:>9}  {:<6} {:<3} MODEL", "DEVICE", "SIZE", "TRAN", "RM");
            for disk in &disks {
                println!("{}", device_row(disk));
            }
        }
    }
    Ok(())
}

fn device_row(disk: &BlockDevice) -> String {
    format!(
        "{:<14} {:>9}  {:<6} {:<3} {}",
        disk.dev_path().display(),
        format_size(disk.size),
        disk.tran.as_deref().unwrap_or("-"),
        if disk.rm { "yes" } else { "no" },
        disk.model_or_unknown()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_row() {
        let disks = usb::parse_lsblk(
            r#"{"blockdevices":[{"name":"sdb","path":"/dev/sdb","type":"disk","size":"16008609792","rm":true,"tran":"usb","model":"Cruzer Blade  "}]}"#,
        )
        .unwrap();
        let row = device_row(&disks[0]);
        assert!(row.starts_with("/dev/sdb"));
        assert!(row.contains("usb"));
        assert!(row.contains("yes"));
        assert!(row.ends_with("Cruzer Blade"));
    }
}

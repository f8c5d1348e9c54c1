//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `iso` - Build a live ISO
//! - `usb` - Write a persistent USB install
//! - `zfs` - Rebuild ZFS packages for a kernel
//! - `preflight` - Run preflight checks
//! - `clean` - Remove work, output and download directories
//! - `show` - Display information

pub mod clean;
mod iso;
mod preflight;
pub mod show;
mod usb;
mod zfs;

pub use clean::cmd_clean;
pub use iso::cmd_iso_build;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
pub use usb::cmd_usb_write;
pub use zfs::cmd_zfs_build;

//! `usb write` command.

use anyhow::Result;

use crate::config::Config;
use crate::usb::{self, UsbOptions};

pub fn cmd_usb_write(config: &Config, options: &UsbOptions) -> Result<()> {
    tracing::info!(device = %options.device.display(), dry_run = options.dry_run, "usb write");
    usb::write_usb(config, options)
}

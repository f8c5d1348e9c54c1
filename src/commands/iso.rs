//! `iso build` command.

use anyhow::Result;

use crate::config::Config;
use crate::iso::{self, IsoOptions};

pub fn cmd_iso_build(config: &Config, options: &IsoOptions) -> Result<()> {
    match iso::build_iso(config, options)? {
        Some(_) => println!("Write it to a stick: archlive usb write --device /dev/sdX"),
        None => println!("\nDry run complete, nothing was built."),
    }
    Ok(())
}

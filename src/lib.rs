//! archlive library.
//!
//! Builds Arch Linux live ISOs from archiso profiles, installs them
//! persistently onto USB sticks, and rebuilds ZFS packages for a given
//! kernel. The binary in `main.rs` is a thin clap front end over
//! [`commands`].

pub mod clean;
pub mod commands;
pub mod common;
pub mod config;
pub mod download;
pub mod iso;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod profile;
pub mod timing;
pub mod usb;
pub mod zfs;

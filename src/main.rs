//! archlive - Arch Linux live ISO builder, persistent USB writer and ZFS
//! package builder.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use archlive::commands::{self, clean::CleanTarget, show::ShowTarget};
use archlive::config::Config;
use archlive::iso::IsoOptions;
use archlive::preflight::Target;
use archlive::profile::IsoProfile;
use archlive::usb::{Filesystem, UsbOptions};
use archlive::zfs::{KernelFlavor, ZfsOptions};

#[derive(Parser)]
#[command(name = "archlive")]
#[command(about = "Arch Linux live ISO builder")]
#[command(
    after_help = "QUICK START:\n  archlive preflight                     Check host tools and packages\n  archlive zfs build                     Build ZFS packages for the current kernel\n  archlive iso build --zfs               Build a live ISO\n  archlive usb write --device /dev/sdX   Install it persistently to a USB stick\n  archlive clean                         Remove the work directory"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build live ISOs
    Iso {
        #[command(subcommand)]
        action: IsoAction,
    },

    /// Write persistent USB installs
    Usb {
        #[command(subcommand)]
        action: UsbAction,
    },

    /// Build ZFS packages for a kernel
    Zfs {
        #[command(subcommand)]
        action: ZfsAction,
    },

    /// Run preflight checks (verify host tools before building)
    Preflight {
        /// Which operation to check for (default: all)
        #[arg(value_parser = clap::value_parser!(Target))]
        target: Option<Target>,
        /// Also validate this device as a USB target
        #[arg(long)]
        device: Option<PathBuf>,
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowWhat,
    },

    /// Remove build artifacts (default: work directory)
    Clean {
        #[command(subcommand)]
        what: Option<CleanWhat>,
    },
}

#[derive(Subcommand)]
enum IsoAction {
    /// Build a live ISO with mkarchiso
    Build {
        /// ISO profile (default: ARCHLIVE_PROFILE)
        #[arg(long, value_parser = clap::value_parser!(IsoProfile))]
        profile: Option<IsoProfile>,
        /// Include ZFS packages
        #[arg(long)]
        zfs: bool,
        /// Local repository with ZFS packages (implies --zfs)
        #[arg(long)]
        zfs_repo: Option<PathBuf>,
        /// Keep the prepared profile and mkarchiso work files
        #[arg(long)]
        keep_work: bool,
        /// Print what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum UsbAction {
    /// Install the live system persistently onto a USB device (ERASES IT)
    Write {
        /// Target device, e.g. /dev/sdb
        #[arg(long)]
        device: PathBuf,
        /// ISO to install (default: newest ISO in the output directory)
        #[arg(long)]
        iso: Option<PathBuf>,
        /// Put the root filesystem inside LUKS
        #[arg(long)]
        encrypt: bool,
        /// Root filesystem
        #[arg(long, default_value = "ext4", value_parser = clap::value_parser!(Filesystem))]
        filesystem: Filesystem,
        /// Hostname of the installed system (default: ARCHLIVE_HOSTNAME)
        #[arg(long)]
        hostname: Option<String>,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
        /// Print what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ZfsAction {
    /// Build zfs-utils and the kernel module package in a clean chroot
    Build {
        /// Kernel version as pkgver-pkgrel (default: repository version)
        #[arg(long)]
        kernel: Option<String>,
        /// Kernel package flavor
        #[arg(long, default_value = "linux", value_parser = clap::value_parser!(KernelFlavor))]
        flavor: KernelFlavor,
        /// OpenZFS release (default: ARCHLIVE_ZFS_VERSION)
        #[arg(long)]
        zfs_version: Option<String>,
        /// Do not check the release signature
        #[arg(long)]
        skip_verify: bool,
        /// Print what would be done without doing it
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ShowWhat {
    /// Show current configuration
    Config,
    /// List ISO profiles
    Profiles,
    /// List block devices
    Devices,
}

#[derive(Subcommand)]
enum CleanWhat {
    /// Work directory and build chroot
    Work,
    /// Built ISOs and the local ZFS repository
    Output,
    /// Download cache
    Downloads,
    /// Everything
    All,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "archlive=debug",
        _ => "archlive=trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let base_dir = std::env::current_dir().context("Cannot determine current directory")?;
    let config = Config::load(&base_dir)?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Iso {
            action:
                IsoAction::Build {
                    profile,
                    zfs,
                    zfs_repo,
                    keep_work,
                    dry_run,
                },
        } => {
            let options = IsoOptions {
                profile: profile.unwrap_or(config.default_profile),
                zfs: zfs || zfs_repo.is_some(),
                zfs_repo,
                keep_work,
                dry_run,
            };
            commands::cmd_iso_build(&config, &options)?;
        }

        Commands::Usb {
            action:
                UsbAction::Write {
                    device,
                    iso,
                    encrypt,
                    filesystem,
                    hostname,
                    yes,
                    dry_run,
                },
        } => {
            let options = UsbOptions {
                device,
                iso,
                encrypt,
                filesystem,
                hostname,
                yes,
                dry_run,
            };
            commands::cmd_usb_write(&config, &options)?;
        }

        Commands::Zfs {
            action:
                ZfsAction::Build {
                    kernel,
                    flavor,
                    zfs_version,
                    skip_verify,
                    dry_run,
                },
        } => {
            let options = ZfsOptions {
                kernel,
                flavor,
                zfs_version,
                skip_verify,
                dry_run,
            };
            commands::cmd_zfs_build(&config, &options)?;
        }

        Commands::Preflight {
            target,
            device,
            strict,
        } => {
            commands::cmd_preflight(
                &config,
                target.unwrap_or_default(),
                device.as_deref(),
                strict,
            )?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowWhat::Config => ShowTarget::Config,
                ShowWhat::Profiles => ShowTarget::Profiles,
                ShowWhat::Devices => ShowTarget::Devices,
            };
            commands::cmd_show(&config, show_target)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None | Some(CleanWhat::Work) => CleanTarget::Work,
                Some(CleanWhat::Output) => CleanTarget::Output,
                Some(CleanWhat::Downloads) => CleanTarget::Downloads,
                Some(CleanWhat::All) => CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }
    }

    Ok(())
}

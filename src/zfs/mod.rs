//! ZFS package builder.
//!
//! ZFS lives outside the kernel tree, so its module package has to be rebuilt
//! for every kernel release. This builds `zfs-utils` and `zfs-<kernel>` in a
//! devtools clean chroot against the exact headers of the target kernel and
//! publishes them as a local pacman repository (`<output>/zfs`) that
//! `archlive iso build --zfs` picks up.

pub mod kernel;
pub mod pkgbuild;
pub mod plan;
pub mod source;

pub use kernel::{KernelFlavor, KernelVersion};
pub use plan::{build_pipeline, BuildLayout};

use anyhow::Result;
use std::path::PathBuf;

use crate::common::prepare_work_dir;
use crate::config::Config;
use crate::pipeline::Executor;
use crate::preflight::{self, Target};
use pkgbuild::{load_template, render_kernel, render_utils, write_build_dir, BuildSpec};

/// Options of `archlive zfs build`.
#[derive(Debug, Clone, Default)]
pub struct ZfsOptions {
    /// Target kernel as `pkgver-pkgrel`; the repository version when absent.
    pub kernel: Option<String>,
    pub flavor: KernelFlavor,
    /// OpenZFS release; the configured default when absent.
    pub zfs_version: Option<String>,
    pub skip_verify: bool,
    pub dry_run: bool,
}

/// `archlive zfs build`. Returns the published package files.
pub fn build_zfs(config: &Config, options: &ZfsOptions) -> Result<Vec<PathBuf>> {
    println!("=== Building ZFS packages ===\n");

    if !options.dry_run {
        preflight::run_preflight_or_fail(Target::Zfs, config, None)?;
    }

    let flavor = options.flavor;
    let kernel = match &options.kernel {
        Some(version) => KernelVersion::parse(version)?,
        None => {
            let version = kernel::repository_version(flavor)?;
            println!("No --kernel given, using repository {} {}", flavor, version);
            version
        }
    };
    let zfs_version = options
        .zfs_version
        .clone()
        .unwrap_or_else(|| config.zfs_version.clone());

    println!("OpenZFS: {}", zfs_version);
    println!(
        "Kernel:  {} {} (modules in /usr/lib/modules/{})\n",
        flavor,
        kernel,
        kernel.uname_release(flavor)
    );

    let recipe_dir = config.zfs_recipe_dir.as_deref();
    let utils_template = load_template(recipe_dir, pkgbuild::UTILS_TEMPLATE)?;
    let kernel_template = load_template(recipe_dir, pkgbuild::KERNEL_TEMPLATE)?;

    let (headers, tarball, sha256) = if options.dry_run {
        let headers = config
            .download_dir
            .join("kernel")
            .join(kernel.headers_filename(flavor));
        println!(
            "  [DRY-RUN] fetch {}",
            source::tarball_url(&config.zfs_source_url, &zfs_version)
        );
        println!("  [DRY-RUN] fetch {}", kernel.headers_url(&config.archive_url, flavor));
        (headers, None, "SKIP".to_string())
    } else {
        let sources = source::fetch_sources(
            &config.download_dir,
            &config.zfs_source_url,
            &config.archive_url,
            &zfs_version,
            &kernel,
            flavor,
            options.skip_verify,
        )?;
        (sources.headers, Some(sources.tarball), sources.sha256)
    };

    let spec = BuildSpec {
        zfs_version,
        kernel,
        flavor,
        tarball_sha256: sha256,
    };
    let utils = render_utils(&utils_template, &spec);
    let module = render_kernel(&kernel_template, &spec);

    let build_root = config.work_dir.join("zfs-build");
    let layout = BuildLayout {
        chroot: config.chroot_dir.clone(),
        utils_dir: build_root.join(&utils.pkgname),
        kernel_dir: build_root.join(&module.pkgname),
        headers,
        utils_file: utils.filename(),
        kernel_file: module.filename(),
        kernel_pkgname: module.pkgname.clone(),
        repo_dir: config.zfs_repo_dir(),
    };

    if let Some(tarball) = &tarball {
        prepare_work_dir(&config.work_dir, "zfs-build")?;
        write_build_dir(&layout.utils_dir, &utils, tarball)?;
        write_build_dir(&layout.kernel_dir, &module, tarball)?;
    } else {
        println!("  [DRY-RUN] write {}/PKGBUILD", layout.utils_dir.display());
        println!("  [DRY-RUN] write {}/PKGBUILD", layout.kernel_dir.display());
    }

    let pipeline = build_pipeline(&layout, plan::chroot_exists(&layout.chroot));
    Executor::new(options.dry_run).execute(&pipeline)?;

    let published = layout.published();
    if !options.dry_run {
        println!("\nLocal repository: {}", layout.repo_dir.display());
        for pkg in &published {
            println!("  {}", pkg.display());
        }
        println!("Build an image with it: archlive iso build --zfs");
    }
    Ok(published)
}

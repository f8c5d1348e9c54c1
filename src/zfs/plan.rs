//! Clean-chroot build of the ZFS packages, as a pipeline.

use std::path::{Path, PathBuf};

use crate::pipeline::{Pipeline, Stage, Step};
use crate::process::Cmd;

/// Database name of the local repository; `repo-add` also creates the
/// `archzfs.db` symlink pacman reads.
pub const REPO_DB: &str = "archzfs.db.tar.gz";

/// Where everything of one build lives.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    /// devtools chroot directory (the clean copy is `<chroot>/root`).
    pub chroot: PathBuf,
    pub utils_dir: PathBuf,
    pub kernel_dir: PathBuf,
    /// Kernel headers package installed into the chroot.
    pub headers: PathBuf,
    pub utils_file: String,
    pub kernel_file: String,
    pub kernel_pkgname: String,
    /// Local repository the packages are published to.
    pub repo_dir: PathBuf,
}

impl BuildLayout {
    pub fn clean_root(&self) -> PathBuf {
        self.chroot.join("root")
    }

    /// Packages as published in the repository.
    pub fn published(&self) -> Vec<PathBuf> {
        vec![
            self.repo_dir.join(&self.utils_file),
            self.repo_dir.join(&self.kernel_file),
        ]
    }
}

/// True when `mkarchroot` already created the clean chroot.
pub fn chroot_exists(chroot: &Path) -> bool {
    chroot.join("root/.arch-chroot").exists()
}

fn makechrootpkg(layout: &BuildLayout, dir: &Path, installs: &[PathBuf]) -> Cmd {
    let mut cmd = Cmd::new("makechrootpkg")
        .args(["-c", "-r"])
        .arg_path(&layout.chroot);
    for pkg in installs {
        cmd = cmd.arg("-I").arg_path(pkg);
    }
    cmd.dir(dir)
}

/// Build `zfs-utils`, then the module package against it, then publish both.
pub fn build_pipeline(layout: &BuildLayout, chroot_ready: bool) -> Pipeline {
    let clean_root = layout.clean_root();
    let prepare = if chroot_ready {
        Stage::new("Update build chroot").step(Step::Interactive(
            Cmd::new("arch-nspawn")
                .arg_path(&clean_root)
                .args(["pacman", "-Syu", "--noconfirm"]),
        ))
    } else {
        Stage::new("Create build chroot")
            .step(Step::Mkdir(layout.chroot.clone()))
            .step(Step::Interactive(
                Cmd::new("mkarchroot")
                    .arg_path(&clean_root)
                    .arg("base-devel")
                    .error_msg("mkarchroot failed"),
            ))
    };

    let utils_pkg = layout.utils_dir.join(&layout.utils_file);
    let kernel_pkg = layout.kernel_dir.join(&layout.kernel_file);

    let utils = Stage::new("Build zfs-utils").step(Step::Interactive(
        makechrootpkg(layout, &layout.utils_dir, &[layout.headers.clone()])
            .error_msg("zfs-utils build failed"),
    ));
    let kernel = Stage::new(format!("Build {}", layout.kernel_pkgname)).step(Step::Interactive(
        makechrootpkg(
            layout,
            &layout.kernel_dir,
            &[layout.headers.clone(), utils_pkg.clone()],
        )
        .error_msg(format!("{} build failed", layout.kernel_pkgname)),
    ));

    let repo_db = layout.repo_dir.join(REPO_DB);
    let publish = Stage::new("Publish local repository")
        .step(Step::Mkdir(layout.repo_dir.clone()))
        .step(Step::run(
            Cmd::new("cp")
                .arg_path(&utils_pkg)
                .arg_path(&kernel_pkg)
                .arg_path(&layout.repo_dir),
        ))
        .step(Step::run(
            Cmd::new("repo-add")
                .arg_path(&repo_db)
                .args(layout.published().iter().map(|p| p.to_string_lossy().into_owned())),
        ));

    Pipeline::new("ZFS packages")
        .stage(prepare)
        .stage(utils)
        .stage(kernel)
        .stage(publish)
}

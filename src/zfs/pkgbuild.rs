//! PKGBUILD templates for the ZFS packages and their patching.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::kernel::{KernelFlavor, KernelVersion, ARCH};
use crate::common::shell::{array, double_quote, get_var, set_var};

/// Default package extension of makepkg.
pub const PKGEXT: &str = ".pkg.tar.zst";

/// Template directory names under `ARCHLIVE_ZFS_RECIPE_DIR`.
pub const UTILS_TEMPLATE: &str = "zfs-utils";
pub const KERNEL_TEMPLATE: &str = "zfs-kernel";

const BUILTIN_UTILS: &str = r##"# Generated by archlive

pkgname="zfs-utils"
pkgver=0
pkgrel=1
pkgdesc="Userspace utilities for the Zettabyte File System."
arch=("x86_64")
url="https://openzfs.org/"
license=("CDDL")
depends=("openssl" "zlib" "libtirpc" "libudev.so" "libblkid.so" "libuuid.so")
makedepends=("python" "python-setuptools" "python-cffi" "python-packaging")
optdepends=("python: for arcstat/arc_summary/dbufstat")
backup=("etc/default/zfs" "etc/zfs/zed.d/zed.rc")
source=("zfs-${pkgver}.tar.gz")
sha256sums=("SKIP")

build() {
    cd "${srcdir}/zfs-${pkgver}"
    ./configure --prefix=/usr --sysconfdir=/etc --sbindir=/usr/bin --with-mounthelperdir=/usr/bin \
        --libdir=/usr/lib --datadir=/usr/share --includedir=/usr/include \
        --with-udevdir=/usr/lib/udev --libexecdir=/usr/lib/zfs --with-config=user \
        --enable-systemd --enable-pyzfs
    make
}

package() {
    cd "${srcdir}/zfs-${pkgver}"
    make DESTDIR="${pkgdir}" install
    rm -rf "${pkgdir}/etc/init.d" "${pkgdir}/usr/share/initramfs-tools" "${pkgdir}/usr/lib/dracut"
}
"##;

const BUILTIN_KERNEL: &str = r##"# Generated by archlive

pkgname="zfs-linux"
_zfsver=0
_kernelpkg="linux"
_kernelver=0
_kernelver_full=0
_extramodules=0
pkgver=0
pkgrel=1
pkgdesc="Kernel modules for the Zettabyte File System."
arch=("x86_64")
url="https://openzfs.org/"
license=("CDDL")
depends=("kmod" "zfs-utils=${_zfsver}" "${_kernelpkg}=${_kernelver}")
makedepends=("${_kernelpkg}-headers=${_kernelver}")
provides=("zfs" "spl")
conflicts=("spl-${_kernelpkg}")
source=("zfs-${_zfsver}.tar.gz")
sha256sums=("SKIP")

build() {
    cd "${srcdir}/zfs-${_zfsver}"
    ./configure --prefix=/usr --sysconfdir=/etc --sbindir=/usr/bin --libdir=/usr/lib \
        --datadir=/usr/share --includedir=/usr/include --with-udevdir=/usr/lib/udev \
        --libexecdir=/usr/lib/zfs --with-config=kernel \
        --with-linux="/usr/lib/modules/${_extramodules}/build" \
        --with-linux-obj="/usr/lib/modules/${_extramodules}/build"
    make
}

package() {
    cd "${srcdir}/zfs-${_zfsver}"
    make DESTDIR="${pkgdir}" INSTALL_MOD_PATH=/usr install
    rm -rf "${pkgdir}/usr/src"
}
"##;

/// Python modules `./configure --enable-pyzfs` refuses to run without.
pub const PYZFS_MAKEDEPENDS: &[&str] = &["python-setuptools", "python-cffi", "python-packaging"];

/// Packages `--enable-pyzfs` needs that the template does not list in `makedepends`.
pub fn missing_pyzfs_makedepends(pkgbuild: &str) -> Vec<&'static str> {
    if !pkgbuild.contains("--enable-pyzfs") {
        return Vec::new();
    }
    let declared = get_var(pkgbuild, "makedepends").unwrap_or_default();
    let declared: Vec<&str> = declared
        .trim_matches(|c: char| c == '(' || c == ')')
        .split_whitespace()
        .map(|p| p.trim_matches(|c: char| c == '"' || c == '\''))
        .collect();
    PYZFS_MAKEDEPENDS
        .iter()
        .copied()
        .filter(|dep| !declared.contains(dep))
        .collect()
}

/// Inputs shared by both PKGBUILDs.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub zfs_version: String,
    pub kernel: KernelVersion,
    pub flavor: KernelFlavor,
    /// SHA-256 of `zfs-<version>.tar.gz`.
    pub tarball_sha256: String,
}

impl BuildSpec {
    /// `pkgver` of the module package, e.g. `2.2.6_6.6.8.arch1.1`.
    pub fn kernel_pkgver(&self) -> String {
        format!("{}_{}", self.zfs_version, self.kernel.pkgver_token())
    }
}

/// A rendered PKGBUILD and the package file it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPackage {
    pub pkgname: String,
    pub pkgver: String,
    pub pkgrel: String,
    pub pkgbuild: String,
}

impl RenderedPackage {
    /// File name makepkg writes, e.g. `zfs-utils-2.2.6-1-x86_64.pkg.tar.zst`.
    pub fn filename(&self) -> String {
        format!("{}-{}-{}-{}{}", self.pkgname, self.pkgver, self.pkgrel, ARCH, PKGEXT)
    }
}

/// Template text, from `recipe_dir/<name>/PKGBUILD` when present.
pub fn load_template(recipe_dir: Option<&Path>, name: &str) -> Result<String> {
    if let Some(dir) = recipe_dir {
        let path = dir.join(name).join("PKGBUILD");
        if path.is_file() {
            tracing::info!(template = %path.display(), "using PKGBUILD override");
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if get_var(&content, "pkgname").is_none() {
                bail!("{} has no top-level pkgname", path.display());
            }
            let missing = missing_pyzfs_makedepends(&content);
            if !missing.is_empty() {
                bail!(
                    "{} builds with --enable-pyzfs but makedepends lacks: {}",
                    path.display(),
                    missing.join(" ")
                );
            }
            return Ok(content);
        }
    }
    match name {
        UTILS_TEMPLATE => Ok(BUILTIN_UTILS.to_string()),
        KERNEL_TEMPLATE => Ok(BUILTIN_KERNEL.to_string()),
        other => bail!("No built-in PKGBUILD template named '{}'", other),
    }
}

/// Patch the `zfs-utils` template.
pub fn render_utils(template: &str, spec: &BuildSpec) -> RenderedPackage {
    let pkgrel = "1".to_string();
    let pkgbuild = set_var(template, "pkgname", &double_quote("zfs-utils"));
    let pkgbuild = set_var(&pkgbuild, "pkgver", &spec.zfs_version);
    let pkgbuild = set_var(&pkgbuild, "pkgrel", &pkgrel);
    let pkgbuild = set_var(&pkgbuild, "sha256sums", &array(&[spec.tarball_sha256.as_str()]));
    RenderedPackage {
        pkgname: "zfs-utils".to_string(),
        pkgver: spec.zfs_version.clone(),
        pkgrel,
        pkgbuild,
    }
}

/// Patch the kernel module template for `spec.flavor` and `spec.kernel`.
pub fn render_kernel(template: &str, spec: &BuildSpec) -> RenderedPackage {
    let pkgname = spec.flavor.zfs_package();
    let pkgver = spec.kernel_pkgver();
    let pkgrel = "1".to_string();
    let full = spec.kernel.full();
    let uname = spec.kernel.uname_release(spec.flavor);

    let vars: [(&str, String); 9] = [
        ("pkgname", double_quote(&pkgname)),
        ("_zfsver", double_quote(&spec.zfs_version)),
        ("_kernelpkg", double_quote(spec.flavor.package())),
        ("_kernelver", double_quote(&full)),
        ("_kernelver_full", double_quote(&full)),
        ("_extramodules", double_quote(&uname)),
        ("pkgver", pkgver.clone()),
        ("pkgrel", pkgrel.clone()),
        ("sha256sums", array(&[spec.tarball_sha256.as_str()])),
    ];
    let pkgbuild = vars
        .iter()
        .fold(template.to_string(), |acc, (key, value)| set_var(&acc, key, value));

    RenderedPackage {
        pkgname,
        pkgver,
        pkgrel,
        pkgbuild,
    }
}

/// Write `package` as `<dir>/PKGBUILD` next to a copy of the source tarball.
pub fn write_build_dir(dir: &Path, package: &RenderedPackage, tarball: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let pkgbuild = dir.join("PKGBUILD");
    fs::write(&pkgbuild, &package.pkgbuild)
        .with_context(|| format!("Failed to write {}", pkgbuild.display()))?;
    if let Some(name) = tarball.file_name() {
        let dest = dir.join(name);
        fs::copy(tarball, &dest).with_context(|| {
            format!("Failed to copy {} to {}", tarball.display(), dest.display())
        })?;
    }
    Ok(pkgbuild)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(flavor: KernelFlavor, kernel: &str) -> BuildSpec {
        BuildSpec {
            zfs_version: "2.2.6".into(),
            kernel: KernelVersion::parse(kernel).unwrap(),
            flavor,
            tarball_sha256: "ab".repeat(32),
        }
    }

    #[test]
    fn test_render_utils() {
        let pkg = render_utils(BUILTIN_UTILS, &spec(KernelFlavor::Linux, "6.6.8.arch1-1"));
        assert_eq!(pkg.filename(), "zfs-utils-2.2.6-1-x86_64.pkg.tar.zst");
        assert_eq!(get_var(&pkg.pkgbuild, "pkgver").as_deref(), Some("2.2.6"));
        assert!(pkg.pkgbuild.contains(&format!("sha256sums=(\"{}\")", "ab".repeat(32))));
        // function bodies untouched
        assert!(pkg.pkgbuild.contains("    cd \"${srcdir}/zfs-${pkgver}\""));
    }

    #[test]
    fn test_render_kernel_for_linux() {
        let pkg = render_kernel(BUILTIN_KERNEL, &spec(KernelFlavor::Linux, "6.6.8.arch1-1"));
        assert_eq!(pkg.pkgname, "zfs-linux");
        assert_eq!(pkg.pkgver, "2.2.6_6.6.8.arch1.1");
        assert_eq!(pkg.filename(), "zfs-linux-2.2.6_6.6.8.arch1.1-1-x86_64.pkg.tar.zst");
        let b = &pkg.pkgbuild;
        assert_eq!(get_var(b, "_kernelver").as_deref(), Some("6.6.8.arch1-1"));
        assert_eq!(get_var(b, "_extramodules").as_deref(), Some("6.6.8-arch1-1"));
        assert_eq!(get_var(b, "_zfsver").as_deref(), Some("2.2.6"));
        assert!(b.contains("--with-linux=\"/usr/lib/modules/${_extramodules}/build\""));
    }

    #[test]
    fn test_render_kernel_for_lts() {
        let pkg = render_kernel(BUILTIN_KERNEL, &spec(KernelFlavor::Lts, "6.1.69-1"));
        assert_eq!(pkg.pkgname, "zfs-linux-lts");
        assert_eq!(get_var(&pkg.pkgbuild, "_kernelpkg").as_deref(), Some("linux-lts"));
        assert_eq!(get_var(&pkg.pkgbuild, "_extramodules").as_deref(), Some("6.1.69-1-lts"));
    }

    #[test]
    fn test_render_is_stable() {
        let s = spec(KernelFlavor::Zen, "6.6.8.zen1-1");
        let once = render_kernel(BUILTIN_KERNEL, &s);
        let twice = render_kernel(&once.pkgbuild, &s);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_template_override() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(UTILS_TEMPLATE);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("PKGBUILD"), "pkgname=custom\npkgver=1\n").unwrap();

        let utils = load_template(Some(tmp.path()), UTILS_TEMPLATE).unwrap();
        assert!(utils.starts_with("pkgname=custom"));
        // kernel template falls back to the built-in one
        let kernel = load_template(Some(tmp.path()), KERNEL_TEMPLATE).unwrap();
        assert_eq!(kernel, BUILTIN_KERNEL);
        assert!(load_template(None, "zfs-dkms").is_err());
    }

    #[test]
    fn test_builtin_utils_declares_pyzfs_makedepends() {
        assert!(BUILTIN_UTILS.contains("--enable-pyzfs"));
        assert!(missing_pyzfs_makedepends(BUILTIN_UTILS).is_empty());
        let rendered = render_utils(BUILTIN_UTILS, &spec(KernelFlavor::Linux, "6.6.8.arch1-1"));
        assert!(missing_pyzfs_makedepends(&rendered.pkgbuild).is_empty());
    }

    #[test]
    fn test_pyzfs_override_without_python_modules_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(UTILS_TEMPLATE);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("PKGBUILD"),
            "pkgname=zfs-utils\nmakedepends=(\"python\" \"python-cffi\")\n\nbuild() {\n    ./configure --enable-pyzfs\n}\n",
        )
        .unwrap();

        let err = load_template(Some(tmp.path()), UTILS_TEMPLATE).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("python-setuptools"));
        assert!(msg.contains("python-packaging"));
        assert!(!msg.contains("python-cffi"));
    }

    #[test]
    fn test_template_override_without_pkgname_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(KERNEL_TEMPLATE);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("PKGBUILD"), "build() {\n    pkgname=x\n}\n").unwrap();
        assert!(load_template(Some(tmp.path()), KERNEL_TEMPLATE).is_err());
    }

    #[test]
    fn test_write_build_dir_copies_tarball() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("zfs-2.2.6.tar.gz");
        fs::write(&tarball, b"tar").unwrap();
        let pkg = render_utils(BUILTIN_UTILS, &spec(KernelFlavor::Linux, "6.6.8.arch1-1"));

        let build = tmp.path().join("build/zfs-utils");
        let pkgbuild = write_build_dir(&build, &pkg, &tarball).unwrap();
        assert_eq!(fs::read_to_string(pkgbuild).unwrap(), pkg.pkgbuild);
        assert_eq!(fs::read(build.join("zfs-2.2.6.tar.gz")).unwrap(), b"tar");
    }
}

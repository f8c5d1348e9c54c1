//! Integration tests for live ISO profile preparation.
//!
//! These work on a mock releng profile in a temp directory and never run
//! mkarchiso.

mod helpers;

use std::fs;
use std::path::PathBuf;

use archlive::common::shell::get_var;
use archlive::iso::profile_dir::{package_names, prepare_profile, ArchzfsSource, ProfileSpec};
use archlive::iso::{build_iso, IsoOptions};
use archlive::profile::{IsoProfile, COMMON_PACKAGES, ZFS_PACKAGES};
use helpers::{assert_file_contains, assert_file_exists, assert_symlink, TestEnv};

fn spec(profile: IsoProfile, zfs: Option<ArchzfsSource>) -> ProfileSpec {
    ProfileSpec {
        profile,
        zfs,
        iso_name: "archlive".into(),
        publisher: "archlive builders".into(),
        hostname: "livebox".into(),
    }
}

#[test]
fn test_prepare_kde_profile_with_local_zfs() {
    let env = TestEnv::new();
    let dst = env.base_dir.join("work/profile");
    let repo = PathBuf::from("/srv/output/zfs");

    let prepared = prepare_profile(
        &env.releng,
        &dst,
        &spec(IsoProfile::Kde, Some(ArchzfsSource::Local(repo))),
    )
    .unwrap();
    assert_eq!(prepared.dir, dst);
    assert!(prepared.files_copied >= 5);

    let packages = fs::read_to_string(dst.join("packages.x86_64")).unwrap();
    let names = package_names(&packages);
    for pkg in COMMON_PACKAGES.iter().chain(ZFS_PACKAGES).chain(IsoProfile::Kde.packages()) {
        assert!(names.contains(pkg), "{} missing from packages.x86_64", pkg);
    }
    // releng already lists these
    assert_eq!(names.iter().filter(|n| **n == "cryptsetup").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "syslinux").count(), 1);
    assert!(packages.starts_with("alsa-utils\n"));

    assert_file_contains(&dst.join("pacman.conf"), "[archzfs]\nSigLevel = Optional TrustAll\nServer = file:///srv/output/zfs\n");
    assert_file_contains(&dst.join("pacman.conf"), "[extra]");

    let profiledef = fs::read_to_string(dst.join("profiledef.sh")).unwrap();
    assert_eq!(get_var(&profiledef, "iso_name").as_deref(), Some("archlive-kde"));
    assert_eq!(
        get_var(&profiledef, "iso_publisher").as_deref(),
        Some("archlive builders")
    );
    assert!(get_var(&profiledef, "iso_label").unwrap().starts_with("ARCHLIVE_KDE_$(date"));
    // arrays below the patched lines survive
    assert!(profiledef.contains("  [\"/etc/shadow\"]=\"0:0:400\""));

    assert_file_contains(&dst.join("airootfs/etc/hostname"), "livebox");
    assert_symlink(
        &dst.join("airootfs/etc/systemd/system/display-manager.service"),
        "/usr/lib/systemd/system/sddm.service",
    );

    // the installed profile is never modified
    assert_file_contains(&env.releng.join("profiledef.sh"), "iso_name=\"archlinux\"");
    assert!(!fs::read_to_string(env.releng.join("pacman.conf"))
        .unwrap()
        .contains("archzfs"));
}

#[test]
fn test_prepare_twice_gives_identical_profile() {
    let env = TestEnv::new();
    let dst = env.base_dir.join("work/profile");
    let spec = spec(
        IsoProfile::Xfce,
        Some(ArchzfsSource::Remote("https://archzfs.com/$repo/$arch".into())),
    );

    prepare_profile(&env.releng, &dst, &spec).unwrap();
    let first_packages = fs::read_to_string(dst.join("packages.x86_64")).unwrap();
    let first_conf = fs::read_to_string(dst.join("pacman.conf")).unwrap();
    let first_def = fs::read_to_string(dst.join("profiledef.sh")).unwrap();

    let again = prepare_profile(&env.releng, &dst, &spec).unwrap();
    assert_eq!(fs::read_to_string(dst.join("packages.x86_64")).unwrap(), first_packages);
    assert_eq!(fs::read_to_string(dst.join("pacman.conf")).unwrap(), first_conf);
    assert_eq!(fs::read_to_string(dst.join("profiledef.sh")).unwrap(), first_def);
    assert_eq!(first_conf.matches("[archzfs]").count(), 1);
    assert!(again.packages_added > 0);
}

#[test]
fn test_base_profile_has_no_display_manager_or_zfs() {
    let env = TestEnv::new();
    let dst = env.base_dir.join("work/profile");

    prepare_profile(&env.releng, &dst, &spec(IsoProfile::Base, None)).unwrap();

    assert!(!dst
        .join("airootfs/etc/systemd/system/display-manager.service")
        .exists());
    let packages = fs::read_to_string(dst.join("packages.x86_64")).unwrap();
    assert!(!package_names(&packages).contains(&"zfs-utils"));
    assert!(!fs::read_to_string(dst.join("pacman.conf"))
        .unwrap()
        .contains("archzfs"));
    // live session keeps root autologin
    assert_file_exists(&dst.join("airootfs/etc/systemd/system/getty@tty1.service.d/autologin.conf"));
}

#[test]
fn test_not_an_archiso_profile_is_rejected() {
    let env = TestEnv::new();
    let bogus = env.base_dir.join("bogus");
    fs::create_dir_all(&bogus).unwrap();

    let err = prepare_profile(&bogus, &env.base_dir.join("out"), &spec(IsoProfile::Base, None))
        .unwrap_err();
    assert!(err.to_string().contains("profiledef.sh"));
}

#[test]
fn test_dry_run_build_writes_nothing() {
    let env = TestEnv::new();
    let config = env.config();
    let options = IsoOptions {
        profile: IsoProfile::Gnome,
        zfs: true,
        zfs_repo: None,
        keep_work: false,
        dry_run: true,
    };

    let built = build_iso(&config, &options).unwrap();
    assert!(built.is_none());
    assert!(!config.work_dir.exists());
    assert!(!config.output_dir.exists());
}

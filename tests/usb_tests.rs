//! Integration tests for the persistent USB install plan.
//!
//! The pipeline is built and dry-run only; no device is touched.

mod helpers;

use std::path::{Path, PathBuf};

use archlive::pipeline::{Executor, Step};
use archlive::usb::{install_pipeline, DiskUuids, Filesystem, InstallPlan, IsoContents};
use helpers::{step_index, written_file, TestEnv};

const ISO_LISTING: &str = "\
.
./arch
./arch/boot/intel-ucode.img
./arch/boot/x86_64/initramfs-linux.img
./arch/boot/x86_64/vmlinuz-linux
./arch/x86_64/airootfs.sfs
./boot/syslinux/syslinux.cfg
";

fn uuids() -> DiskUuids {
    DiskUuids {
        root_fs: "0f3c1a52-7d4e-4b8e-9c21-6a5f0b1d2e3f".into(),
        boot_serial: "1A2B-3C4D".into(),
        luks: "c0ffee00-1234-4567-89ab-cdef01234567".into(),
    }
}

fn plan(env: &TestEnv, device: &str, filesystem: Filesystem, encrypt: bool) -> InstallPlan {
    let contents = IsoContents::from_listing(ISO_LISTING);
    let mounts = env.base_dir.join("work/usb");
    InstallPlan {
        device: PathBuf::from(device),
        iso: env.base_dir.join("output/archlive-xfce.iso"),
        filesystem,
        encrypt,
        hostname: "pocket".into(),
        microcode: contents.microcode,
        target_mount: mounts.join("root"),
        iso_mount: mounts.join("iso"),
    }
}

#[test]
fn test_encrypted_btrfs_install_is_consistent() {
    let env = TestEnv::new();
    let plan = plan(&env, "/dev/nvme1n1", Filesystem::Btrfs, true);
    let uuids = uuids();
    let p = install_pipeline(&plan, &uuids);
    let root = &plan.target_mount;

    // partitions of nvme devices carry a `p`
    step_index(&p, "mkfs.fat -F 32 -n ARCHBOOT -i 1A2B3C4D /dev/nvme1n1p1");
    step_index(&p, "cryptsetup open /dev/nvme1n1p2 cryptroot");
    step_index(&p, "mkfs.btrfs -f -L ARCHROOT -U 0f3c1a52-7d4e-4b8e-9c21-6a5f0b1d2e3f /dev/mapper/cryptroot");

    let fstab = written_file(&p, &root.join("etc/fstab"));
    assert!(fstab.contains("UUID=0f3c1a52-7d4e-4b8e-9c21-6a5f0b1d2e3f\t/\tbtrfs\trw,relatime,compress=zstd\t0\t0"));
    assert!(fstab.contains("UUID=1A2B-3C4D\t/boot\tvfat"));

    let cfg = written_file(&p, &root.join("boot/syslinux/syslinux.cfg"));
    assert!(cfg.contains(
        "APPEND cryptdevice=UUID=c0ffee00-1234-4567-89ab-cdef01234567:cryptroot root=/dev/mapper/cryptroot rw"
    ));
    assert!(cfg.contains("INITRD ../intel-ucode.img,../initramfs-linux.img"));
    assert!(!cfg.contains("amd-ucode"));

    let mkinitcpio = written_file(&p, &root.join("etc/mkinitcpio.conf"));
    assert!(mkinitcpio.contains("block encrypt filesystems"));
    assert!(!mkinitcpio.contains("autodetect"));

    assert_eq!(written_file(&p, &root.join("etc/hostname")), "pocket\n");
    assert_eq!(written_file(&p, &root.join("etc/machine-id")), "");
}

#[test]
fn test_nothing_touches_the_device_before_wipefs() {
    let env = TestEnv::new();
    let plan = plan(&env, "/dev/sdc", Filesystem::F2fs, false);
    let p = install_pipeline(&plan, &uuids());

    let first = p.steps().next().unwrap();
    assert_eq!(first.describe(), "wipefs --all --force /dev/sdc");

    let mkfs = step_index(&p, "mkfs.f2fs -f -l ARCHROOT");
    let first_mount = p
        .steps()
        .position(|s| matches!(s, Step::Mount { .. }))
        .unwrap();
    assert!(mkfs < first_mount);
}

#[test]
fn test_mounts_and_unmounts_balance() {
    let env = TestEnv::new();
    for encrypt in [false, true] {
        let p = install_pipeline(&plan(&env, "/dev/sdc", Filesystem::Ext4, encrypt), &uuids());
        let mounts: Vec<&Path> = p
            .steps()
            .filter_map(|s| match s {
                Step::Mount { target, .. } => Some(target.as_path()),
                _ => None,
            })
            .collect();
        let mut unmounts: Vec<&Path> = p
            .steps()
            .filter_map(|s| match s {
                Step::Unmount(target) => Some(target.as_path()),
                _ => None,
            })
            .collect();
        unmounts.reverse();
        assert_eq!(mounts, unmounts);

        let opens = p.steps().filter(|s| matches!(s, Step::CryptOpen { .. })).count();
        let closes = p.steps().filter(|s| matches!(s, Step::CryptClose(_))).count();
        assert_eq!(opens, closes);
        assert_eq!(opens, usize::from(encrypt));
    }
}

#[test]
fn test_dry_run_leaves_mount_points_alone() {
    let env = TestEnv::new();
    let plan = plan(&env, "/dev/sdc", Filesystem::Ext4, true);
    let p = install_pipeline(&plan, &uuids());

    Executor::new(true).execute(&p).unwrap();
    assert!(!plan.target_mount.exists());
    assert!(!plan.iso_mount.exists());
}

//! The persistent-install pipeline.
//!
//! [`install_pipeline`] is pure: it turns the install options and the
//! pre-generated identifiers into a [`Pipeline`] without touching the
//! device, so the exact sequence can be printed, tested and reviewed.

use std::path::{Path, PathBuf};

use super::layout::{
    fstab, kernel_cmdline, linux_preset, mkinitcpio_conf, sfdisk_script, syslinux_cfg, DiskUuids,
    Filesystem, BOOT_LABEL, CRYPT_NAME, SYSLINUX_BIOS_DIR, SYSLINUX_MODULES,
};
use super::device::partition_path;
use crate::pipeline::{Pipeline, Stage, Step};
use crate::process::Cmd;

/// Location of the squashed live root inside an archiso image.
pub const ISO_AIROOTFS: &str = "arch/x86_64/airootfs.sfs";
/// Location of the kernel inside an archiso image.
pub const ISO_KERNEL: &str = "arch/boot/x86_64/vmlinuz-linux";
/// Directory holding microcode images inside an archiso image.
pub const ISO_BOOT_DIR: &str = "arch/boot";

/// Everything the install pipeline needs to know.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    /// Whole-disk target device.
    pub device: PathBuf,
    /// Live ISO whose filesystem is installed.
    pub iso: PathBuf,
    pub filesystem: Filesystem,
    pub encrypt: bool,
    pub hostname: String,
    /// Microcode images present in the ISO, e.g. `intel-ucode.img`.
    pub microcode: Vec<String>,
    /// Mount point of the new root filesystem.
    pub target_mount: PathBuf,
    /// Mount point of the ISO.
    pub iso_mount: PathBuf,
}

impl InstallPlan {
    pub fn boot_partition(&self) -> PathBuf {
        partition_path(&self.device, 1)
    }

    pub fn root_partition(&self) -> PathBuf {
        partition_path(&self.device, 2)
    }

    /// Block device the root filesystem is created on.
    pub fn root_device(&self) -> PathBuf {
        if self.encrypt {
            Path::new("/dev/mapper").join(CRYPT_NAME)
        } else {
            self.root_partition()
        }
    }
}

/// Build the full install sequence for `plan`.
pub fn install_pipeline(plan: &InstallPlan, uuids: &DiskUuids) -> Pipeline {
    let device = &plan.device;
    let boot_part = plan.boot_partition();
    let root_part = plan.root_partition();
    let root_dev = plan.root_device();
    let mnt = &plan.target_mount;
    let boot = mnt.join("boot");
    let iso_mnt = &plan.iso_mount;

    let mut pipeline = Pipeline::new(format!("Persistent install to {}", device.display()));

    pipeline.push(
        Stage::new("Partition")
            .step(Step::run(
                Cmd::new("wipefs").args(["--all", "--force"]).arg_path(device),
            ))
            .step(Step::run(
                Cmd::new("sfdisk")
                    .args(["--wipe", "always"])
                    .arg_path(device)
                    .stdin(sfdisk_script())
                    .error_msg(format!("Failed to partition {}", device.display())),
            ))
            .step(Step::run(Cmd::new("partprobe").arg_path(device)))
            .step(Step::run(Cmd::new("udevadm").arg("settle"))),
    );

    pipeline.push(Stage::new("Format boot partition").step(Step::run(
        Cmd::new("mkfs.fat")
            .args(["-F", "32", "-n", BOOT_LABEL, "-i"])
            .arg(uuids.boot_volume_id())
            .arg_path(&boot_part),
    )));

    if plan.encrypt {
        pipeline.push(
            Stage::new("Encrypt root partition")
                .step(Step::Interactive(
                    Cmd::new("cryptsetup")
                        .args(["luksFormat", "--type", "luks2", "--verify-passphrase", "--uuid"])
                        .arg(&uuids.luks)
                        .arg_path(&root_part)
                        .error_msg(format!("Failed to encrypt {}", root_part.display())),
                ))
                .step(Step::CryptOpen {
                    device: root_part.clone(),
                    name: CRYPT_NAME.to_string(),
                }),
        );
    }

    pipeline.push(
        Stage::new(format!("Format root filesystem ({})", plan.filesystem))
            .step(Step::run(plan.filesystem.mkfs(&root_dev, &uuids.root_fs))),
    );

    pipeline.push(
        Stage::new("Mount")
            .step(Step::mount(&root_dev, mnt))
            .step(Step::mount(&boot_part, &boot))
            .step(Step::Mount {
                source: plan.iso.clone(),
                target: iso_mnt.clone(),
                fstype: Some("iso9660".to_string()),
                options: Some("loop,ro".to_string()),
            }),
    );

    let mut copy = Stage::new("Copy live filesystem")
        .step(Step::Interactive(
            Cmd::new("unsquashfs")
                .args(["-f", "-d"])
                .arg_path(mnt)
                .arg_path(&iso_mnt.join(ISO_AIROOTFS)),
        ))
        .step(Step::run(
            Cmd::new("cp")
                .arg_path(&iso_mnt.join(ISO_KERNEL))
                .arg_path(&boot.join("vmlinuz-linux")),
        ));
    for image in &plan.microcode {
        copy = copy.step(Step::run(
            Cmd::new("cp")
                .arg_path(&iso_mnt.join(ISO_BOOT_DIR).join(image))
                .arg_path(&boot.join(image)),
        ));
    }
    pipeline.push(copy);

    pipeline.push(
        Stage::new("Configure installed system")
            .step(Step::write(mnt.join("etc/hostname"), format!("{}\n", plan.hostname)))
            .step(Step::write(mnt.join("etc/fstab"), fstab(uuids, plan.filesystem)))
            // empty machine-id: systemd generates a fresh one on first boot
            .step(Step::write(mnt.join("etc/machine-id"), ""))
            .step(Step::Remove(mnt.join("etc/mkinitcpio.conf.d/archiso.conf")))
            .step(Step::Remove(
                mnt.join("etc/systemd/system/getty@tty1.service.d/autologin.conf"),
            ))
            .step(Step::write(mnt.join("etc/mkinitcpio.conf"), mkinitcpio_conf(plan.encrypt)))
            .step(Step::write(mnt.join("etc/mkinitcpio.d/linux.preset"), linux_preset()))
            .step(Step::Interactive(
                Cmd::new("arch-chroot")
                    .arg_path(mnt)
                    .args(["mkinitcpio", "-P"])
                    .error_msg("mkinitcpio failed inside the installed system"),
            )),
    );

    let syslinux_dir = boot.join("syslinux");
    let bios = Path::new(SYSLINUX_BIOS_DIR);
    let mut modules = Cmd::new("cp");
    for module in SYSLINUX_MODULES {
        modules = modules.arg_path(&bios.join(module));
    }
    pipeline.push(
        Stage::new("Bootloader files")
            .step(Step::Mkdir(syslinux_dir.clone()))
            .step(Step::run(modules.arg_path(&syslinux_dir)))
            .step(Step::write(
                syslinux_dir.join("syslinux.cfg"),
                syslinux_cfg(&kernel_cmdline(uuids, plan.encrypt), &plan.microcode),
            )),
    );

    // syslinux installs onto the unmounted FAT partition
    let mut finish = Stage::new("Finish")
        .step(Step::Sync)
        .step(Step::Unmount(iso_mnt.clone()))
        .step(Step::Unmount(boot.clone()))
        .step(Step::run(
            Cmd::new("syslinux")
                .args(["--directory", "syslinux", "--install"])
                .arg_path(&boot_part),
        ))
        .step(Step::run(
            Cmd::new("dd")
                .arg(format!("if={}", bios.join("mbr.bin").display()))
                .arg(format!("of={}", device.display()))
                .args(["bs=440", "count=1", "conv=notrunc"]),
        ))
        .step(Step::Unmount(mnt.clone()));
    if plan.encrypt {
        finish = finish.step(Step::CryptClose(CRYPT_NAME.to_string()));
    }
    pipeline.push(finish.step(Step::Sync));

    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(encrypt: bool) -> InstallPlan {
        InstallPlan {
            device: PathBuf::from("/dev/sdb"),
            iso: PathBuf::from("/srv/out/archlive-xfce-x86_64.iso"),
            filesystem: Filesystem::Ext4,
            encrypt,
            hostname: "stick".to_string(),
            microcode: vec!["intel-ucode.img".to_string(), "amd-ucode.img".to_string()],
            target_mount: PathBuf::from("/work/usb/root"),
            iso_mount: PathBuf::from("/work/usb/iso"),
        }
    }

    fn uuids() -> DiskUuids {
        DiskUuids {
            root_fs: "11111111-2222-3333-4444-555555555555".into(),
            boot_serial: "ABCD-0123".into(),
            luks: "99999999-8888-7777-6666-555555555555".into(),
        }
    }

    fn pos(pipeline: &Pipeline, needle: &str) -> usize {
        pipeline
            .position(needle)
            .unwrap_or_else(|| panic!("step '{}' missing from:\n{}", needle, pipeline.describe()))
    }

    #[test]
    fn test_order_of_destructive_steps() {
        let p = install_pipeline(&plan(false), &uuids());
        let order = [
            "wipefs --all --force /dev/sdb",
            "sfdisk --wipe always /dev/sdb",
            "udevadm settle",
            "mkfs.fat -F 32 -n ARCHBOOT -i ABCD0123 /dev/sdb1",
            "mkfs.ext4 -F -L ARCHROOT -U 11111111-2222-3333-4444-555555555555 /dev/sdb2",
            "mount /dev/sdb2 -> /work/usb/root",
            "mount /dev/sdb1 -> /work/usb/root/boot",
            "[iso9660] (loop,ro)",
            "unsquashfs -f -d /work/usb/root /work/usb/iso/arch/x86_64/airootfs.sfs",
            "vmlinuz-linux /work/usb/root/boot/vmlinuz-linux",
            "write /work/usb/root/etc/fstab",
            "arch-chroot /work/usb/root mkinitcpio -P",
            "write /work/usb/root/boot/syslinux/syslinux.cfg",
            "umount /work/usb/root/boot",
            "syslinux --directory syslinux --install /dev/sdb1",
            "dd if=/usr/lib/syslinux/bios/mbr.bin of=/dev/sdb bs=440 count=1 conv=notrunc",
        ];
        let positions: Vec<usize> = order.iter().map(|n| pos(&p, n)).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted, "{}", p.describe());

        let unmount_root = p
            .steps()
            .position(|s| s.describe() == "umount /work/usb/root")
            .unwrap();
        assert!(unmount_root > *positions.last().unwrap());
    }

    #[test]
    fn test_sfdisk_receives_script_on_stdin() {
        let p = install_pipeline(&plan(false), &uuids());
        let sfdisk = p.commands().into_iter().find(|c| c.program() == "sfdisk").unwrap();
        assert_eq!(sfdisk.stdin_data(), Some(sfdisk_script().as_bytes()));
    }

    #[test]
    fn test_plain_install_has_no_luks() {
        let p = install_pipeline(&plan(false), &uuids());
        assert!(p.position("cryptsetup").is_none());
        assert!(!p.describe().contains("/dev/mapper"));
    }

    #[test]
    fn test_encrypted_install_opens_before_mkfs_and_closes_last() {
        let p = install_pipeline(&plan(true), &uuids());
        let format = pos(&p, "cryptsetup luksFormat --type luks2");
        let open = pos(&p, "cryptsetup open /dev/sdb2 cryptroot");
        let mkfs = pos(&p, "mkfs.ext4");
        let close = pos(&p, "cryptsetup close cryptroot");
        assert!(format < open && open < mkfs && mkfs < close);
        assert!(p.describe().contains("mkfs.ext4 -F -L ARCHROOT -U 11111111-2222-3333-4444-555555555555 /dev/mapper/cryptroot"));
        assert_eq!(close, p.len() - 2);
    }

    #[test]
    fn test_luks_uuid_matches_cmdline() {
        let p = install_pipeline(&plan(true), &uuids());
        let luks = p
            .commands()
            .into_iter()
            .find(|c| c.get_args().first().map(String::as_str) == Some("luksFormat"))
            .unwrap();
        assert!(luks.get_args().contains(&uuids().luks));

        let cfg = p
            .steps()
            .find_map(|s| match s {
                Step::WriteFile { path, contents, .. } if path.ends_with("syslinux.cfg") => {
                    Some(contents.clone())
                }
                _ => None,
            })
            .unwrap();
        assert!(cfg.contains("cryptdevice=UUID=99999999-8888-7777-6666-555555555555:cryptroot"));
    }

    #[test]
    fn test_microcode_copied_and_referenced() {
        let p = install_pipeline(&plan(false), &uuids());
        pos(&p, "/work/usb/iso/arch/boot/intel-ucode.img /work/usb/root/boot/intel-ucode.img");
        pos(&p, "/work/usb/iso/arch/boot/amd-ucode.img /work/usb/root/boot/amd-ucode.img");

        let mut no_ucode = plan(false);
        no_ucode.microcode.clear();
        let p = install_pipeline(&no_ucode, &uuids());
        assert!(p.position("ucode").is_none());
    }

    #[test]
    fn test_archiso_leftovers_removed() {
        let p = install_pipeline(&plan(false), &uuids());
        pos(&p, "remove /work/usb/root/etc/mkinitcpio.conf.d/archiso.conf");
        pos(&p, "remove /work/usb/root/etc/systemd/system/getty@tty1.service.d/autologin.conf");
        pos(&p, "write /work/usb/root/etc/machine-id");
        pos(&p, "write /work/usb/root/etc/mkinitcpio.d/linux.preset");
    }

    #[test]
    fn test_nvme_partition_names() {
        let mut nvme = plan(false);
        nvme.device = PathBuf::from("/dev/nvme0n1");
        let p = install_pipeline(&nvme, &uuids());
        pos(&p, "mkfs.fat -F 32 -n ARCHBOOT -i ABCD0123 /dev/nvme0n1p1");
        pos(&p, "/dev/nvme0n1p2");
    }

    #[test]
    fn test_every_mount_is_unmounted() {
        let p = install_pipeline(&plan(true), &uuids());
        let mounted: Vec<&PathBuf> = p
            .steps()
            .filter_map(|s| match s {
                Step::Mount { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        for target in mounted {
            assert!(
                p.steps().any(|s| matches!(s, Step::Unmount(t) if t == target)),
                "{} never unmounted",
                target.display()
            );
        }
    }
}

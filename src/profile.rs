//! ISO profiles: which desktop environment gets baked into the live image.

use anyhow::bail;
use std::fmt;
use std::str::FromStr;

/// Packages every profile carries so the live session can install itself
/// onto a USB stick and talk to ZFS pools.
pub const COMMON_PACKAGES: &[&str] = &[
    "arch-install-scripts",
    "btrfs-progs",
    "cryptsetup",
    "dosfstools",
    "e2fsprogs",
    "f2fs-tools",
    "gptfdisk",
    "squashfs-tools",
    "syslinux",
];

/// Packages added when the image should ship OpenZFS.
pub const ZFS_PACKAGES: &[&str] = &["zfs-utils", "zfs-linux"];

/// Named desktop-environment variant of the live image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsoProfile {
    /// Console only, what archiso's releng profile ships.
    Base,
    Xfce,
    Kde,
    Gnome,
    Cinnamon,
    Mate,
    Lxqt,
}

impl IsoProfile {
    pub fn all() -> &'static [IsoProfile] {
        &[
            IsoProfile::Base,
            IsoProfile::Xfce,
            IsoProfile::Kde,
            IsoProfile::Gnome,
            IsoProfile::Cinnamon,
            IsoProfile::Mate,
            IsoProfile::Lxqt,
        ]
    }

    /// Short lowercase name used on the command line and in file names.
    pub fn name(&self) -> &'static str {
        match self {
            IsoProfile::Base => "base",
            IsoProfile::Xfce => "xfce",
            IsoProfile::Kde => "kde",
            IsoProfile::Gnome => "gnome",
            IsoProfile::Cinnamon => "cinnamon",
            IsoProfile::Mate => "mate",
            IsoProfile::Lxqt => "lxqt",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            IsoProfile::Base => "Console-only live system (archiso releng)",
            IsoProfile::Xfce => "Xfce desktop with LightDM",
            IsoProfile::Kde => "KDE Plasma desktop with SDDM",
            IsoProfile::Gnome => "GNOME desktop with GDM",
            IsoProfile::Cinnamon => "Cinnamon desktop with LightDM",
            IsoProfile::Mate => "MATE desktop with LightDM",
            IsoProfile::Lxqt => "LXQt desktop with SDDM",
        }
    }

    /// Desktop packages on top of the archiso base set.
    pub fn packages(&self) -> &'static [&'static str] {
        match self {
            IsoProfile::Base => &[],
            IsoProfile::Xfce => &[
                "xorg-server", "xorg-xinit", "mesa", "networkmanager",
                "xfce4", "xfce4-goodies", "lightdm", "lightdm-gtk-greeter",
                "network-manager-applet", "firefox",
            ],
            IsoProfile::Kde => &[
                "xorg-server", "xorg-xinit", "mesa", "networkmanager",
                "plasma-meta", "konsole", "dolphin", "sddm", "firefox",
            ],
            IsoProfile::Gnome => &[
                "xorg-server", "xorg-xinit", "mesa", "networkmanager",
                "gnome", "gnome-terminal", "gdm", "firefox",
            ],
            IsoProfile::Cinnamon => &[
                "xorg-server", "xorg-xinit", "mesa", "networkmanager",
                "cinnamon", "gnome-terminal", "lightdm", "lightdm-gtk-greeter", "firefox",
            ],
            IsoProfile::Mate => &[
                "xorg-server", "xorg-xinit", "mesa", "networkmanager",
                "mate", "mate-extra", "lightdm", "lightdm-gtk-greeter", "firefox",
            ],
            IsoProfile::Lxqt => &[
                "xorg-server", "xorg-xinit", "mesa", "networkmanager",
                "lxqt", "breeze-icons", "sddm", "firefox",
            ],
        }
    }

    /// Display manager unit enabled in the live image.
    pub fn display_manager(&self) -> Option<&'static str> {
        match self {
            IsoProfile::Base => None,
            IsoProfile::Xfce | IsoProfile::Cinnamon | IsoProfile::Mate => Some("lightdm.service"),
            IsoProfile::Kde | IsoProfile::Lxqt => Some("sddm.service"),
            IsoProfile::Gnome => Some("gdm.service"),
        }
    }

    /// Every package this profile adds, common tools first.
    pub fn all_packages(&self, with_zfs: bool) -> Vec<&'static str> {
        let mut packages: Vec<&'static str> = COMMON_PACKAGES.to_vec();
        packages.extend_from_slice(self.packages());
        if with_zfs {
            packages.extend_from_slice(ZFS_PACKAGES);
        }
        packages
    }
}

impl fmt::Display for IsoProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IsoProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower == "plasma" {
            return Ok(IsoProfile::Kde);
        }
        if lower == "releng" || lower == "console" {
            return Ok(IsoProfile::Base);
        }
        match IsoProfile::all().iter().find(|p| p.name() == lower) {
            Some(profile) => Ok(*profile),
            None => {
                let names: Vec<&str> = IsoProfile::all().iter().map(|p| p.name()).collect();
                bail!("Unknown ISO profile '{}' (expected one of: {})", s, names.join(", "))
            }
        }
    }
}

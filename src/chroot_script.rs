//! In-target configuration script.
//!
//! Renders one self-contained bash script from the [`InstallConfig`]. It runs
//! once inside `arch-chroot` and is deleted afterwards. Every value is passed
//! through a single-quoted shell variable, so nothing in the config is
//! interpreted by the shell. The rendered text contains the user's password
//! and is wiped from memory on drop.

use crate::config::InstallConfig;
use std::fmt::Write;
use zeroize::Zeroizing;

/// Where the script lives inside the target while it runs.
pub const SCRIPT_PATH: &str = "root/archey-setup.sh";

const SCRIPT_BODY: &str = r#"
# Timezone
ln -sf "/usr/share/zoneinfo/${TARGET_TIMEZONE}" /etc/localtime
hwclock --systohc

# Locale
grep -qxF "${TARGET_LOCALE} UTF-8" /etc/locale.gen || echo "${TARGET_LOCALE} UTF-8" >> /etc/locale.gen
locale-gen
echo "LANG=${TARGET_LOCALE}" > /etc/locale.conf

# 32-bit repository
sed -i '/^#\[multilib\]/{N;s/#\[multilib\]\n#Include/[multilib]\nInclude/}' /etc/pacman.conf || true

# Hostname
echo "${TARGET_HOSTNAME}" > /etc/hostname
cat > /etc/hosts <<EOF
127.0.0.1   localhost
::1         localhost
127.0.1.1   ${TARGET_HOSTNAME}.localdomain ${TARGET_HOSTNAME}
EOF

# Console and X11 keyboard layout (localectl does not work in a chroot)
echo "KEYMAP=${TARGET_KEYMAP}" > /etc/vconsole.conf
mkdir -p /etc/X11/xorg.conf.d
cat > /etc/X11/xorg.conf.d/00-keyboard.conf <<EOF
Section "InputClass"
    Identifier "system-keyboard"
    MatchIsKeyboard "on"
    Option "XkbLayout" "${TARGET_KEYMAP}"
EndSection
EOF

# Initramfs: warnings are routine, only a missing image is fatal
if ! mkinitcpio -P; then
    if ls /boot/initramfs-*.img >/dev/null 2>&1; then
        echo "mkinitcpio finished with warnings, continuing"
    else
        echo "mkinitcpio failed: no initramfs generated" >&2
        exit 1
    fi
fi

# Root login disabled; administration goes through sudo
passwd -l root

# User account
id -u "${TARGET_USER}" >/dev/null 2>&1 || \
    useradd -m -G wheel,audio,video,storage,optical -s /bin/bash "${TARGET_USER}"
printf '%s:%s\n' "${TARGET_USER}" "${TARGET_PASSWORD}" | chpasswd
unset TARGET_PASSWORD

# Sudo for wheel
mkdir -p /etc/sudoers.d
echo "%wheel ALL=(ALL:ALL) ALL" > /etc/sudoers.d/wheel
chmod 440 /etc/sudoers.d/wheel

# Networking
systemctl enable NetworkManager.service || echo "WARNING: NetworkManager enable failed"
systemctl enable systemd-resolved.service 2>/dev/null || true
systemctl enable iwd.service 2>/dev/null || true

# Selected services
for svc in "${SERVICES[@]}"; do
    systemctl enable "${svc}" 2>/dev/null || echo "WARNING: ${svc} not enabled"
done
"#;

pub struct ChrootScript {
    contents: Zeroizing<String>,
}

impl ChrootScript {
    pub fn render(config: &InstallConfig) -> Self {
        let mut s = Zeroizing::new(String::with_capacity(4096));
        s.push_str("#!/bin/bash\nset -eo pipefail\n\n");

        for (name, value) in [
            ("TARGET_TIMEZONE", config.timezone.as_str()),
            ("TARGET_LOCALE", config.locale.as_str()),
            ("TARGET_KEYMAP", config.keymap.as_str()),
            ("TARGET_HOSTNAME", config.hostname.as_str()),
            ("TARGET_USER", config.username.as_str()),
            ("TARGET_PASSWORD", config.password.expose()),
        ] {
            let _ = writeln!(s, "{}={}", name, shell_quote(value));
        }

        let services: Vec<String> = config
            .services
            .iter()
            .map(|svc| svc.trim())
            .filter(|svc| !svc.is_empty())
            .map(shell_quote)
            .collect();
        let _ = writeln!(s, "SERVICES=({})", services.join(" "));

        s.push_str(SCRIPT_BODY);
        Self { contents: s }
    }

    pub fn as_str(&self) -> &str {
        &self.contents
    }
}

/// Single-quote `value` for bash.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

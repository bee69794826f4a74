//! Who this client says it is at registration.

use std::fs;
use std::path::Path;

const SYS_NET: &str = "/sys/class/net";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub mac_id: String,
}

impl Identity {
    /// Fill in whatever was not given on the command line.
    pub fn resolve(name: Option<String>, mac_id: Option<String>) -> Self {
        Self {
            name: name.unwrap_or_else(default_name),
            mac_id: mac_id.unwrap_or_else(default_mac_id),
        }
    }
}

/// Login name, falling back to the host name.
pub fn default_name() -> String {
    ["USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
}

/// Hex hardware address of the first real interface, or a stable id derived
/// from the host name when none can be read.
pub fn default_mac_id() -> String {
    mac_from_sysfs(Path::new(SYS_NET)).unwrap_or_else(|| {
        let host = gethostname::gethostname();
        hostname_id(&host.to_string_lossy())
    })
}

fn mac_from_sysfs(root: &Path) -> Option<String> {
    let mut ifaces: Vec<_> = fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    ifaces.sort();
    ifaces
        .iter()
        .filter(|p| p.file_name().is_some_and(|n| n != "lo"))
        .filter_map(|p| fs::read_to_string(p.join("address")).ok())
        .find_map(|addr| format_mac(addr.trim()))
}

/// `aa:bb:cc:dd:ee:ff` → `0xaabbccddeeff` (leading zeros dropped).
/// All-zero addresses yield `None`.
pub fn format_mac(addr: &str) -> Option<String> {
    let parts: Vec<&str> = addr.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut value = 0u64;
    for part in parts {
        value = (value << 8) | u64::from(u8::from_str_radix(part, 16).ok()?);
    }
    (value != 0).then(|| format!("{value:#x}"))
}

/// 48-bit FNV-1a of the host name with the multicast bit set, as a random-node id would be.
fn hostname_id(host: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in host.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let node = (hash & 0xffff_ffff_ffff) | (1 << 40);
    format!("{node:#x}")
}

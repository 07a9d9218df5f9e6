//! Host network state the daemon reports on.

use std::io;
use std::path::PathBuf;

/// Read access to per-interface kernel settings.
pub trait SystemState: Send + Sync {
    /// Whether IPv6 forwarding is enabled on `interface`.
    fn ipv6_forwarding(&self, interface: &str) -> io::Result<bool>;
}

/// [`SystemState`] backed by the Linux `net.ipv6.conf` sysctl tree.
#[derive(Debug, Clone)]
pub struct Sysctl {
    root: PathBuf,
}

impl Default for Sysctl {
    fn default() -> Self {
        Self::with_root("/proc/sys/net/ipv6/conf")
    }
}

impl Sysctl {
    /// Read settings from `root/<interface>/` instead of procfs.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SystemState for Sysctl {
    fn ipv6_forwarding(&self, interface: &str) -> io::Result<bool> {
        let path = self.root.join(interface).join("forwarding");
        let raw = std::fs::read_to_string(&path)?;
        match raw.trim() {
            "0" => Ok(false),
            "1" | "2" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected value {other:?} in {}", path.display()),
            )),
        }
    }
}

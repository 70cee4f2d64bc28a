//! Installation directory layout

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Client state file name inside the installation root
pub const CLIENT_STATE_FILE: &str = "install-state-client.json";
/// Default configuration directory name
pub const DEFAULT_CONFIG_DIR: &str = "config-client";
/// Default remote Trojan port
pub const DEFAULT_SERVER_PORT: u16 = 8443;
/// System-wide installation root on Unix hosts
pub const UNIX_CONFIG_ROOT: &str = "/etc/peerlink";

pub const OUTBOUNDS_FILE: &str = "outbounds.json";
pub const INBOUNDS_FILE: &str = "inbounds.json";
pub const ROUTING_FILE: &str = "routing.json";
pub const LOGS_FILE: &str = "logs.json";

/// Resolved paths of one client installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub install_dir: PathBuf,
    pub config_dir: PathBuf,
    pub state_file: PathBuf,
}

impl InstallPaths {
    /// Resolve an installation root and its config directory.
    ///
    /// Relative roots are made absolute against the working directory;
    /// a relative config dir is placed under the root.
    pub fn resolve(install_dir: &Path, config_dir: Option<&str>) -> Result<Self> {
        if install_dir.as_os_str().is_empty() {
            return Err(Error::validation("install directory is required"));
        }
        let install_dir = if install_dir.is_absolute() {
            install_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| Error::persist("resolve", install_dir, e))?
                .join(install_dir)
        };

        let config_dir = match config_dir.map(str::trim).filter(|c| !c.is_empty()) {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => install_dir.join(dir),
            None => install_dir.join(DEFAULT_CONFIG_DIR),
        };

        Ok(InstallPaths {
            state_file: install_dir.join(CLIENT_STATE_FILE),
            install_dir,
            config_dir,
        })
    }

    pub fn outbounds(&self) -> PathBuf {
        self.config_dir.join(OUTBOUNDS_FILE)
    }

    pub fn inbounds(&self) -> PathBuf {
        self.config_dir.join(INBOUNDS_FILE)
    }

    pub fn routing(&self) -> PathBuf {
        self.config_dir.join(ROUTING_FILE)
    }

    pub fn logs(&self) -> PathBuf {
        self.config_dir.join(LOGS_FILE)
    }
}

/// Platform default installation root.
///
/// An existing system installation wins, then the user's config directory,
/// then the temp directory.
pub fn default_install_dir() -> PathBuf {
    let system = Path::new(UNIX_CONFIG_ROOT);
    if cfg!(unix) && looks_like_install_root(system) {
        return system.to_path_buf();
    }
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return PathBuf::from(home).join(".config").join("peerlink");
    }
    if let Some(profile) = std::env::var_os("USERPROFILE").filter(|h| !h.is_empty()) {
        return PathBuf::from(profile).join("peerlink");
    }
    std::env::temp_dir().join("peerlink")
}

/// Whether `dir` holds a client state file or config directory
pub fn looks_like_install_root(dir: &Path) -> bool {
    dir.join(CLIENT_STATE_FILE).is_file() || dir.join(DEFAULT_CONFIG_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_config_dir() {
        let paths = InstallPaths::resolve(Path::new("/opt/pl"), None).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/opt/pl/config-client"));
        assert_eq!(paths.state_file, PathBuf::from("/opt/pl/install-state-client.json"));
        assert_eq!(paths.routing(), PathBuf::from("/opt/pl/config-client/routing.json"));

        let paths = InstallPaths::resolve(Path::new("/opt/pl"), Some("custom")).unwrap();
        assert_eq!(paths.inbounds(), PathBuf::from("/opt/pl/custom/inbounds.json"));
    }

    #[test]
    fn test_resolve_absolute_config_dir() {
        let paths = InstallPaths::resolve(Path::new("/opt/pl"), Some("/etc/xcfg")).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/etc/xcfg"));
    }

    #[test]
    fn test_resolve_relative_install_dir() {
        let paths = InstallPaths::resolve(Path::new("inst"), Some("  ")).unwrap();
        assert!(paths.install_dir.is_absolute());
        assert!(paths.config_dir.ends_with("inst/config-client"));
    }

    #[test]
    fn test_resolve_requires_dir() {
        assert!(InstallPaths::resolve(Path::new(""), None).is_err());
    }

    #[test]
    fn test_looks_like_install_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!looks_like_install_root(dir.path()));
        std::fs::create_dir(dir.path().join(DEFAULT_CONFIG_DIR)).unwrap();
        assert!(looks_like_install_root(dir.path()));

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLIENT_STATE_FILE), "{}").unwrap();
        assert!(looks_like_install_root(dir.path()));
    }

    #[test]
    fn test_default_install_dir() {
        let dir = default_install_dir();
        let system = Path::new(UNIX_CONFIG_ROOT);
        if cfg!(unix) && looks_like_install_root(system) {
            assert_eq!(dir, system);
        } else {
            assert!(dir.ends_with("peerlink"));
            assert_ne!(dir, system);
        }
    }
}

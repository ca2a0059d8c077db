//! Configuration management
//!
//! All filesystem contracts of the daemon live here with their production
//! defaults. A TOML file may override any of them, which is mostly useful
//! for development images and tests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Filesystem paths the daemon operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// File listing the supplementary groups every new user joins.
    pub group_ids_file: PathBuf,

    /// Template directory copied into every new home.
    pub skel_dir: PathBuf,

    /// Directory regular user homes are created under.
    pub home_root: PathBuf,

    /// Fixed home directory of the guest user.
    pub guest_home: PathBuf,

    /// File carrying the `LAST_LOGIN_UID` line.
    pub environment_file: PathBuf,

    /// Directory holding per-user environment data, one subdir per UID.
    pub user_environment_dir: PathBuf,

    /// Hook scripts executed after a user has been created.
    pub create_script_dir: PathBuf,

    /// Hook scripts executed when a user is being removed.
    pub remove_script_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            group_ids_file: PathBuf::from("/usr/share/sailfish-setup/group_ids.env"),
            skel_dir: PathBuf::from("/etc/skel"),
            home_root: PathBuf::from("/home"),
            guest_home: PathBuf::from("/home/sailfish_guest"),
            environment_file: PathBuf::from("/etc/environment"),
            user_environment_dir: PathBuf::from("/home/.system/var/lib/environment"),
            create_script_dir: PathBuf::from("/usr/share/user-managerd/create.d"),
            remove_script_dir: PathBuf::from("/usr/share/user-managerd/remove.d"),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: Settings =
            toml::from_str(&content).context("Failed to parse config file")?;
        Ok(settings)
    }

    /// Home directory path for a regular user.
    pub fn home_path(&self, user: &str) -> PathBuf {
        self.home_root.join(user)
    }

    /// Per-user environment data directory for `uid`.
    pub fn user_environment_path(&self, uid: u32) -> PathBuf {
        self.user_environment_dir.join(uid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths() {
        let settings = Settings::default();
        assert_eq!(settings.skel_dir, PathBuf::from("/etc/skel"));
        assert_eq!(settings.home_path("alice"), PathBuf::from("/home/alice"));
        assert_eq!(
            settings.user_environment_path(100001),
            PathBuf::from("/home/.system/var/lib/environment/100001")
        );
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let settings: Settings = toml::from_str("home_root = \"/tmp/homes\"").unwrap();
        assert_eq!(settings.home_root, PathBuf::from("/tmp/homes"));
        assert_eq!(settings.environment_file, PathBuf::from("/etc/environment"));
    }
}

//! Configuration vault: reads and writes `~/.mnemos/config.toml`.
//!
//! The file wraps a [`MemoryConfig`] under a `[memory]` table plus a few
//! shell-level settings.  The first run writes defaults with the data
//! directory pointed at `~/.mnemos/data`.

use std::fs;
use std::path::{Path, PathBuf};

use mnemos_memory::MemoryConfig;
use serde::{Deserialize, Serialize};

/// Persisted shell configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Save the indexes when the shell exits (including on Ctrl-C).
    #[serde(default = "default_true")]
    pub save_on_exit: bool,

    /// Default `k` for `/similar`.
    #[serde(default = "default_k")]
    pub default_k: usize,

    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_true() -> bool {
    true
}
fn default_k() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            save_on_exit: true,
            default_k: default_k(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Config {
    /// Defaults with the store under `<home>/.mnemos/data`.
    pub fn for_home(home: &str) -> Self {
        Self {
            memory: MemoryConfig::default().with_data_dir(vault_dir_for_home(home).join("data")),
            ..Self::default()
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.mnemos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

fn vault_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mnemos")
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    vault_dir_for_home(home).join("config.toml")
}

/// Load the config, or write and return defaults on first run.
///
/// The second element is `true` when the file was just created.
pub fn load_or_init() -> Result<(Config, bool), String> {
    let home = home_dir();
    let path = config_path_for_home(&home);
    match load_from(&path)? {
        Some(cfg) => Ok((cfg, false)),
        None => {
            let mut cfg = Config::for_home(&home);
            save_to(&cfg, &path)?;
            apply_env_overrides(&mut cfg);
            Ok((cfg, true))
        }
    }
}

/// Load the config from `path`.  Returns `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.memory
        .validate()
        .map_err(|e| format!("{} ({})", e, path.display()))?;
    Ok(Some(cfg))
}

/// Apply environment overrides.
///
/// `MNEMOS_SAVE_ON_EXIT` (`true` / `false`) plus every `MNEMOS_*` variable
/// understood by [`MemoryConfig::apply_env_overrides`].
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MNEMOS_SAVE_ON_EXIT")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.save_on_exit = flag;
    }
    cfg.memory.apply_env_overrides();
}

/// Save the config to `path`, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_keeps_memory_table() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let home = dir.path().to_string_lossy().to_string();
        let path = config_path_for_home(&home);

        let mut cfg = Config::for_home(&home);
        cfg.memory.btree_order = 16;
        cfg.default_k = 9;
        save_to(&cfg, &path).expect("save");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("[memory]"));

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.memory.btree_order, 16);
        assert_eq!(loaded.default_k, 9);
        assert_eq!(
            loaded.memory.data_dir,
            Some(dir.path().join(".mnemos").join("data"))
        );
    }

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.default_k, 5);
        assert_eq!(loaded.memory.btree_order, 32);
    }

    #[test]
    fn invalid_memory_section_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[memory]\nbtree_order = 1\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_mnemos_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.mnemos/config.toml"));
    }

    #[test]
    fn save_on_exit_override() {
        // SAFETY: no other test in this crate touches this variable.
        unsafe { std::env::set_var("MNEMOS_SAVE_ON_EXIT", "false") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.save_on_exit);

        unsafe { std::env::set_var("MNEMOS_SAVE_ON_EXIT", "maybe") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.save_on_exit);
        unsafe { std::env::remove_var("MNEMOS_SAVE_ON_EXIT") };
    }
}

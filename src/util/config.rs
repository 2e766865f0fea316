//! Configuration file support for codesave.
//!
//! codesave reads two configuration file locations:
//! - Global: `~/.codesave/config.toml` - User-wide defaults
//! - Project: `.codesave/config.toml` - Project-specific overrides
//!
//! Project config takes precedence over global config, and command-line
//! flags take precedence over both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::filter::{Filter, Filters};

/// codesave configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Archive building settings
    pub save: SaveConfig,

    /// Namespacing settings
    pub unique: UniqueConfig,

    /// Executable archive settings
    pub pyz: PyzConfig,
}

/// Settings for `codesave save`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    /// Only archive Python source files
    pub only_py: bool,

    /// Skip files larger than this size (e.g. "10m")
    pub ignore_larger_than: Option<String>,

    /// Glob patterns of names to leave out
    pub exclude: Vec<String>,

    /// Glob patterns of file names to keep; everything else is left out
    pub include: Vec<String>,

    /// Extra search roots whose libraries are archived too
    pub extra_pythonpath: Vec<PathBuf>,

    /// Record `pip freeze` output as packages.txt
    pub record_packages: bool,

    /// Write the default `__main__.py` dispatcher when none exists
    #[serde(default = "default_true")]
    pub main: bool,
}

impl Default for SaveConfig {
    fn default() -> Self {
        SaveConfig {
            only_py: false,
            ignore_larger_than: None,
            exclude: Vec::new(),
            include: Vec::new(),
            extra_pythonpath: Vec::new(),
            record_packages: false,
            main: true,
        }
    }
}

impl SaveConfig {
    /// Build the filter chain these settings describe.
    pub fn filters(&self) -> Result<Filters> {
        let mut filters = Filters::new();
        if self.only_py {
            filters.push(Filter::include_only(&["*.py"])?);
        }
        if !self.include.is_empty() {
            filters.push(Filter::include_only(&self.include)?);
        }
        if !self.exclude.is_empty() {
            filters.push(Filter::exclude(&self.exclude)?);
        }
        if let Some(ref size) = self.ignore_larger_than {
            let filter = Filter::larger_than(size)
                .with_context(|| format!("invalid value for ignore_larger_than: `{}`", size))?;
            filters.push(filter);
        }
        Ok(filters)
    }
}

/// Settings for `codesave unique`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UniqueConfig {
    /// Copy non-source entries byte for byte instead of rewriting them
    pub save_non_code: bool,

    /// Insert `__init__.py` markers so the prefixed tree is importable
    pub add_init: bool,
}

impl Default for UniqueConfig {
    fn default() -> Self {
        UniqueConfig {
            save_non_code: true,
            add_init: true,
        }
    }
}

/// Settings for `codesave make-pyz` and `codesave run`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PyzConfig {
    /// Python interpreter to use instead of the one found on PATH
    pub python: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        // Save settings
        if other.save.only_py {
            self.save.only_py = true;
        }
        if other.save.ignore_larger_than.is_some() {
            self.save.ignore_larger_than = other.save.ignore_larger_than;
        }
        if !other.save.exclude.is_empty() {
            self.save.exclude = other.save.exclude;
        }
        if !other.save.include.is_empty() {
            self.save.include = other.save.include;
        }
        if !other.save.extra_pythonpath.is_empty() {
            self.save.extra_pythonpath = other.save.extra_pythonpath;
        }
        if other.save.record_packages {
            self.save.record_packages = true;
        }
        if !other.save.main {
            self.save.main = false;
        }

        // Unique settings default to true, so only an explicit opt-out merges
        if !other.unique.save_non_code {
            self.unique.save_non_code = false;
        }
        if !other.unique.add_init {
            self.unique.add_init = false;
        }

        // Pyz settings
        if other.pyz.python.is_some() {
            self.pyz.python = other.pyz.python;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.codesave/config.toml)
/// 2. Global config (~/.codesave/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::default();

    if global_path.exists() {
        let global = Config::load_or_default(global_path);
        config.merge(global);
    }

    if project_path.exists() {
        let project = Config::load_or_default(project_path);
        config.merge(project);
    }

    config
}

/// Get the global codesave config directory (~/.codesave).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".codesave"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::IgnoreFilter;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.save.only_py);
        assert!(config.save.main);
        assert!(config.unique.save_non_code);
        assert!(config.unique.add_init);
        assert!(config.pyz.python.is_none());
    }

    #[test]
    fn test_config_load() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
[save]
only_py = true
ignore_larger_than = "10m"
exclude = ["*.ckpt", "wandb"]

[unique]
add_init = false

[pyz]
python = "/opt/python/bin/python3"
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();
        assert!(config.save.only_py);
        assert_eq!(config.save.ignore_larger_than, Some("10m".to_string()));
        assert_eq!(config.save.exclude, vec!["*.ckpt", "wandb"]);
        assert!(config.save.main);
        assert!(!config.unique.add_init);
        assert!(config.unique.save_non_code);
        assert_eq!(
            config.pyz.python,
            Some(PathBuf::from("/opt/python/bin/python3"))
        );
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.save.ignore_larger_than = Some("1m".to_string());
        base.save.exclude = vec!["*.log".to_string()];

        let mut override_cfg = Config::default();
        override_cfg.save.ignore_larger_than = Some("5m".to_string());
        override_cfg.unique.add_init = false;

        base.merge(override_cfg);

        assert_eq!(base.save.ignore_larger_than, Some("5m".to_string()));
        assert_eq!(base.save.exclude, vec!["*.log"]); // Not overridden
        assert!(!base.unique.add_init);
    }

    #[test]
    fn test_load_config_precedence() {
        let tmp = TempDir::new().unwrap();
        let global = tmp.path().join("global.toml");
        let project = tmp.path().join("project.toml");
        std::fs::write(&global, "[save]\nignore_larger_than = \"1k\"\nrecord_packages = true\n")
            .unwrap();
        std::fs::write(&project, "[save]\nignore_larger_than = \"2k\"\n").unwrap();

        let config = load_config(&global, &project);
        assert_eq!(config.save.ignore_larger_than, Some("2k".to_string()));
        assert!(config.save.record_packages);
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[save\nonly_py = ").unwrap();
        let config = Config::load_or_default(&path);
        assert!(!config.save.only_py);
    }

    #[test]
    fn test_save_filters() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.py"), "").unwrap();
        std::fs::write(tmp.path().join("big.bin"), vec![0u8; 3000]).unwrap();

        let save = SaveConfig {
            ignore_larger_than: Some("1k".to_string()),
            ..Default::default()
        };
        let filters = save.filters().unwrap();
        let excluded = filters.ignored(tmp.path(), &["a.py".into(), "big.bin".into()]);
        assert_eq!(excluded.into_iter().collect::<Vec<_>>(), vec!["big.bin"]);

        let bad = SaveConfig {
            ignore_larger_than: Some("huge".to_string()),
            ..Default::default()
        };
        let err = bad.filters().unwrap_err();
        assert!(format!("{:#}", err).contains("ignore_larger_than"));
    }
}

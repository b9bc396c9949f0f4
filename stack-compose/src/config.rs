use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::{
    fs::File,
    path::{Path, PathBuf},
};

pub const CONFIG_FILE_NAMES: [&str; 2] = ["stack-compose.yml", "stack-compose.yaml"];

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
struct ConfigFile {
    registry_host: String,
    org: String,
    default_version: String,
    namespace: String,
    services_root: PathBuf,
    template_dir: Option<PathBuf>,
    kubeconfig: PathBuf,
}

impl Default for ConfigFile {
    fn default() -> Self {
        ConfigFile {
            registry_host: "gcr.io".into(),
            org: "stack-compose".into(),
            default_version: "latest".into(),
            namespace: "development".into(),
            services_root: PathBuf::from("services"),
            template_dir: None,
            kubeconfig: PathBuf::from("kubeconfig.yaml"),
        }
    }
}

/// Settings for one run. Built once, never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub registry_host: String,
    pub org: String,
    pub default_version: String,
    pub namespace: String,
    pub services_root: PathBuf,
    pub template_dir: Option<PathBuf>,
    pub kubeconfig: PathBuf,
}

/// Values given on the command line or in the environment. These win over
/// the config file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub registry_host: Option<String>,
    pub org: Option<String>,
    pub version: Option<String>,
    pub namespace: Option<String>,
}

pub fn find_config_file<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    for path in path.as_ref().ancestors() {
        for name in CONFIG_FILE_NAMES.iter() {
            let config_path = path.join(name);
            if config_path.exists() {
                return Some(config_path);
            }
        }
    }

    None
}

impl Config {
    /// Reads `path`, resolving relative paths in it against its directory.
    pub fn from_file(path: &Path) -> Result<Config> {
        let file = File::open(path)?;
        let parsed: ConfigFile = serde_yaml::from_reader(file)
            .map_err(|err| anyhow!("invalid config file {:?}: {}", path, err))?;

        let base = path
            .parent()
            .ok_or_else(|| anyhow!("config file {:?} has no parent", path))?;

        Ok(Config::from_parsed(parsed, base))
    }

    /// Defaults, with paths relative to `base`.
    pub fn defaults(base: &Path) -> Config {
        Config::from_parsed(ConfigFile::default(), base)
    }

    fn from_parsed(file: ConfigFile, base: &Path) -> Config {
        Config {
            registry_host: file.registry_host,
            org: file.org,
            default_version: file.default_version,
            namespace: file.namespace,
            services_root: base.join(file.services_root),
            template_dir: file.template_dir.map(|dir| base.join(dir)),
            kubeconfig: base.join(file.kubeconfig),
        }
    }

    pub fn with_overrides(self, overrides: Overrides) -> Config {
        Config {
            registry_host: overrides.registry_host.unwrap_or(self.registry_host),
            org: overrides.org.unwrap_or(self.org),
            default_version: overrides.version.unwrap_or(self.default_version),
            namespace: overrides.namespace.unwrap_or(self.namespace),
            ..self
        }
    }
}

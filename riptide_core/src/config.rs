use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming a TOML config file, read by the plugin ABI
/// init hook where the host engine offers no other configuration channel.
pub const CONFIG_ENV: &str = "RIPTIDE_CONFIG";
/// Environment variable overriding the plateau-signal file path.
pub const PLATEAU_FILE_ENV: &str = "RIPTIDE_PLATEAU_FILE";
/// Environment variable enabling stderr logging in the plugin ABI layer.
pub const LOG_ENV: &str = "RIPTIDE_LOG";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    #[serde(default = "default_lam")]
    pub lam: f64,
    #[serde(default = "default_tau")]
    pub tau: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
}

fn default_lam() -> f64 {
    0.2
}
fn default_tau() -> f64 {
    0.8
}
fn default_eps() -> f64 {
    0.02
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lam: default_lam(),
            tau: default_tau(),
            eps: default_eps(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CurriculumSettings {
    /// Path of the plateau-signal file. `None` disables the external override.
    #[serde(default)]
    pub plateau_file: Option<PathBuf>,
    /// Minimum time between signal-file reads; zero re-reads on every trial.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for CurriculumSettings {
    fn default() -> Self {
        Self {
            plateau_file: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl CurriculumSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Fixed RNG seed for reproducible runs. The plugin ABI overrides this
    /// with the seed the host engine passes to its init hook.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SidecarSettings {
    /// Host engine stats file (or its output directory) to watch.
    #[serde(default)]
    pub stats_file: Option<PathBuf>,
    /// Destination of the plateau-signal file.
    #[serde(default)]
    pub signal_file: Option<PathBuf>,
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Path-count growth below this over a full window declares stagnation.
    #[serde(default = "default_min_paths_delta")]
    pub min_paths_delta: u64,
}

fn default_check_interval_secs() -> u64 {
    10
}
fn default_window_secs() -> u64 {
    180
}
fn default_min_paths_delta() -> u64 {
    3
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            stats_file: None,
            signal_file: None,
            check_interval_secs: default_check_interval_secs(),
            window_secs: default_window_secs(),
            min_paths_delta: default_min_paths_delta(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MutatorConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub curriculum: CurriculumSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sidecar: SidecarSettings,
}

impl MutatorConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: MutatorConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }

    /// Builds a config from the environment, for hosts that can only pass
    /// settings through env vars (the plugin ABI path).
    ///
    /// An unusable config file degrades to defaults with a logged warning
    /// rather than failing: a misconfigured mutator must still come up, per
    /// the fail-closed contract. `RIPTIDE_PLATEAU_FILE` overrides the signal
    /// path whether or not a config file was given.
    pub fn from_env() -> Self {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(raw_path) => {
                let path = PathBuf::from(raw_path);
                match Self::load_from_file(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        log::warn!("Ignoring unusable config file {:?}: {}", path, e);
                        Self::default()
                    }
                }
            }
            None => Self::default(),
        };

        if let Some(raw_path) = std::env::var_os(PLATEAU_FILE_ENV) {
            config.curriculum.plateau_file = Some(PathBuf::from(raw_path));
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_all_defaults() {
        let config: MutatorConfig = toml::from_str("").expect("Empty TOML should parse");
        assert_eq!(config.scheduler.lam, 0.2);
        assert_eq!(config.scheduler.tau, 0.8);
        assert_eq!(config.scheduler.eps, 0.02);
        assert!(config.curriculum.plateau_file.is_none());
        assert_eq!(config.curriculum.poll_interval_ms, 1000);
        assert!(config.engine.seed.is_none());
        assert_eq!(config.sidecar.check_interval_secs, 10);
        assert_eq!(config.sidecar.window_secs, 180);
        assert_eq!(config.sidecar.min_paths_delta, 3);
    }

    #[test]
    fn full_config_parses_with_kebab_case_keys() {
        let toml_str = r#"
            [scheduler]
            lam = 0.5
            tau = 1.5
            eps = 0.1

            [curriculum]
            plateau-file = "/tmp/riptide/plateau.json"
            poll-interval-ms = 250

            [engine]
            seed = 42

            [sidecar]
            stats-file = "/tmp/afl-out/default/fuzzer_stats"
            signal-file = "/tmp/riptide/plateau.json"
            check-interval-secs = 5
            window-secs = 60
            min-paths-delta = 1
        "#;
        let config: MutatorConfig = toml::from_str(toml_str).expect("Full TOML should parse");
        assert_eq!(config.scheduler.lam, 0.5);
        assert_eq!(config.scheduler.tau, 1.5);
        assert_eq!(config.scheduler.eps, 0.1);
        assert_eq!(
            config.curriculum.plateau_file,
            Some(PathBuf::from("/tmp/riptide/plateau.json"))
        );
        assert_eq!(config.curriculum.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.engine.seed, Some(42));
        assert_eq!(config.sidecar.window_secs, 60);
        assert_eq!(config.sidecar.min_paths_delta, 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let toml_str = r#"
            [scheduler]
            lam = 0.5
            learning-rate = 0.5
        "#;
        let result: Result<MutatorConfig, _> = toml::from_str(toml_str);
        assert!(
            result.is_err(),
            "A misspelled key should be rejected, not silently ignored"
        );
    }

    #[test]
    fn load_from_file_reports_missing_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("no_such_config.toml");
        let result = MutatorConfig::load_from_file(&path);
        assert!(result.is_err(), "Loading a missing file should fail");
    }

    #[test]
    fn load_from_file_round_trips_a_written_config() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("riptide.toml");
        std::fs::write(&path, "[scheduler]\neps = 0.0\n").expect("Failed to write config");

        let config =
            MutatorConfig::load_from_file(&path).expect("Written config should load cleanly");
        assert_eq!(config.scheduler.eps, 0.0);
        assert_eq!(config.scheduler.lam, 0.2, "Unset keys keep their defaults");
    }
}

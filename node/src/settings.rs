use anyhow::{bail, Result};
use clap::ArgMatches;
use config::{Config, File as ConfigFile};
use peerlink_network::MeshConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Node settings: TOML file, then `PEERLINK_*` environment, then CLI flags.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    // Simulation
    pub instances: usize,
    pub run_secs: u64,
    pub ping_interval_ms: u64,
    pub data_dir: Option<PathBuf>,

    // Mesh tunables
    pub heart_beat_interval_ms: u64,
    pub ask_around_interval_ms: u64,
    pub default_ttl_secs: u64,
    pub tick_interval_ms: u64,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            instances: 3,
            run_secs: 10,
            ping_interval_ms: 1000,
            data_dir: None,
            heart_beat_interval_ms: 500,
            ask_around_interval_ms: 1000,
            default_ttl_secs: 30,
            tick_interval_ms: 50,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

fn get_u64(config: &Config, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| config.get_int(key).ok())
        .map(|value| value.max(0) as u64)
}

fn get_string(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| config.get_string(key).ok())
}

impl NodeSettings {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            let path = PathBuf::from(path);
            if !path.exists() {
                bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("PEERLINK"));
        let config = builder.build()?;

        let defaults = Self::default();
        Ok(Self {
            instances: get_u64(&config, &["instances", "simulation.instances"])
                .map(|n| n as usize)
                .unwrap_or(defaults.instances),
            run_secs: get_u64(&config, &["run_secs", "simulation.run_secs"]).unwrap_or(defaults.run_secs),
            ping_interval_ms: get_u64(&config, &["ping_interval_ms", "simulation.ping_interval_ms"])
                .unwrap_or(defaults.ping_interval_ms),
            data_dir: get_string(&config, &["data_dir", "simulation.data_dir"]).map(PathBuf::from),
            heart_beat_interval_ms: get_u64(&config, &["heart_beat_interval_ms", "mesh.heart_beat_interval_ms"])
                .unwrap_or(defaults.heart_beat_interval_ms),
            ask_around_interval_ms: get_u64(&config, &["ask_around_interval_ms", "mesh.ask_around_interval_ms"])
                .unwrap_or(defaults.ask_around_interval_ms),
            default_ttl_secs: get_u64(&config, &["default_ttl_secs", "mesh.default_ttl_secs"])
                .unwrap_or(defaults.default_ttl_secs),
            tick_interval_ms: get_u64(&config, &["tick_interval_ms", "mesh.tick_interval_ms"])
                .unwrap_or(defaults.tick_interval_ms),
            log_level: get_string(&config, &["log_level"]).unwrap_or(defaults.log_level),
            log_format: get_string(&config, &["log_format"]).unwrap_or(defaults.log_format),
        })
    }

    pub fn apply_overrides(&mut self, matches: &ArgMatches) {
        if let Some(instances) = matches.get_one::<usize>("instances") {
            self.instances = *instances;
        }
        if let Some(run_secs) = matches.get_one::<u64>("run-secs") {
            self.run_secs = *run_secs;
        }
        if let Some(data_dir) = matches.get_one::<String>("data-dir") {
            self.data_dir = Some(PathBuf::from(data_dir));
        }
        if let Some(log_level) = matches.get_one::<String>("log-level") {
            self.log_level = log_level.clone();
        }
        if let Some(log_format) = matches.get_one::<String>("log-format") {
            self.log_format = log_format.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.instances < 2 {
            bail!("a mesh needs at least 2 instances, got {}", self.instances);
        }
        if self.heart_beat_interval_ms == 0 || self.tick_interval_ms == 0 {
            bail!("heart_beat_interval_ms and tick_interval_ms must be positive");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            bail!("unknown log format {:?}", self.log_format);
        }
        Ok(())
    }

    pub fn mesh_config(&self) -> MeshConfig {
        let heart_beat_interval = Duration::from_millis(self.heart_beat_interval_ms);
        let mut config = MeshConfig::default().with_heart_beat_interval(heart_beat_interval);
        config.heart_beat_slow_down = heart_beat_interval / 2;
        config.heart_beat_max_interval = heart_beat_interval * 5 / 2;
        config.ask_around_interval = Duration::from_millis(self.ask_around_interval_ms);
        config.default_ttl = Duration::from_secs(self.default_ttl_secs);
        config.tick_interval = Duration::from_millis(self.tick_interval_ms);
        config
    }
}

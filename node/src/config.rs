use anyhow::{Context, Result};
use clap::ValueEnum;
use config::{Config, File as ConfigFile};
use portfoliofy_handle_registry::RegistryConfig;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Development,
    Production,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Sled,
    Redis,
}

impl StoreBackend {
    fn from_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "sled" => Some(StoreBackend::Sled),
            "redis" => Some(StoreBackend::Redis),
            _ => None,
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Sled => "sled",
            StoreBackend::Redis => "redis",
        };
        f.write_str(value)
    }
}

#[derive(Clone, Copy, Debug)]
struct ProfileDefaults {
    name: &'static str,
    config_filename: &'static str,
    node_id: &'static str,
    rpc_host: &'static str,
    rpc_port: u16,
    store: StoreBackend,
    data_dir: &'static str,
    log_level: &'static str,
    log_format: &'static str,
    prometheus_enabled: bool,
    dev_mode: bool,
}

impl ProfileDefaults {
    fn config_path(&self) -> PathBuf {
        PathBuf::from("config").join(self.config_filename)
    }
}

impl Profile {
    fn defaults(&self) -> ProfileDefaults {
        match self {
            Profile::Development => ProfileDefaults {
                name: "development",
                config_filename: "development.toml",
                node_id: "portfoliofy-dev",
                rpc_host: "127.0.0.1",
                rpc_port: 8_080,
                store: StoreBackend::Memory,
                data_dir: "./data/development",
                log_level: "debug",
                log_format: "pretty",
                prometheus_enabled: true,
                dev_mode: true,
            },
            Profile::Production => ProfileDefaults {
                name: "production",
                config_filename: "production.toml",
                node_id: "portfoliofy-node",
                rpc_host: "0.0.0.0",
                rpc_port: 8_080,
                store: StoreBackend::Redis,
                data_dir: "/var/lib/portfoliofy",
                log_level: "info",
                log_format: "json",
                prometheus_enabled: true,
                dev_mode: false,
            },
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.defaults().name)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Profile,
    pub config_path: Option<PathBuf>,
    pub node_id: String,

    // HTTP
    pub rpc_host: String,
    pub rpc_port: u16,

    // Storage
    pub store: StoreBackend,
    pub data_dir: String,
    pub redis_url: Option<String>,

    pub registry: RegistryConfig,

    // Observability
    pub prometheus_enabled: bool,
    pub log_level: String,
    pub log_format: String,

    pub dev_mode: bool,
}

impl AppConfig {
    pub fn load(profile: Profile, config_path_override: Option<&str>) -> Result<Self> {
        let defaults = profile.defaults();
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = defaults.config_path();
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix("PORTFOLIOFY"));
        let config = builder.build()?;

        let store = match get_string_value(&config, &["STORE", "storage.backend"]) {
            Some(value) => StoreBackend::from_value(&value)
                .with_context(|| format!("unknown storage backend '{value}'"))?,
            None => defaults.store,
        };

        let rpc_port = match get_string_value(&config, &["RPC_PORT", "rpc.port"]) {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("RPC_PORT '{value}' is not a valid port"))?,
            None => defaults.rpc_port,
        };

        Ok(Self {
            profile,
            node_id: get_string_value(&config, &["NODE_ID", "node.id"])
                .unwrap_or_else(|| defaults.node_id.to_string()),
            rpc_host: get_string_value(&config, &["RPC_HOST", "rpc.host"])
                .unwrap_or_else(|| defaults.rpc_host.to_string()),
            rpc_port,
            store,
            data_dir: get_string_value(&config, &["DATA_DIR", "storage.data_dir"])
                .unwrap_or_else(|| defaults.data_dir.to_string()),
            redis_url: get_string_value(&config, &["REDIS_URL", "storage.redis_url"]),
            registry: load_registry_config(&config)?,
            prometheus_enabled: get_bool_value(
                &config,
                &["PROMETHEUS_ENABLED", "metrics.enabled"],
                defaults.prometheus_enabled,
            ),
            log_level: get_string_value(&config, &["LOG_LEVEL", "log.level"])
                .unwrap_or_else(|| defaults.log_level.to_string()),
            log_format: get_string_value(&config, &["LOG_FORMAT", "log.format"])
                .unwrap_or_else(|| defaults.log_format.to_string()),
            dev_mode: get_bool_value(&config, &["DEV_MODE", "node.dev_mode"], defaults.dev_mode),
            config_path: resolved_path,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            anyhow::bail!("NODE_ID must not be empty");
        }
        if self.data_dir.trim().is_empty() {
            anyhow::bail!("DATA_DIR must not be empty");
        }
        if self.rpc_port == 0 {
            anyhow::bail!("RPC_PORT must be greater than zero");
        }
        if self.store == StoreBackend::Redis && self.redis_url.is_none() {
            anyhow::bail!(
                "Store backend 'redis' requires a URL; set storage.redis_url or PORTFOLIOFY_REDIS_URL"
            );
        }
        if self.log_format != "pretty" && self.log_format != "json" {
            anyhow::bail!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.log_format
            );
        }
        self.registry
            .validate()
            .context("invalid [registry] section")?;
        Ok(())
    }

    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }

    pub fn sled_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("handles.sled")
    }
}

fn load_registry_config(config: &Config) -> Result<RegistryConfig> {
    let mut registry = RegistryConfig::default();

    if let Ok(reserved) = config.get::<Vec<String>>("registry.reserved_handles") {
        registry.reserved_handles = reserved;
    } else if let Some(value) = get_string_value(config, &["RESERVED_HANDLES"]) {
        registry.reserved_handles = value
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
    }

    if let Some(value) = get_string_value(
        config,
        &["MAX_HANDLE_LENGTH", "registry.max_handle_length"],
    ) {
        registry.max_handle_length = value
            .parse::<usize>()
            .with_context(|| format!("max_handle_length '{value}' is not a number"))?;
    }

    if let Some(prefix) = get_string_value(config, &["KEY_PREFIX", "registry.key_prefix"]) {
        registry.key_prefix = prefix;
    }

    Ok(registry)
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}

/// Layers CLI flags over the loaded configuration.
pub fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = data_dir.clone();
    }

    if let Some(store) = matches.get_one::<StoreBackend>("store") {
        config.store = *store;
    }

    if let Some(redis_url) = matches.get_one::<String>("redis-url") {
        config.redis_url = Some(redis_url.clone());
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(rpc_host) = matches.get_one::<String>("rpc-host") {
        config.rpc_host = rpc_host.clone();
    }

    if let Some(rpc_port) = matches.get_one::<u16>("rpc-port") {
        config.rpc_port = *rpc_port;
    }

    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }

    if matches.get_flag("dev") {
        config.dev_mode = true;
        config.log_level = "debug".to_string();
        config.log_format = "pretty".to_string();
    }
}

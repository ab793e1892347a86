use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use portfoliofy_handle_registry::IdentityRegistry;
use portfoliofy_rpc::{start_server, AppState};
use portfoliofy_storage::{KeyValueStore, MemoryStore, RedisStore, SledStore};
use std::fs;
use std::net::TcpListener;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod version;

use config::{apply_overrides, AppConfig, Profile, StoreBackend};
use version::{git_commit_hash, PORTFOLIOFY_VERSION};

const SELF_CHECK_KEY: &str = "health:self-check";

fn build_cli() -> Command {
    Command::new("portfoliofy-node")
        .version(PORTFOLIOFY_VERSION)
        .about("Portfoliofy handle registry service")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("profile")
                .long("profile")
                .value_name("PROFILE")
                .value_parser(value_parser!(Profile))
                .default_value("development")
                .help("Select configuration profile (development, production). Can also be set via PORTFOLIOFY_PROFILE"),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Validate configuration and probe the store, then exit"),
        )
        .arg(
            Arg::new("dev")
                .long("dev")
                .action(ArgAction::SetTrue)
                .help("Run in development mode"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("rpc-host")
                .long("rpc-host")
                .value_name("HOST")
                .help("Override HTTP bind host"),
        )
        .arg(
            Arg::new("rpc-port")
                .long("rpc-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port"),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("BACKEND")
                .value_parser(value_parser!(StoreBackend))
                .help("Key-value backend (memory, sled, redis)"),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for the sled backend"),
        )
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .value_name("URL")
                .help("Redis connection URL"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics endpoint"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config_with_overrides(&matches)?;

    if matches.get_flag("version_flag") {
        print_version_info(&config);
        return Ok(());
    }

    init_logging(&config)?;

    if matches.get_flag("check") {
        return run_self_check(&config).await;
    }

    info!(
        "Starting Portfoliofy {} (commit {}) with profile {}",
        PORTFOLIOFY_VERSION,
        git_commit_hash(),
        config.profile
    );
    if let Some(path) = &config.config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let metrics_handle = init_metrics(&config);
    let store = open_store(&config).await?;
    info!("Using {} store", store.backend());

    let registry = IdentityRegistry::new(store, config.registry.clone())
        .context("failed to build identity registry")?;
    let state =
        AppState::new(Arc::new(registry), config.node_id.clone()).with_metrics(metrics_handle);

    start_server(state, &config.rpc_addr()).await?;
    info!("Portfoliofy node stopped");
    Ok(())
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let profile = match std::env::var("PORTFOLIOFY_PROFILE") {
        Ok(value) => match value.to_lowercase().as_str() {
            "development" => Profile::Development,
            "production" => Profile::Production,
            _ => *matches
                .get_one::<Profile>("profile")
                .unwrap_or(&Profile::Development),
        },
        Err(_) => *matches
            .get_one::<Profile>("profile")
            .unwrap_or(&Profile::Development),
    };
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());

    let mut config = AppConfig::load(profile, config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.store {
        StoreBackend::Memory => {
            if !config.dev_mode {
                warn!("In-memory store selected; handles will not survive a restart");
            }
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sled => {
            fs::create_dir_all(&config.data_dir).with_context(|| {
                format!("failed to create data directory {}", config.data_dir)
            })?;
            let path = config.sled_path();
            let store = SledStore::new(&path)
                .with_context(|| format!("failed to open sled store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("redis backend selected without a redis URL")?;
            let store = RedisStore::connect(url)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(store))
        }
    }
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            describe_counter!(
                "handle_registry_operations_total",
                "Registry operations by op and outcome"
            );
            describe_counter!("http_requests_total", "HTTP requests served by route");
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to install tracing subscriber")?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to install tracing subscriber")?;
    }

    Ok(())
}

fn print_version_info(config: &AppConfig) {
    println!(
        "Portfoliofy {} (commit {}) [{} / {}]",
        PORTFOLIOFY_VERSION,
        git_commit_hash(),
        config.profile,
        config.store
    );
}

async fn run_self_check(config: &AppConfig) -> Result<()> {
    println!("Running Portfoliofy self-check...");
    let mut issues = Vec::new();

    if let Err(err) = ensure_port_available(&config.rpc_host, config.rpc_port) {
        issues.push(err);
    }

    match open_store(config).await {
        Ok(store) => {
            if let Err(err) = store.exists(SELF_CHECK_KEY).await {
                issues.push(format!("{} store did not answer: {}", store.backend(), err));
            }
        }
        Err(err) => issues.push(format!("{err:#}")),
    }

    if issues.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        anyhow::bail!("self-check failed")
    }
}

fn ensure_port_available(host: &str, port: u16) -> Result<(), String> {
    let addr = format!("{host}:{port}");
    match TcpListener::bind(&addr) {
        Ok(listener) => drop(listener),
        Err(err) => return Err(format!("HTTP port {addr} is not available for binding: {err}")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_for(args: &[&str]) -> clap::ArgMatches {
        let mut argv = vec!["portfoliofy-node"];
        argv.extend_from_slice(args);
        build_cli().try_get_matches_from(argv).expect("valid args")
    }

    fn dev_config() -> AppConfig {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("config")
            .join("development.toml");
        AppConfig::load(Profile::Development, path.to_str()).unwrap()
    }

    #[test]
    fn cli_flags_override_config() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().to_str().unwrap();
        let matches = matches_for(&[
            "--store",
            "sled",
            "--data-dir",
            data_dir,
            "--rpc-port",
            "9191",
            "--disable-metrics",
            "--log-format",
            "json",
        ]);
        let mut config = dev_config();
        apply_overrides(&matches, &mut config);

        assert_eq!(config.store, StoreBackend::Sled);
        assert_eq!(config.data_dir, data_dir);
        assert_eq!(config.rpc_port, 9191);
        assert!(!config.prometheus_enabled);
        assert_eq!(config.log_format, "json");
    }

    #[test]
    fn dev_flag_forces_pretty_debug_logs() {
        let matches = matches_for(&["--dev", "--log-format", "json"]);
        let mut config = dev_config();
        apply_overrides(&matches, &mut config);
        assert!(config.dev_mode);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, "pretty");
    }

    #[test]
    fn rejects_unknown_store_flag() {
        let result = build_cli().try_get_matches_from(["portfoliofy-node", "--store", "mongo"]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn opens_sled_store_under_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = dev_config();
        config.store = StoreBackend::Sled;
        config.data_dir = tmp.path().join("nested").to_str().unwrap().to_string();

        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend(), "sled");
        assert!(!store.exists(SELF_CHECK_KEY).await.unwrap());
        assert!(config.sled_path().exists());
    }
}

pub mod adapters;
pub mod app;
pub mod domain;
pub mod ports;

pub use adapters::config::TemplateSource;
pub use app::config::{ConfigManager, SetConfigOutcome, WatchOptions};
pub use app::gateway::ToolGateway;
pub use app::server::{BindFailure, LifecycleError, LifecycleOptions, ServerLifecycleManager};
pub use domain::config::{ConfigPatch, ConfigurationRecord};
pub use domain::server::ServerState;

use adapters::config::{EncryptedConfigStore, NativeFileWatcher, PollingFileWatcher};
use adapters::http::SessionHub;
use adapters::wiki::{ConfluenceClientFactory, HtmdMarkdownConverter};
use anyhow::Context;
use app::config::ConfigWatchSupervisor;
use app::mcp::McpBridgeService;
use ports::config::FileWatcher;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::ctrl_c;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CONFIG_DIR_NAME: &str = "wikibridge";
const CONFIG_FILE_NAME: &str = "config.enc";

/// How the daemon notices edits made to the config file by other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Native,
    Poll,
    Off,
}

impl FromStr for WatchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(WatchMode::Native),
            "poll" => Ok(WatchMode::Poll),
            "off" | "none" => Ok(WatchMode::Off),
            other => Err(format!(
                "unknown watch mode '{other}' (expected native|poll|off)"
            )),
        }
    }
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WatchMode::Native => "native",
            WatchMode::Poll => "poll",
            WatchMode::Off => "off",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    pub template: TemplateSource,
    pub bind_host: IpAddr,
    pub watch: WatchMode,
    pub poll_interval: Duration,
    pub watch_debounce: Duration,
    pub watch_retry_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let watch = WatchOptions::default();
        Self {
            config_path: default_config_path(),
            template: TemplateSource::Embedded,
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            watch: WatchMode::Native,
            poll_interval: Duration::from_secs(2),
            watch_debounce: watch.debounce,
            watch_retry_delay: watch.retry_delay,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl Settings {
    fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            debounce: self.watch_debounce,
            retry_delay: self.watch_retry_delay,
        }
    }

    fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            bind_host: self.bind_host,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// `<user config dir>/wikibridge/config.enc`, or relative to the working
/// directory when the platform has no config dir.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Loads the configuration without starting the server.
pub async fn open_config(settings: &Settings) -> Arc<ConfigManager> {
    let store = EncryptedConfigStore::new(&settings.config_path, settings.template.clone());
    let manager = Arc::new(ConfigManager::new(Arc::new(store)));
    manager.initialize().await;
    manager
}

/// Running daemon: configuration, gateway, server and their background tasks.
pub struct Bridge {
    config: Arc<ConfigManager>,
    gateway: Arc<ToolGateway>,
    lifecycle: Arc<ServerLifecycleManager>,
    listeners: Vec<JoinHandle<()>>,
    watch: Option<ConfigWatchSupervisor>,
}

impl Bridge {
    pub async fn start(settings: &Settings) -> anyhow::Result<Self> {
        let config = open_config(settings).await;

        let gateway = Arc::new(ToolGateway::new(
            Arc::new(ConfluenceClientFactory::default()),
            Arc::new(HtmdMarkdownConverter::new()),
        ));
        gateway.apply_config(&config.get_config().await).await;
        let bridge = Arc::new(McpBridgeService::new(gateway.clone()));
        let hub = Arc::new(SessionHub::new(bridge));
        let lifecycle = Arc::new(ServerLifecycleManager::new(
            config.clone(),
            hub,
            settings.lifecycle_options(),
        ));

        let listeners = vec![
            gateway
                .clone()
                .spawn_config_listener(config.clone(), config.subscribe()),
            lifecycle.clone().spawn_config_listener(config.subscribe()),
        ];

        let watcher: Option<Arc<dyn FileWatcher>> = match settings.watch {
            WatchMode::Native => Some(Arc::new(NativeFileWatcher::new())),
            WatchMode::Poll => Some(Arc::new(PollingFileWatcher::new(Some(
                settings.poll_interval,
            )))),
            WatchMode::Off => None,
        };
        let watch = watcher.map(|watcher| {
            ConfigWatchSupervisor::spawn(config.clone(), watcher, settings.watch_options())
        });

        let runtime = Self {
            config,
            gateway,
            lifecycle,
            listeners,
            watch,
        };
        let started = runtime.lifecycle.start().await;
        if let Err(err) = started {
            runtime.shutdown().await;
            return Err(err).context("starting wiki MCP server");
        }
        info!(
            "config" = %settings.config_path.display(),
            "watch" = %settings.watch,
            "msg" = "wikibridge-agentd started"
        );
        Ok(runtime)
    }

    pub fn config(&self) -> Arc<ConfigManager> {
        self.config.clone()
    }

    pub fn gateway(&self) -> Arc<ToolGateway> {
        self.gateway.clone()
    }

    pub fn lifecycle(&self) -> Arc<ServerLifecycleManager> {
        self.lifecycle.clone()
    }

    pub async fn shutdown(self) {
        if let Some(watch) = self.watch {
            watch.shutdown().await;
        }
        for listener in &self.listeners {
            listener.abort();
        }
        self.lifecycle.stop().await;
        for listener in self.listeners {
            if let Err(err) = listener.await {
                if !err.is_cancelled() {
                    warn!(%err, "config listener task join error");
                }
            }
        }
    }
}

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let bridge = Bridge::start(&settings).await?;
    shutdown_signal().await;
    bridge.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = ctrl_c().await;
    info!("msg" = "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_mode_parses_known_values() {
        assert_eq!("native".parse::<WatchMode>().unwrap(), WatchMode::Native);
        assert_eq!("POLL".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert_eq!("off".parse::<WatchMode>().unwrap(), WatchMode::Off);
        assert!("inotify".parse::<WatchMode>().is_err());
        assert_eq!(WatchMode::Poll.to_string(), "poll");
    }

    #[test]
    fn default_config_path_ends_in_wikibridge_dir() {
        let path = default_config_path();
        assert!(path.ends_with("wikibridge/config.enc"));
    }

    #[test]
    fn default_settings_bind_loopback() {
        let settings = Settings::default();
        assert_eq!(settings.bind_host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(settings.template, TemplateSource::Embedded);
        assert_eq!(settings.watch_options(), WatchOptions::default());
    }
}

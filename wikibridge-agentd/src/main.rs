use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wikibridge_agentd::{
    default_config_path, open_config, run, ConfigPatch, Settings, TemplateSource, WatchMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Confluence wiki MCP bridge daemon", long_about = None)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Encrypted config file (defaults to <config dir>/wikibridge/config.enc)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Template copied when the config file does not exist (defaults to the built-in one)"
    )]
    template: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the MCP server on the configured port
    Serve(ServeArgs),
    /// Inspect or change the stored connection settings
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(
        long,
        default_value = "127.0.0.1",
        help = "Interface the MCP server binds to"
    )]
    bind: IpAddr,

    #[arg(
        long,
        default_value = "native",
        value_parser = parse_watch_mode,
        help = "How to follow edits to the config file (native|poll|off)"
    )]
    watch: WatchMode,

    #[arg(
        long,
        default_value_t = 2000,
        help = "Polling interval in milliseconds when --watch poll is used"
    )]
    poll_interval_ms: u64,

    #[arg(
        long,
        default_value_t = 5000,
        help = "Time in milliseconds allowed for draining connections on stop"
    )]
    shutdown_timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the stored settings with the password redacted
    Show,
    /// Update one or more stored settings
    Set(SetArgs),
}

#[derive(Args, Debug)]
struct SetArgs {
    #[arg(long, help = "Base URL of the Confluence instance")]
    host: Option<String>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(
        long,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Port the MCP server listens on"
    )]
    port: Option<u16>,
}

impl SetArgs {
    fn into_patch(self) -> ConfigPatch {
        ConfigPatch {
            host: self.host,
            username: self.username,
            password: self.password,
            port: self.port,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut settings = Settings {
        config_path: cli.config.unwrap_or_else(default_config_path),
        template: cli
            .template
            .map(TemplateSource::File)
            .unwrap_or(TemplateSource::Embedded),
        ..Settings::default()
    };

    match cli.command {
        Command::Serve(args) => {
            settings.bind_host = args.bind;
            settings.watch = args.watch;
            settings.poll_interval = Duration::from_millis(args.poll_interval_ms);
            settings.shutdown_timeout = Duration::from_millis(args.shutdown_timeout_ms);
            run(settings).await
        }
        Command::Config(ConfigCommand::Show) => {
            let config = open_config(&settings).await;
            let record = config.get_config().await;
            let password = if record.password.is_empty() {
                ""
            } else {
                "********"
            };
            let view = json!({
                "path": config.path().display().to_string(),
                "host": record.host,
                "username": record.username,
                "password": password,
                "port": record.port,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Command::Config(ConfigCommand::Set(args)) => {
            let patch = args.into_patch();
            if patch.is_empty() {
                bail!(
                    "nothing to update, pass at least one of --host, --username, --password, --port"
                );
            }
            let config = open_config(&settings).await;
            let outcome = config.set_config(patch).await?;
            if !outcome.persisted {
                bail!("failed to write {}", config.path().display());
            }
            println!(
                "Configuration saved to {} (host: {}, port: {})",
                config.path().display(),
                outcome.record.host,
                outcome.record.port
            );
            Ok(())
        }
    }
}

fn parse_watch_mode(value: &str) -> Result<WatchMode, String> {
    value.parse()
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_audio_bridge::config::{AppConfig, ConfigStore};
use usb_audio_bridge::events::EventBus;
use usb_audio_bridge::otg::{GadgetManager, GadgetTiming};
use usb_audio_bridge::shell::PrivilegedExecutor;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// USB Audio Bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "usb-audio-bridge")]
#[command(version, about = "UAC2 USB gadget manager for rooted devices", long_about = None)]
struct CliArgs {
    /// Data directory path (default: /data/local/tmp/usb-audio-bridge)
    #[arg(short = 'd', long, value_name = "DIR", env = "USB_AUDIO_BRIDGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print bus events as JSON lines
    #[arg(long)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure and bind the UAC2 gadget
    Enable {
        /// Sample rate in Hz (default: stored setting)
        #[arg(short, long)]
        rate: Option<u32>,
        /// Keep ADB as a composite function if it is active
        #[arg(long)]
        keep_adb: bool,
    },
    /// Tear the gadget down and restore the device's USB configuration
    Disable,
    /// Show the current gadget binding
    Status,
    /// Locate the gadget's sound card and open its PCM nodes
    Card,
    /// Apply the SELinux rules needed by the audio engine
    Policy,
    /// Print the stored configuration as JSON
    Config,
    /// Change a bridge setting
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::debug!("Starting USB Audio Bridge v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    tracing::debug!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = Arc::new(ConfigStore::new(&data_dir.join("config.db")).await?);
    let config = config_store.get();

    let events = Arc::new(EventBus::new());
    let printer = args.events.then(|| {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!("Failed to encode event: {}", e),
                    },
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Event printer skipped {} events", n)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let exec = PrivilegedExecutor::su(&config.gadget.shell_program);
    let gadget = GadgetManager::with_options(
        config.gadget.clone(),
        exec,
        config_store.clone(),
        Some(events.clone()),
        GadgetTiming::default(),
    );
    drop(events);

    // The printer ends once the last bus sender (held by the gadget) is gone
    let result = run_command(args.command, gadget, config, config_store).await;
    if let Some(printer) = printer {
        if let Err(e) = printer.await {
            tracing::warn!("Event printer failed: {}", e);
        }
    }
    result
}

async fn run_command(
    command: Command,
    gadget: GadgetManager,
    config: Arc<AppConfig>,
    config_store: Arc<ConfigStore>,
) -> anyhow::Result<()> {
    match command {
        Command::Enable { rate, keep_adb } => {
            if !gadget.is_root_granted().await {
                anyhow::bail!("Root access was not granted");
            }
            let rate = rate.unwrap_or(config.bridge.sample_rate);
            let keep_adb = keep_adb || config.bridge.keep_adb;
            let report = gadget.enable_gadget(rate, keep_adb).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let status = gadget.poll_gadget_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Disable => {
            gadget.disable_gadget().await;
            let status = gadget.poll_gadget_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Status => {
            let status = gadget.gadget_status().await;
            println!("UDC:       {}", status.udc_controller);
            println!("Functions: {}", status.functions_display());
            println!("Ours:      {}", gadget.is_gadget_active().await);
        }
        Command::Card => {
            let card = gadget.find_and_prepare_card().await?;
            println!("{}", card);
        }
        Command::Policy => {
            let backend = gadget.apply_selinux_policy().await?;
            println!("{}", backend);
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&*config)?);
        }
        Command::Set { key, value } => {
            let mut bridge = config.bridge.clone();
            bridge
                .set_by_key(&key, &value)
                .map_err(|e| anyhow::anyhow!(e))?;
            config_store.update(|c| c.bridge = bridge).await?;
            tracing::info!("{} = {}", key, value);
        }
    }

    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usb_audio_bridge=error",
        LogLevel::Warn => "usb_audio_bridge=warn",
        LogLevel::Info => "usb_audio_bridge=info",
        LogLevel::Verbose => "usb_audio_bridge=debug,sqlx=warn",
        LogLevel::Debug => "usb_audio_bridge=debug,sqlx=info",
        LogLevel::Trace => "usb_audio_bridge=trace,sqlx=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data/local/tmp/usb-audio-bridge")
}

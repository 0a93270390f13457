use clap::Parser;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Instant, interval_at};
use zigbee_attribute_sync::config::{Config, load_dotenv};
use zigbee_attribute_sync::error::Result;
use zigbee_attribute_sync::gateway::{DeviceGateway, Zigbee2MqttGateway};
use zigbee_attribute_sync::sink::{ChannelSink, LogSink, MqttSink};
use zigbee_attribute_sync::sync::{
    ConfigOption, NotificationDispatcher, ReportingConfig, SyncEngine, Supervisor, spawn_poller,
};

/// How often failed bindings are retried and staleness is checked.
const SUPERVISION_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    name = "zigbee-attribute-sync",
    about = "Keep ZigBee device attributes in sync via zigbee2mqtt"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Print the editable reporting options of every attribute and exit
    #[arg(long)]
    list_options: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

// The runtime is built by hand so the .env loader can set variables before
// any worker thread exists.
fn main() {
    load_dotenv();
    init_logger();
    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn print_options(config: &Config) -> Result<()> {
    let mut options: BTreeMap<&str, Vec<ConfigOption>> = BTreeMap::new();
    for attribute in &config.attributes {
        let spec = attribute.to_spec(config.command_timeout());
        let mut reporting = ReportingConfig::new(&spec.defaults);
        reporting.apply_update(&attribute.reporting);
        options.insert(attribute.channel.as_str(), reporting.editable_options());
    }
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    info!("Starting ZigBee attribute sync");
    let config = Config::load(args.config.as_deref())?;

    if args.list_options {
        return print_options(&config);
    }
    if config.attributes.is_empty() {
        warn!("No attributes configured, nothing to do");
        return Ok(());
    }

    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Base topic: {}", config.zigbee2mqtt.base_topic);
    info!("  Attributes: {}", config.attributes.len());

    let (gateway, events, router) =
        Zigbee2MqttGateway::connect(&config.mqtt, &config.zigbee2mqtt).await?;

    let dispatcher = Arc::new(NotificationDispatcher::new());
    let dispatch_task = tokio::spawn(dispatcher.clone().run(events));

    let sink: Arc<dyn ChannelSink> = match &config.sync.publish_topic {
        Some(topic) => Arc::new(MqttSink::new(gateway.client(), topic.clone())),
        None => Arc::new(LogSink),
    };
    let device_gateway: Arc<dyn DeviceGateway> = gateway.clone();

    let mut engines = Vec::new();
    let mut pollers = Vec::new();
    for attribute in &config.attributes {
        let spec = attribute.to_spec(config.command_timeout());
        let engine = match SyncEngine::initialize(
            device_gateway.clone(),
            dispatcher.clone(),
            spec,
            sink.clone(),
        )
        .await
        {
            Ok(engine) => engine,
            Err(e) => {
                error!("Channel '{}' unavailable: {}", attribute.channel, e);
                continue;
            }
        };

        // Stored only; pushed to the device by activate()
        engine.reconcile(&attribute.reporting).await?;
        let state = engine.activate().await?;
        info!("Channel '{}' is {}", attribute.channel, state);

        engine.refresh().await;
        pollers.push(spawn_poller(engine.clone()));
        engines.push(engine);
    }

    info!("ZigBee attribute sync is running");
    info!("  - {} channel(s) active", engines.len());
    info!("  - Send SIGHUP to reload reporting configuration");
    info!("  - Press Ctrl+C to exit");

    let mut hangup = signal(SignalKind::hangup())?;
    let mut supervision = interval_at(Instant::now() + SUPERVISION_INTERVAL, SUPERVISION_INTERVAL);
    let mut supervisor = Supervisor::new();
    loop {
        tokio::select! {
            _ = supervision.tick() => {
                supervisor.check(&engines).await;
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
            _ = hangup.recv() => {
                info!("Reloading reporting configuration");
                match Config::load(args.config.as_deref()) {
                    Ok(reloaded) => {
                        for engine in &engines {
                            let Some(attribute) = reloaded
                                .attributes
                                .iter()
                                .find(|a| a.channel == engine.channel())
                            else {
                                continue;
                            };
                            match engine.reconcile(&attribute.reporting).await {
                                Ok(state) => info!("Channel '{}' is {}", engine.channel(), state),
                                Err(e) => warn!("Channel '{}' not reconciled: {}", engine.channel(), e),
                            }
                        }
                    }
                    Err(e) => error!("Failed to reload configuration: {}", e),
                }
            }
        }
    }

    for engine in &engines {
        engine.dispose().await;
    }
    for poller in pollers {
        let _ = poller.await;
    }
    router.abort();
    dispatch_task.abort();

    info!("ZigBee attribute sync stopped");
    Ok(())
}

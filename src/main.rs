use clap::Parser;
use smart_relay::config::{Config, YamlStore};
use smart_relay::consts;
use smart_relay::control::ControlLoop;
use smart_relay::hal::{Clock, MonotonicClock, SimBoard};
use smart_relay::session::MqttTransport;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "relay.yaml")]
    config_path: String,

    /// Control loop period.
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,
}

fn init_log() {
    let timer = fmt::time::ChronoLocal::new("%H:%M:%S%.3f".to_string());

    // Configure a custom event formatter
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_source_location(true)
        .with_timer(timer)
        .compact();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::DEBUG.into())
        .from_env()
        .expect("RUST_LOG configuration is valid")
        .add_directive("rumqttc=info".parse().unwrap());

    fmt().event_format(format).with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_log();
    let args = Args::parse();

    let config = Config::from_file(&args.config_path)?;
    config.validate()?;
    info!(
        "Starting {} {}. Args: {:?} Config: {:?}",
        consts::RELAY_NAME,
        consts::RELAY_VERSION,
        args,
        config
    );

    let clock = MonotonicClock::new();
    let mut control = ControlLoop::new(
        config,
        SimBoard::start(),
        MqttTransport::new(),
        YamlStore::new(&args.config_path),
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Control loop running, type p/r + enter to press/release the button.");
    loop {
        tokio::select! {
            _ = ticker.tick() => control.tick(clock.now_ms()).await,
            _ = &mut shutdown => break,
        }
    }

    info!("Shutting down. Last status: {}", control.status_json());
    control.shutdown().await;
    Ok(())
}

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use thermomote::{
    config::{GatewayConfig, OverflowPolicy, Port},
    gateway::run_gateway,
    indicator::{ConsoleIndicators, Zone},
    logging,
};
use url::Url;

/// Temperature gateway
///
/// Collects node readings and blinks the indicator for the average's zone.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the radio port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    /// Averages below this are cold
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    low: i32,

    /// Averages above this are hot
    #[arg(long, default_value_t = 25, allow_negative_numbers = true)]
    high: i32,

    #[arg(long, default_value_t = 500)]
    blink_interval_ms: u64,

    /// Number of nodes tracked (1 or 2)
    #[arg(long, default_value_t = 2)]
    capacity: usize,

    /// What to do with readings from an extra node (drop, fail)
    #[arg(long, default_value = "drop")]
    overflow: OverflowPolicy,

    /// Bytes of port header in front of the payload
    #[arg(long, default_value_t = 0)]
    payload_offset: usize,

    /// Offset of the temperature within the payload
    #[arg(long, default_value_t = 0)]
    temperature_offset: usize,

    #[arg(long, default_value = "cold")]
    initial_zone: Zone,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.verbose);

    let config = GatewayConfig {
        low_threshold: args.low,
        high_threshold: args.high,
        blink_interval: Duration::from_millis(args.blink_interval_ms),
        capacity: args.capacity,
        overflow: args.overflow,
        payload_offset: args.payload_offset,
        temperature_offset: args.temperature_offset,
        initial_zone: args.initial_zone,
        ..Default::default()
    };

    let port = Port::open(&args.port).await?.framed();
    let mut leds = ConsoleIndicators::zones();

    let gateway = run_gateway(config, port, &mut leds).await?;

    for record in gateway.registry().records() {
        tracing::info!("{:#06x}: {}", record.short_addr, record.temperature);
    }

    Ok(())
}

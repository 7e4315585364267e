use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use thermomote::{
    config::{NodeConfig, Port, ScheduleMode},
    indicator::ConsoleIndicators,
    logging,
    node::run_node,
    protocol::addresses::{parse_eui64, short_addr_from_eui64},
    sensor::{Feed, FeedSensor},
};
use url::Url;

/// Temperature node
///
/// Samples a simulated sensor feed and transmits readings to the gateway.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the radio port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    /// Node short address, e.g. 0x5678 (random if neither this nor --eui64 is given)
    #[arg(long, value_parser = parse_u16, conflicts_with = "eui64")]
    short_addr: Option<u16>,

    /// EUI-64 of the node, 16 hex digits; the short address is taken from it
    #[arg(long)]
    eui64: Option<String>,

    /// Sensor feed to replay (one, two, detached)
    #[arg(long, default_value = "one")]
    feed: Feed,

    #[arg(long, default_value = "decoupled")]
    mode: ScheduleMode,

    #[arg(long, default_value_t = 1000)]
    query_interval_ms: u64,

    #[arg(long, default_value_t = 700)]
    transmit_interval_ms: u64,

    /// Sensor read latency
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Make every n-th sensor read fail
    #[arg(long)]
    fail_every: Option<u32>,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_u16(s: &str) -> Result<u16> {
    let value = match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(value)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.verbose);

    let short_addr = match (args.short_addr, &args.eui64) {
        (Some(addr), _) => addr,
        (None, Some(eui64)) => match parse_eui64(eui64) {
            Some(eui64) => short_addr_from_eui64(&eui64),
            None => bail!("invalid EUI-64: {eui64}"),
        },
        (None, None) => rand::random(),
    };

    let config = NodeConfig {
        query_interval: Duration::from_millis(args.query_interval_ms),
        transmit_interval: Duration::from_millis(args.transmit_interval_ms),
        mode: args.mode,
        short_addr,
        ..Default::default()
    };

    let sensor = FeedSensor::open(args.feed).map(|sensor| {
        let sensor = sensor.with_latency(Duration::from_millis(args.latency_ms), Duration::ZERO);
        match args.fail_every {
            Some(n) => sensor.with_failures(n),
            None => sensor,
        }
    });

    let port = Port::open(&args.port).await?.framed();
    let mut leds = ConsoleIndicators::node();

    run_node(config, sensor, port, &mut leds).await?;

    Ok(())
}

use std::{future::pending, time::Duration};

use anyhow::Result;
use clap::Parser;
use thermomote::{
    config::{GatewayConfig, NodeConfig, ScheduleMode},
    gateway::run_gateway,
    indicator::ConsoleIndicators,
    logging,
    medium::RadioMedium,
    node::run_node,
    protocol::addresses::short_addr_from_eui64,
    sensor::{Feed, FeedSensor},
};
use tokio::{select, time::sleep};
use tracing::Instrument;

/// In-process simulation of a two node network and its gateway.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stop after this many seconds (runs until interrupted otherwise)
    #[arg(long)]
    duration_secs: Option<u64>,

    #[arg(long, default_value = "decoupled")]
    mode: ScheduleMode,

    /// Sensor read latency; above the transmit interval nodes send stale values
    #[arg(long, default_value_t = 20)]
    latency_ms: u64,

    /// Random extra read latency, up to this much
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,

    /// Make every n-th sensor read fail
    #[arg(long)]
    fail_every: Option<u32>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.verbose);

    let medium = RadioMedium::new();

    let (_, gateway_port) = medium.connect();
    let gateway = async move {
        let mut leds = ConsoleIndicators::zones();
        run_gateway(GatewayConfig::default(), gateway_port, &mut leds).await.map(drop)
    }
    .instrument(tracing::info_span!("gateway"));

    let [addr_one, addr_two] = distinct_short_addrs();

    let node = |feed: Feed, short_addr: u16| {
        let (_, port) = medium.connect();

        let config = NodeConfig { mode: args.mode, short_addr, ..Default::default() };

        let latency = Duration::from_millis(args.latency_ms);
        let jitter = Duration::from_millis(args.jitter_ms);
        let fail_every = args.fail_every.unwrap_or(0);
        let sensor = FeedSensor::open(feed).map(|s| s.with_latency(latency, jitter).with_failures(fail_every));

        async move {
            let mut leds = ConsoleIndicators::node();
            run_node(config, sensor, port, &mut leds).await.map(drop)
        }
        .instrument(tracing::info_span!("node", addr = %format!("{short_addr:#06x}")))
    };

    let node_one = node(Feed::One, addr_one);
    let node_two = node(Feed::Two, addr_two);

    select! {
        res = async { tokio::try_join!(gateway, node_one, node_two) } => {
            res?;
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = stop_after(args.duration_secs) => tracing::info!("simulation finished"),
    }

    Ok(())
}

/// Short addresses from two random EUI-64s, as real motes would derive them.
fn distinct_short_addrs() -> [u16; 2] {
    let first = short_addr_from_eui64(&rand::random());

    loop {
        let second = short_addr_from_eui64(&rand::random());
        if second != first {
            return [first, second];
        }
    }
}

async fn stop_after(secs: Option<u64>) {
    match secs {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => pending().await,
    }
}

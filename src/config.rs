use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, Stream};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::Framed;
use url::Url;
use anyhow::{Result, Context, bail};

use crate::{
    indicator::{Zone, HIGH_THRESHOLD, LOW_THRESHOLD},
    protocol::{
        addresses::{NETWORK_PAN, NODE_SRC_PAN},
        codec::{RadioCodec, MAX_FRAME_LEN},
        frame::{HEADER_LEN, TEMPERATURE_LEN},
    },
    registry::MAX_SOURCES,
};


pub enum Port {
    Serial(SerialStream),
    TcpRaw(TcpStream)
}


/// A radio port: a `Stream` of received MAC frames and a `Sink` for frames to transmit.
pub trait PortStream: Stream<Item = std::io::Result<Bytes>> + Sink<Bytes, Error = std::io::Error> + Send + Unpin {}

impl<T> PortStream for T
where
    T: Stream<Item = std::io::Result<Bytes>> + Sink<Bytes, Error = std::io::Error> + Send + Unpin,
{}


impl Port {
    pub async fn open(url: &Url) -> Result<Self> {
        match url.scheme() {
            "serial" => {
                let path = url.path();

                let port = tokio_serial::new(path, 115_200)
                    .stop_bits(tokio_serial::StopBits::One)
                    .parity(tokio_serial::Parity::None)
                    .open_native_async()
                    .with_context(|| format!("failed to open serial port {path}"))
                    ?;

                Ok(Self::Serial(port))
            },
            "tcp+raw" => {
                let host = url.host_str()
                    .with_context(|| format!("tcp+raw requires a host to be specified in the url: {url}"))?;

                let port = url.port()
                    .with_context(|| format!("tcp+raw requires a port number to be specified in the url: {url}"))?;

                let stream = TcpStream::connect((host, port)).await
                    .with_context(|| format!("failed to open tcp+raw connection to: {url}"))?;

                stream.set_nodelay(true)?;

                Ok(Self::TcpRaw(stream))
            },
            other => {
                bail!("url scheme {other} not supported");
            }
        }
    }

    pub fn framed(self) -> Box<dyn PortStream> {
        match self {
            Port::Serial(port) => framed(port),
            Port::TcpRaw(stream) => framed(stream),
        }
    }
}

/// Wrap any byte stream in the radio air framing.
pub fn framed<T>(io: T) -> Box<dyn PortStream>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    Box::new(Framed::new(io, RadioCodec::new()))
}


pub const QUERY_INTERVAL: Duration = Duration::from_secs(1);
pub const TRANSMIT_INTERVAL: Duration = Duration::from_millis(700);
pub const BLINK_INTERVAL: Duration = Duration::from_millis(500);

/// "Forever" receive window: `0x7fffffff` ticks of the mote's 32 kHz clock.
pub const RECEIVE_WINDOW: Duration = Duration::from_secs(0x7fff_ffff / 32_768);

/// Offset of the temperature inside the payload, agreed by nodes and gateway.
pub const PAYLOAD_TEMPERATURE_OFFSET: usize = 0;

/// Payload length sent by nodes: the temperature, zero padded to 4 bytes.
pub const PAYLOAD_LEN: usize = 4;


#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must not be zero")]
    ZeroInterval { name: &'static str },

    #[error("transmit interval ({transmit:?}) must not exceed query interval ({query:?})")]
    TransmitAfterQuery { transmit: Duration, query: Duration },

    #[error("registry capacity must be between 1 and 2 (got {0})")]
    Capacity(usize),

    #[error("low threshold {low} is above high threshold {high}")]
    Thresholds { low: i32, high: i32 },

    #[error("{name} reaches byte {offset}, past the {max} byte payload a frame can carry")]
    PayloadLayout { name: &'static str, offset: usize, max: usize },
}

/// Largest payload a frame can carry behind its header.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

fn check_layout(name: &'static str, offset: usize) -> std::result::Result<(), ConfigError> {
    if offset > MAX_PAYLOAD_LEN {
        return Err(ConfigError::PayloadLayout { name, offset, max: MAX_PAYLOAD_LEN });
    }
    Ok(())
}


/// How the node ties transmissions to sensor reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ScheduleMode {
    /// The query timer arms a transmit timer; sends never wait for the read.
    #[default]
    Decoupled,

    /// Transmit as soon as each read completes, then wait a full query interval.
    ReadTriggered,
}


#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub query_interval: Duration,
    pub transmit_interval: Duration,
    pub mode: ScheduleMode,

    pub dst_pan: u16,
    pub src_pan: u16,
    pub short_addr: u16,

    pub temperature_offset: usize,
    pub payload_len: usize,

    /// Value sent until the first read completes.
    pub startup_temperature: i32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            query_interval: QUERY_INTERVAL,
            transmit_interval: TRANSMIT_INTERVAL,
            mode: ScheduleMode::default(),
            dst_pan: NETWORK_PAN,
            src_pan: NODE_SRC_PAN,
            short_addr: 0,
            temperature_offset: PAYLOAD_TEMPERATURE_OFFSET,
            payload_len: PAYLOAD_LEN,
            startup_temperature: 0,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.query_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "query interval" });
        }

        check_layout("temperature offset", self.temperature_offset.saturating_add(TEMPERATURE_LEN))?;
        check_layout("payload length", self.payload_len)?;

        if self.mode == ScheduleMode::Decoupled {
            if self.transmit_interval.is_zero() {
                return Err(ConfigError::ZeroInterval { name: "transmit interval" });
            }

            if self.transmit_interval > self.query_interval {
                return Err(ConfigError::TransmitAfterQuery {
                    transmit: self.transmit_interval,
                    query: self.query_interval,
                });
            }
        }

        Ok(())
    }
}


/// What the gateway does when a source arrives and the registry is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Log and drop the update.
    #[default]
    Drop,

    /// Stop the gateway with an error.
    Fail,
}


#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub low_threshold: i32,
    pub high_threshold: i32,

    pub blink_interval: Duration,
    pub receive_window: Duration,

    pub capacity: usize,
    pub overflow: OverflowPolicy,

    pub pan: u16,
    pub payload_offset: usize,
    pub temperature_offset: usize,

    pub initial_zone: Zone,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            low_threshold: LOW_THRESHOLD,
            high_threshold: HIGH_THRESHOLD,
            blink_interval: BLINK_INTERVAL,
            receive_window: RECEIVE_WINDOW,
            capacity: MAX_SOURCES,
            overflow: OverflowPolicy::default(),
            pan: NETWORK_PAN,
            payload_offset: 0,
            temperature_offset: PAYLOAD_TEMPERATURE_OFFSET,
            initial_zone: Zone::Cold,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.blink_interval.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "blink interval" });
        }

        if self.receive_window.is_zero() {
            return Err(ConfigError::ZeroInterval { name: "receive window" });
        }

        if !(1..=MAX_SOURCES).contains(&self.capacity) {
            return Err(ConfigError::Capacity(self.capacity));
        }

        check_layout("payload offset", self.payload_offset)?;
        check_layout(
            "temperature offset",
            self.payload_offset
                .saturating_add(self.temperature_offset)
                .saturating_add(TEMPERATURE_LEN),
        )?;

        if self.low_threshold > self.high_threshold {
            return Err(ConfigError::Thresholds { low: self.low_threshold, high: self.high_threshold });
        }

        Ok(())
    }
}

//! Temperature/humidity sensor: read completions, calibration and a simulated device.
//!
//! A read returns 4 bytes: a big-endian humidity/status word followed by the
//! 14-bit big-endian temperature code.

use bytes::{BufMut, Bytes, BytesMut};
use futures::{future::BoxFuture, FutureExt};
use rand::Rng;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};

/// Bytes requested from the sensor on every read.
pub const SAMPLE_LEN: usize = 4;

/// Offset of the raw temperature code within a sample.
pub const TEMPERATURE_CODE_OFFSET: usize = 2;

const TEMPERATURE_CODE_MASK: u16 = 0x3fff;

/// Completion flag: the device failed to perform the read.
pub const FLAG_FAILED: u32 = 0x01;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorFault {
    #[error("short read ({0} bytes, expected 4)")]
    ShortRead(usize),

    #[error("device reported a failed read")]
    DeviceFailed,

    #[error("failed to open sensor: {0}")]
    OpenFailed(String),
}

/// Completion of a sensor read request.
#[derive(Clone, Debug)]
pub struct ReadCompletion {
    pub flags: u32,
    pub data: Bytes,
    pub time: Instant,
}

impl ReadCompletion {
    pub fn failed() -> Self {
        Self { flags: FLAG_FAILED, data: Bytes::new(), time: Instant::now() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A validated 4-byte sensor sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorSample {
    raw: [u8; SAMPLE_LEN],
}

impl SensorSample {
    pub fn new(raw: [u8; SAMPLE_LEN]) -> Self {
        Self { raw }
    }

    pub fn from_completion(completion: &ReadCompletion) -> Result<Self, SensorFault> {
        if completion.flags & FLAG_FAILED != 0 {
            return Err(SensorFault::DeviceFailed);
        }

        let raw = completion.data[..]
            .try_into()
            .map_err(|_| SensorFault::ShortRead(completion.len()))?;

        Ok(Self { raw })
    }

    pub fn humidity_code(&self) -> u16 {
        u16::from_be_bytes([self.raw[0], self.raw[1]])
    }

    /// 14-bit raw temperature code.
    pub fn temperature_code(&self) -> u16 {
        let code = u16::from_be_bytes([
            self.raw[TEMPERATURE_CODE_OFFSET],
            self.raw[TEMPERATURE_CODE_OFFSET + 1],
        ]);
        code & TEMPERATURE_CODE_MASK
    }

    /// Calibrated temperature: `code / 100 - 40`, whole degrees Celsius.
    pub fn celsius(&self) -> i32 {
        self.temperature_code() as i32 / 100 - 40
    }
}

/// Sensor device. A read is a request; its completion arrives later through
/// the returned future.
pub trait Sensor: Send {
    fn read(&mut self, len: usize) -> BoxFuture<'static, ReadCompletion>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn read(&mut self, len: usize) -> BoxFuture<'static, ReadCompletion> {
        (**self).read(len)
    }
}

/// A waypoint of a simulated feed: milliseconds into the profile, °C, %RH.
pub type Waypoint = (u64, i32, i32);

pub const UP_ONE: &[Waypoint] = &[
    (1000, 10, 0),
    (2000, 15, 20),
    (3000, 20, 40),
    (4000, 25, 60),
    (5000, 30, 80),
    (6000, 35, 100),
];

pub const UP_TWO: &[Waypoint] = &[
    (1000, 5, 0),
    (2000, 10, 10),
    (3000, 15, 30),
    (4000, 20, 50),
    (5000, 25, 70),
    (6000, 30, 90),
];

pub const DOWN_ONE: &[Waypoint] = &[
    (1000, 35, 100),
    (2000, 30, 80),
    (3000, 25, 60),
    (4000, 20, 40),
    (5000, 15, 20),
    (6000, 10, 0),
];

pub const DOWN_TWO: &[Waypoint] = &[
    (1000, 30, 90),
    (2000, 25, 70),
    (3000, 20, 50),
    (4000, 15, 30),
    (5000, 10, 10),
    (6000, 5, 0),
];

/// Which simulated feed drives a `FeedSensor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Feed {
    One,
    Two,
    /// No sensor attached; opening fails.
    Detached,
}

impl Feed {
    fn profiles(self) -> Option<(&'static [Waypoint], &'static [Waypoint])> {
        match self {
            Feed::One => Some((UP_ONE, DOWN_ONE)),
            Feed::Two => Some((UP_TWO, DOWN_TWO)),
            Feed::Detached => None,
        }
    }
}

/// Interpolate `(celsius, humidity)` at `at_ms` into a profile.
///
/// Before the first waypoint the first value holds; after the last, the last.
pub fn interpolate(profile: &[Waypoint], at_ms: u64) -> (i32, i32) {
    let Some(&(first_ms, first_t, first_h)) = profile.first() else {
        return (0, 0);
    };

    if at_ms <= first_ms {
        return (first_t, first_h);
    }

    for pair in profile.windows(2) {
        let (t0, c0, h0) = pair[0];
        let (t1, c1, h1) = pair[1];

        if at_ms <= t1 {
            let span = (t1 - t0) as i64;
            let into = (at_ms - t0) as i64;
            let lerp = |a: i32, b: i32| a + ((b - a) as i64 * into / span) as i32;
            return (lerp(c0, c1), lerp(h0, h1));
        }
    }

    let &(_, last_t, last_h) = profile.last().unwrap_or(&(0, first_t, first_h));
    (last_t, last_h)
}

/// Encode a reading the way the device reports it.
pub fn encode_sample(celsius: i32, humidity: i32) -> [u8; SAMPLE_LEN] {
    let code = ((celsius + 40) * 100).clamp(0, TEMPERATURE_CODE_MASK as i32) as u16;
    let humidity = (humidity * 100).clamp(0, u16::MAX as i32) as u16;

    let mut raw = BytesMut::with_capacity(SAMPLE_LEN);
    raw.put_u16(humidity);
    raw.put_u16(code);

    let mut sample = [0u8; SAMPLE_LEN];
    sample.copy_from_slice(&raw);
    sample
}

/// Simulated sensor replaying an up profile followed by a down profile, over and over.
#[derive(Debug)]
pub struct FeedSensor {
    up: &'static [Waypoint],
    down: &'static [Waypoint],
    started: Instant,

    latency: Duration,
    jitter: Duration,

    /// Every n-th read reports a device failure.
    fail_every: Option<u32>,
    reads: u32,
}

impl FeedSensor {
    pub fn open(feed: Feed) -> Result<Self, SensorFault> {
        let (up, down) = feed
            .profiles()
            .ok_or_else(|| SensorFault::OpenFailed(format!("no sensor attached for feed {feed}")))?;

        Ok(Self {
            up,
            down,
            started: Instant::now(),
            latency: Duration::from_millis(20),
            jitter: Duration::ZERO,
            fail_every: None,
            reads: 0,
        })
    }

    pub fn with_latency(mut self, latency: Duration, jitter: Duration) -> Self {
        self.latency = latency;
        self.jitter = jitter;
        self
    }

    pub fn with_failures(mut self, every: u32) -> Self {
        self.fail_every = (every > 0).then_some(every);
        self
    }

    /// Reading the feed would produce right now.
    pub fn current(&self) -> (i32, i32) {
        let period = self.up.last().map(|w| w.0).unwrap_or(1).max(1);
        let elapsed = self.started.elapsed().as_millis() as u64;

        let profile = if (elapsed / period) % 2 == 0 { self.up } else { self.down };
        interpolate(profile, elapsed % period)
    }
}

impl Sensor for FeedSensor {
    fn read(&mut self, len: usize) -> BoxFuture<'static, ReadCompletion> {
        self.reads = self.reads.wrapping_add(1);

        let failed = matches!(self.fail_every, Some(n) if self.reads % n == 0);

        let (celsius, humidity) = self.current();
        let sample = encode_sample(celsius, humidity);

        let jitter_ms = self.jitter.as_millis() as u64;
        let delay = self.latency + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));

        async move {
            sleep(delay).await;

            if failed {
                return ReadCompletion::failed();
            }

            let data = Bytes::copy_from_slice(&sample[..len.min(SAMPLE_LEN)]);
            ReadCompletion { flags: 0, data, time: Instant::now() }
        }
        .boxed()
    }
}

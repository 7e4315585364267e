//! Node role: sample the sensor on one clock, transmit on another.
//!
//! The scheduling decisions live in [`SamplingScheduler`], a plain state
//! machine fed [`NodeEvent`]s and answering with [`NodeAction`]s.
//! [`run_node`] owns the devices: it turns timer expiries and read
//! completions into events and performs the actions, one event at a time.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, SinkExt, StreamExt};
use tokio::{select, time::Duration};

use crate::{
    config::{NodeConfig, PortStream, ScheduleMode},
    indicator::Indicators,
    protocol::frame::{encode_temperature, FrameCodec},
    sensor::{ReadCompletion, Sensor, SensorFault, SensorSample, SAMPLE_LEN},
    timer::OneShot,
};

/// Node indicator slot mirroring the sensor fault flag (red).
pub const FAULT_SLOT: usize = 0;

/// Node indicator slot lit while handing a frame to the radio (yellow).
pub const ACTIVITY_SLOT: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the query timer.
    Idle,
    /// A read was requested and has not completed.
    PendingRead,
    /// The read completed; waiting for the transmit timer.
    PendingSend,
}

#[derive(Clone, Debug)]
pub enum NodeEvent {
    QueryTimer,
    TransmitTimer,
    ReadComplete(ReadCompletion),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeAction {
    RequestRead,
    ArmQuery(Duration),
    ArmTransmit(Duration),
    Transmit(Bytes),
    SetFault(bool),
}

pub struct SamplingScheduler {
    config: NodeConfig,
    codec: FrameCodec,
    state: SchedulerState,

    cached: i32,
    sequence: u8,
    fault: Option<SensorFault>,
    sensor_missing: bool,
    reads_in_flight: usize,
}

impl SamplingScheduler {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            cached: config.startup_temperature,
            codec: FrameCodec::default(),
            state: SchedulerState::Idle,
            sequence: 0,
            fault: None,
            sensor_missing: false,
            reads_in_flight: 0,
            config,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Last calibrated temperature, or the startup default.
    pub fn cached(&self) -> i32 {
        self.cached
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn fault(&self) -> Option<&SensorFault> {
        self.fault.as_ref()
    }

    pub fn sensor_missing(&self) -> bool {
        self.sensor_missing
    }

    /// Reads requested and not yet completed.
    pub fn reads_in_flight(&self) -> usize {
        self.reads_in_flight
    }

    pub fn short_addr(&self) -> u16 {
        self.config.short_addr
    }

    /// Record that the sensor could not be opened. The schedule keeps running.
    pub fn sensor_unavailable(&mut self, fault: SensorFault) -> Vec<NodeAction> {
        tracing::error!("{fault}");
        self.sensor_missing = true;
        self.set_fault(fault).into_iter().collect()
    }

    /// The first query fires immediately.
    pub fn start(&mut self) -> Vec<NodeAction> {
        self.handle(NodeEvent::QueryTimer)
    }

    pub fn handle(&mut self, event: NodeEvent) -> Vec<NodeAction> {
        match (self.config.mode, event) {
            (ScheduleMode::Decoupled, NodeEvent::QueryTimer) => {
                self.request_read();
                self.state = SchedulerState::PendingRead;
                vec![
                    NodeAction::RequestRead,
                    NodeAction::ArmTransmit(self.config.transmit_interval),
                ]
            }
            (ScheduleMode::Decoupled, NodeEvent::ReadComplete(completion)) => {
                let actions = self.complete_read(&completion);
                if self.state == SchedulerState::PendingRead {
                    self.state = SchedulerState::PendingSend;
                }
                actions
            }
            (ScheduleMode::Decoupled, NodeEvent::TransmitTimer) => {
                if self.state == SchedulerState::Idle {
                    // stale alarm, nothing armed it this cycle
                    return Vec::new();
                }

                if self.state == SchedulerState::PendingRead {
                    tracing::debug!(cached = self.cached, "read still in flight, sending previous value");
                }

                let mut actions = self.transmit();
                let rest = self.config.query_interval.saturating_sub(self.config.transmit_interval);
                actions.push(NodeAction::ArmQuery(rest));
                self.state = SchedulerState::Idle;
                actions
            }

            (ScheduleMode::ReadTriggered, NodeEvent::QueryTimer) => {
                self.request_read();
                self.state = SchedulerState::PendingRead;
                vec![NodeAction::RequestRead]
            }
            (ScheduleMode::ReadTriggered, NodeEvent::ReadComplete(completion)) => {
                let mut actions = self.complete_read(&completion);
                actions.extend(self.transmit());
                actions.push(NodeAction::ArmQuery(self.config.query_interval));
                self.state = SchedulerState::Idle;
                actions
            }
            (ScheduleMode::ReadTriggered, NodeEvent::TransmitTimer) => Vec::new(),
        }
    }

    fn request_read(&mut self) {
        if self.reads_in_flight > 0 {
            tracing::debug!(in_flight = self.reads_in_flight, "sensor slower than the query interval, reads overlap");
        }
        self.reads_in_flight += 1;
    }

    fn complete_read(&mut self, completion: &ReadCompletion) -> Vec<NodeAction> {
        self.reads_in_flight = self.reads_in_flight.saturating_sub(1);

        match SensorSample::from_completion(completion) {
            Ok(sample) => {
                self.cached = sample.celsius();
                tracing::debug!(
                    code = sample.temperature_code(),
                    temperature = self.cached,
                    "sensor read"
                );

                if self.fault.take().is_some() && !self.sensor_missing {
                    tracing::info!("sensor recovered");
                    vec![NodeAction::SetFault(false)]
                } else {
                    Vec::new()
                }
            }
            Err(fault) => {
                tracing::warn!(cached = self.cached, "{fault}, keeping last value");
                self.set_fault(fault).into_iter().collect()
            }
        }
    }

    fn set_fault(&mut self, fault: SensorFault) -> Option<NodeAction> {
        let was_set = self.fault.replace(fault).is_some();
        (!was_set).then_some(NodeAction::SetFault(true))
    }

    fn transmit(&mut self) -> Vec<NodeAction> {
        let payload = encode_temperature(
            self.cached,
            self.config.temperature_offset,
            self.config.payload_len,
        );

        let frame = self.codec.encode(
            self.sequence,
            self.config.dst_pan,
            self.config.src_pan,
            self.config.short_addr,
            &payload,
        );

        match frame {
            Ok(frame) => {
                tracing::debug!(seq = self.sequence, temperature = self.cached, "sent frame: 0x{}", hex(&frame));
                self.sequence = self.sequence.wrapping_add(1);
                vec![NodeAction::Transmit(frame)]
            }
            Err(err) => {
                tracing::error!("failed to build frame: {err}");
                Vec::new()
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Run a node until its radio port closes.
///
/// `sensor` is the result of opening the sensor device; when it failed, the
/// node keeps transmitting its cached value with the fault indicator lit.
pub async fn run_node<S, I>(
    config: NodeConfig,
    sensor: std::result::Result<S, SensorFault>,
    mut port: Box<dyn PortStream>,
    leds: &mut I,
) -> Result<SamplingScheduler>
where
    S: Sensor,
    I: Indicators,
{
    config.validate().context("invalid node configuration")?;

    let mut scheduler = SamplingScheduler::new(config);

    let mut query = OneShot::new();
    let mut transmit = OneShot::new();
    let mut reads: FuturesUnordered<BoxFuture<'static, ReadCompletion>> = FuturesUnordered::new();

    leds.all_off();

    let mut sensor = match sensor {
        Ok(sensor) => Some(sensor),
        Err(fault) => {
            for action in scheduler.sensor_unavailable(fault) {
                if let NodeAction::SetFault(on) = action {
                    leds.set_state(FAULT_SLOT, on);
                }
            }
            // latched: tells a missing sensor apart from a failed read
            leds.set_state(ACTIVITY_SLOT, true);
            None
        }
    };

    tracing::info!(addr = %format!("{:#06x}", scheduler.short_addr()), "node started");

    let actions = scheduler.start();
    apply(actions, &mut scheduler, &mut sensor, &mut reads, &mut query, &mut transmit, &mut port, leds).await;

    loop {
        let event = select! {
            Some(completion) = reads.next() => NodeEvent::ReadComplete(completion),
            _ = query.fired() => NodeEvent::QueryTimer,
            _ = transmit.fired() => NodeEvent::TransmitTimer,
            frame = port.next() => {
                match frame {
                    // nodes don't listen, but other nodes share the channel
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(err).context("radio port failed"),
                    None => {
                        tracing::info!("radio port closed");
                        return Ok(scheduler);
                    }
                }
            }
        };

        let actions = scheduler.handle(event);
        apply(actions, &mut scheduler, &mut sensor, &mut reads, &mut query, &mut transmit, &mut port, leds).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply<S: Sensor, I: Indicators>(
    actions: Vec<NodeAction>,
    scheduler: &mut SamplingScheduler,
    sensor: &mut Option<S>,
    reads: &mut FuturesUnordered<BoxFuture<'static, ReadCompletion>>,
    query: &mut OneShot,
    transmit: &mut OneShot,
    port: &mut Box<dyn PortStream>,
    leds: &mut I,
) {
    for action in actions {
        match action {
            NodeAction::RequestRead => match sensor {
                Some(sensor) => reads.push(sensor.read(SAMPLE_LEN)),
                None => reads.push(futures::future::ready(ReadCompletion::failed()).boxed()),
            },
            NodeAction::ArmQuery(span) => query.arm(span),
            NodeAction::ArmTransmit(span) => transmit.arm(span),
            NodeAction::Transmit(frame) => {
                leds.set_state(ACTIVITY_SLOT, true);

                // fire and forget: a lost frame is not retried
                if let Err(err) = port.send(frame).await {
                    tracing::warn!("transmit failed: {err}");
                }

                if !scheduler.sensor_missing() {
                    leds.set_state(ACTIVITY_SLOT, false);
                }
            }
            NodeAction::SetFault(on) => leds.set_state(FAULT_SLOT, on),
        }
    }
}

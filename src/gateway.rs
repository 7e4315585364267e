//! Gateway role: collect readings, average them, blink the zone indicator.

use anyhow::{Context, Result};
use futures::StreamExt;
use thiserror::Error;
use tokio::select;

use crate::{
    config::{GatewayConfig, OverflowPolicy, PortStream},
    indicator::{IndicatorCommand, IndicatorController, Indicators, Thresholds},
    protocol::frame::{decode_temperature, FrameCodec, FrameError},
    registry::{RegistryFull, TelemetryRegistry, Upsert},
    timer::OneShot,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GatewayError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("frame for pan {pan:#06x} ignored")]
    ForeignPan { pan: u16 },

    #[error(transparent)]
    RegistryFull(#[from] RegistryFull),
}

/// A reading accepted into the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reception {
    pub short_addr: u16,
    pub temperature: i32,
    pub upsert: Upsert,
    pub average: i32,
}

/// Gateway state, owned by the driver and touched one reaction at a time.
pub struct Gateway {
    config: GatewayConfig,
    codec: FrameCodec,
    registry: TelemetryRegistry,
    indicator: IndicatorController,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let thresholds = Thresholds { low: config.low_threshold, high: config.high_threshold };

        Self {
            codec: FrameCodec::new(config.payload_offset),
            registry: TelemetryRegistry::with_capacity(config.capacity),
            indicator: IndicatorController::new(thresholds, config.initial_zone),
            config,
        }
    }

    pub fn registry(&self) -> &TelemetryRegistry {
        &self.registry
    }

    pub fn indicator(&self) -> &IndicatorController {
        &self.indicator
    }

    pub fn average(&self) -> i32 {
        self.registry.average()
    }

    /// Decode a received frame and record its temperature.
    ///
    /// On error the registry is left untouched.
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<Reception, GatewayError> {
        let header = self.codec.header(frame)?;
        if header.dst_pan != self.config.pan {
            return Err(GatewayError::ForeignPan { pan: header.dst_pan });
        }

        let (short_addr, payload) = self.codec.decode(frame)?;
        let temperature = decode_temperature(payload, self.config.temperature_offset)?;

        let upsert = self.registry.upsert(short_addr, temperature)?;
        let average = self.registry.average();

        Ok(Reception { short_addr, temperature, upsert, average })
    }

    /// Blink tick: classify the current average and toggle the active indicator.
    pub fn on_blink(&mut self) -> Vec<IndicatorCommand> {
        let average = self.registry.average();
        let previous = self.indicator.active_zone();

        let commands = self.indicator.tick(average);

        let zone = self.indicator.active_zone();
        if zone != previous {
            tracing::info!(%zone, average, "zone changed");
        }

        commands
    }

    /// Apply the overflow policy to a frame reaction.
    ///
    /// Returns an error only when the gateway must stop.
    fn receive(&mut self, frame: &[u8]) -> Result<(), GatewayError> {
        match self.on_frame(frame) {
            Ok(reception) => {
                let addr = format!("{:#06x}", reception.short_addr);
                match reception.upsert {
                    Upsert::Created => tracing::info!(%addr, "new thermostat, temperature {}", reception.temperature),
                    Upsert::Updated => tracing::debug!(%addr, "temperature {}", reception.temperature),
                }
                tracing::debug!("average temperature {}", reception.average);
                Ok(())
            }
            Err(GatewayError::RegistryFull(full)) if self.config.overflow == OverflowPolicy::Fail => {
                Err(full.into())
            }
            Err(err @ GatewayError::RegistryFull(_)) => {
                tracing::warn!("{err}");
                Ok(())
            }
            Err(err @ GatewayError::ForeignPan { .. }) => {
                tracing::trace!("{err}");
                Ok(())
            }
            Err(err) => {
                tracing::warn!("dropping frame: {err}");
                Ok(())
            }
        }
    }
}

/// Run the gateway until its radio port closes, returning the final state.
pub async fn run_gateway<I: Indicators>(
    config: GatewayConfig,
    mut port: Box<dyn PortStream>,
    leds: &mut I,
) -> Result<Gateway> {
    config.validate().context("invalid gateway configuration")?;

    let blink_interval = config.blink_interval;
    let receive_window = config.receive_window;
    let mut gateway = Gateway::new(config);

    let mut blink = OneShot::new();
    let mut window = OneShot::new();

    leds.all_off();
    blink.arm(blink_interval);
    window.arm(receive_window);

    tracing::info!("gateway listening");

    loop {
        select! {
            frame = port.next() => match frame {
                Some(Ok(frame)) => gateway.receive(&frame)?,
                Some(Err(err)) => return Err(err).context("radio port failed"),
                None => {
                    tracing::info!("radio port closed");
                    return Ok(gateway);
                }
            },
            _ = blink.fired() => {
                leds.apply(&gateway.on_blink());
                blink.arm(blink_interval);
            },
            _ = window.fired() => {
                tracing::debug!("receive window elapsed, listening again");
                window.arm(receive_window);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::SinkExt;
    use tokio::time::{Duration, Instant};

    use super::*;
    use crate::{
        config::framed,
        indicator::{tests::RecordingIndicators, Zone},
        protocol::{
            addresses::{NETWORK_PAN, NODE_SRC_PAN},
            frame::encode_temperature,
        },
    };

    fn frame_from(addr: u16, celsius: i32) -> Bytes {
        FrameCodec::default()
            .encode(0, NETWORK_PAN, NODE_SRC_PAN, addr, &encode_temperature(celsius, 0, 4))
            .unwrap()
    }

    #[test]
    fn frames_update_registry() {
        let mut gateway = Gateway::new(GatewayConfig::default());

        let reception = gateway.on_frame(&frame_from(0xa, 12)).unwrap();
        assert_eq!(reception.upsert, Upsert::Created);
        assert_eq!(reception.average, 12);

        gateway.on_frame(&frame_from(0xb, 30)).unwrap();
        let reception = gateway.on_frame(&frame_from(0xa, 14)).unwrap();
        assert_eq!(reception.upsert, Upsert::Updated);
        assert_eq!(reception.average, 22);
        assert_eq!(gateway.registry().len(), 2);
    }

    #[test]
    fn bad_frames_leave_registry_untouched() {
        let mut gateway = Gateway::new(GatewayConfig::default());
        gateway.on_frame(&frame_from(0xa, 12)).unwrap();

        assert!(matches!(
            gateway.on_frame(&[0x41, 0x80, 0x01]),
            Err(GatewayError::Frame(FrameError::FrameTooShort { .. }))
        ));

        // header only, no temperature
        let empty = FrameCodec::default().encode(1, NETWORK_PAN, NODE_SRC_PAN, 0xa, &[]).unwrap();
        assert!(matches!(
            gateway.on_frame(&empty),
            Err(GatewayError::Frame(FrameError::PayloadTooShort { .. }))
        ));

        let foreign = FrameCodec::default().encode(1, 0x99, NODE_SRC_PAN, 0xa, &[0, 40]).unwrap();
        assert_eq!(gateway.on_frame(&foreign), Err(GatewayError::ForeignPan { pan: 0x99 }));

        assert_eq!(gateway.registry().get(0xa), Some(12));
    }

    #[test]
    fn overflow_policy() {
        let mut gateway = Gateway::new(GatewayConfig::default());
        gateway.receive(&frame_from(1, 10)).unwrap();
        gateway.receive(&frame_from(2, 20)).unwrap();

        assert_eq!(gateway.receive(&frame_from(3, 90)), Ok(()));
        assert_eq!(gateway.average(), 15);

        let mut gateway = Gateway::new(GatewayConfig {
            overflow: OverflowPolicy::Fail,
            capacity: 1,
            ..Default::default()
        });
        gateway.receive(&frame_from(1, 10)).unwrap();
        assert_eq!(
            gateway.receive(&frame_from(2, 20)),
            Err(GatewayError::RegistryFull(RegistryFull { short_addr: 2, capacity: 1 }))
        );
        assert_eq!(gateway.registry().records().len(), 1);
    }

    #[test]
    fn payload_port_header() {
        let mut gateway = Gateway::new(GatewayConfig { payload_offset: 1, ..Default::default() });

        let frame = FrameCodec::default()
            .encode(0, NETWORK_PAN, NODE_SRC_PAN, 0xc, &[0x07, 0x00, 0x1a])
            .unwrap();
        assert_eq!(gateway.on_frame(&frame).unwrap().temperature, 26);
    }

    #[test]
    fn blink_follows_average() {
        let mut gateway = Gateway::new(GatewayConfig::default());

        assert_eq!(gateway.on_blink(), vec![IndicatorCommand { slot: 0, on: true }]);

        gateway.on_frame(&frame_from(0xa, 40)).unwrap();
        assert_eq!(
            gateway.on_blink(),
            vec![IndicatorCommand { slot: 0, on: false }, IndicatorCommand { slot: 2, on: true }]
        );
        assert_eq!(gateway.indicator().active_zone(), Zone::Hot);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_blinks_and_collects() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut radio = framed(theirs);

        let gateway = tokio::spawn(async move {
            let mut leds = RecordingIndicators::new(3);
            run_gateway(GatewayConfig::default(), framed(ours), &mut leds)
                .await
                .map(|gateway| (gateway, leds))
        });

        radio.send(frame_from(0xa, 20)).await.unwrap();
        radio.send(frame_from(0xb, 24)).await.unwrap();

        // blink ticks at 0.5s, 1s and 1.5s: on, off, on
        tokio::time::sleep_until(Instant::now() + Duration::from_millis(1600)).await;
        drop(radio);

        let (gateway, leds) = gateway.await.unwrap().unwrap();
        assert_eq!(gateway.average(), 22);

        // startup all-off, then cold forced off as normal lights
        assert_eq!(&leds.calls[..3], &[
            IndicatorCommand { slot: 0, on: false },
            IndicatorCommand { slot: 1, on: false },
            IndicatorCommand { slot: 2, on: false },
        ]);
        assert_eq!(leds.calls[3..5], [
            IndicatorCommand { slot: 0, on: false },
            IndicatorCommand { slot: 1, on: true },
        ]);
        assert_eq!(leds.lit(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_stops_on_overflow_when_failing() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let mut radio = framed(theirs);

        let config = GatewayConfig { overflow: OverflowPolicy::Fail, ..Default::default() };
        let gateway = tokio::spawn(async move {
            let mut leds = RecordingIndicators::new(3);
            run_gateway(config, framed(ours), &mut leds).await.map(|_| ())
        });

        for addr in 1..=3 {
            radio.send(frame_from(addr, 20)).await.unwrap();
        }

        let err = gateway.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("registry full"));
    }
}

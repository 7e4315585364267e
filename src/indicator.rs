//! Zone classification and the gateway's blink state machine.

use colored::{Color, Colorize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

pub const LOW_THRESHOLD: i32 = 10;
pub const HIGH_THRESHOLD: i32 = 25;

/// Which indicator represents the average temperature.
///
/// The discriminant is the indicator slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Zone {
    Cold = 0,
    Normal = 1,
    Hot = 2,
}

impl Zone {
    pub fn slot(self) -> usize {
        self as usize
    }
}

/// Classification thresholds. Both bounds belong to `Normal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub low: i32,
    pub high: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { low: LOW_THRESHOLD, high: HIGH_THRESHOLD }
    }
}

impl Thresholds {
    pub fn classify(&self, average: i32) -> Zone {
        if average < self.low {
            Zone::Cold
        } else if average > self.high {
            Zone::Hot
        } else {
            Zone::Normal
        }
    }
}

/// A change to apply to one indicator slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndicatorCommand {
    pub slot: usize,
    pub on: bool,
}

/// Indicator device: a handful of addressable on/off slots.
pub trait Indicators {
    fn set_state(&mut self, slot: usize, on: bool);

    fn count(&self) -> usize;

    fn all_off(&mut self) {
        for slot in 0..self.count() {
            self.set_state(slot, false);
        }
    }

    fn apply(&mut self, commands: &[IndicatorCommand]) {
        for cmd in commands {
            self.set_state(cmd.slot, cmd.on);
        }
    }
}

/// One lit indicator at a time, toggled on every blink tick.
#[derive(Clone, Debug)]
pub struct IndicatorController {
    thresholds: Thresholds,
    active: Zone,
    on: bool,
}

impl IndicatorController {
    pub fn new(thresholds: Thresholds, initial: Zone) -> Self {
        Self { thresholds, active: initial, on: false }
    }

    pub fn active_zone(&self) -> Zone {
        self.active
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Blink tick, fed the registry's current average.
    ///
    /// Returns the indicator changes in the order they must be applied. On a
    /// zone change the old indicator is switched off before the new one lights.
    pub fn tick(&mut self, average: i32) -> Vec<IndicatorCommand> {
        let zone = self.thresholds.classify(average);
        let mut commands = Vec::with_capacity(2);

        if zone != self.active {
            commands.push(IndicatorCommand { slot: self.active.slot(), on: false });
            self.active = zone;
            self.on = false;
        }

        self.on = !self.on;
        commands.push(IndicatorCommand { slot: self.active.slot(), on: self.on });

        commands
    }
}

/// Renders indicator slots as a colored log line.
#[derive(Debug)]
pub struct ConsoleIndicators {
    slots: Vec<(&'static str, Color, bool)>,
}

impl ConsoleIndicators {
    /// The gateway's three zone indicators.
    pub fn zones() -> Self {
        let colors = [Color::Blue, Color::Green, Color::Red];
        Self::new(Zone::iter().zip(colors).map(|(zone, color)| (<&'static str>::from(zone), color)))
    }

    /// A node's fault and activity indicators.
    pub fn node() -> Self {
        Self::new([("fault", Color::Red), ("tx", Color::Yellow)])
    }

    pub fn new(slots: impl IntoIterator<Item = (&'static str, Color)>) -> Self {
        Self {
            slots: slots.into_iter().map(|(label, color)| (label, color, false)).collect(),
        }
    }

    fn render(&self) -> String {
        self.slots
            .iter()
            .map(|&(label, color, on)| {
                let label = format!(" {label:^6} ");
                if on {
                    label.on_color(color).bright_white().to_string()
                } else {
                    label.dimmed().to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Indicators for ConsoleIndicators {
    fn set_state(&mut self, slot: usize, on: bool) {
        let Some((_, _, state)) = self.slots.get_mut(slot) else {
            tracing::warn!(slot, "no such indicator");
            return;
        };

        if *state != on {
            *state = on;
            tracing::info!("leds {}", self.render());
        }
    }

    fn count(&self) -> usize {
        self.slots.len()
    }
}

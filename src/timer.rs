use std::{future::pending, pin::Pin};

use tokio::time::{sleep_until, Duration, Instant, Sleep};

/// A one-shot timer in the style of the mote timer device.
///
/// There is no repeating mode: a periodic timer re-arms itself from the code
/// handling its expiry. Arming an armed timer replaces the pending alarm.
#[derive(Debug, Default)]
pub struct OneShot {
    alarm: Option<Pin<Box<Sleep>>>,
}

impl OneShot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, span: Duration) {
        self.arm_at(Instant::now() + span);
    }

    pub fn arm_at(&mut self, deadline: Instant) {
        match &mut self.alarm {
            Some(alarm) => alarm.as_mut().reset(deadline),
            None => self.alarm = Some(Box::pin(sleep_until(deadline))),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.alarm.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.alarm.as_ref().map(|alarm| alarm.deadline())
    }

    /// Resolves once when the alarm goes off and disarms the timer.
    ///
    /// Never resolves while the timer is disarmed, so it can sit in a
    /// `select!` next to other event sources.
    pub async fn fired(&mut self) -> Instant {
        match self.alarm.as_mut() {
            Some(alarm) => {
                alarm.as_mut().await;
                let deadline = alarm.deadline();
                self.alarm = None;
                deadline
            }
            None => pending().await,
        }
    }
}

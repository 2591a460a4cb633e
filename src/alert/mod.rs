//! Door-propped-open alerts.
//!
//! `AlertPolicy` watches the counters carried by each `FrameReport`. When both
//! "frames since movement" and "frames since closed" exceed the configured
//! threshold the policy fires once, then stays quiet until either counter
//! drops back to or below the threshold. It only reads the counters.

use anyhow::Result;
use serde::Serialize;

use crate::report::{FrameReport, ReportSink};

pub mod mqtt;

pub use mqtt::MqttAlertSink;

/// Payload delivered to every alert sink.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DoorAlert {
    pub sequence: u64,
    pub frames_since_movement: u64,
    pub frames_since_closed: u64,
    pub threshold: u64,
}

pub struct AlertPolicy {
    threshold: u64,
    armed: bool,
}

impl AlertPolicy {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            armed: true,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn evaluate(&mut self, report: &FrameReport) -> Option<DoorAlert> {
        let timers = report.timers;
        let propped = timers.frames_since_movement > self.threshold
            && timers.frames_since_closed > self.threshold;
        if !propped {
            self.armed = true;
            return None;
        }
        if !self.armed {
            return None;
        }
        self.armed = false;
        Some(DoorAlert {
            sequence: report.sequence,
            frames_since_movement: timers.frames_since_movement,
            frames_since_closed: timers.frames_since_closed,
            threshold: self.threshold,
        })
    }
}

pub trait AlertSink {
    fn name(&self) -> &str;
    fn deliver(&mut self, alert: &DoorAlert) -> Result<()>;
}

pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&mut self, alert: &DoorAlert) -> Result<()> {
        log::warn!(
            "door propped open: no movement for {} frames, open for {} frames (threshold {}, frame {})",
            alert.frames_since_movement,
            alert.frames_since_closed,
            alert.threshold,
            alert.sequence
        );
        Ok(())
    }
}

/// Report sink that forwards to `inner` and evaluates the alert policy on
/// every report. Failed deliveries are logged and do not stop the run.
pub struct AlertingReporter<R> {
    inner: R,
    policy: AlertPolicy,
    sinks: Vec<Box<dyn AlertSink>>,
    alerts_fired: u64,
}

impl<R: ReportSink> AlertingReporter<R> {
    pub fn new(inner: R, policy: AlertPolicy) -> Self {
        Self {
            inner,
            policy,
            sinks: Vec::new(),
            alerts_fired: 0,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn alerts_fired(&self) -> u64 {
        self.alerts_fired
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: ReportSink> ReportSink for AlertingReporter<R> {
    fn report(&mut self, report: &FrameReport) -> Result<()> {
        self.inner.report(report)?;
        if let Some(alert) = self.policy.evaluate(report) {
            self.alerts_fired += 1;
            for sink in &mut self.sinks {
                if let Err(e) = sink.deliver(&alert) {
                    log::warn!("alert delivery via {} failed: {:#}", sink.name(), e);
                }
            }
        }
        Ok(())
    }
}

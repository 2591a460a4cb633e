//! Output boundary: one line per processed frame.
//!
//! The text form is meant for humans tailing the daemon; the JSON form carries
//! the full `FrameReport` for downstream consumers.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

use crate::timers::TimerState;

/// Everything derived from one processed frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub sequence: u64,
    pub motion: u64,
    pub left_distance: f64,
    pub right_distance: f64,
    pub door_closed: bool,
    pub timers: TimerState,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            other => Err(anyhow!(
                "unknown report format '{}'; expected text or json",
                other
            )),
        }
    }
}

pub fn format_report(report: &FrameReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(format!(
            "Last movement: {}, Last closed: {}",
            report.timers.frames_since_movement, report.timers.frames_since_closed
        )),
        ReportFormat::Json => serde_json::to_string(report).context("serialize frame report"),
    }
}

/// Receives every report the monitor produces.
pub trait ReportSink {
    fn report(&mut self, report: &FrameReport) -> Result<()>;
}

/// Collects reports in memory.
impl ReportSink for Vec<FrameReport> {
    fn report(&mut self, report: &FrameReport) -> Result<()> {
        self.push(*report);
        Ok(())
    }
}

/// Writes one formatted line per report and flushes it immediately.
pub struct LineReporter<W: Write> {
    out: W,
    format: ReportFormat,
}

impl<W: Write> LineReporter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl LineReporter<std::io::Stdout> {
    pub fn stdout(format: ReportFormat) -> Self {
        Self::new(std::io::stdout(), format)
    }
}

impl<W: Write> ReportSink for LineReporter<W> {
    fn report(&mut self, report: &FrameReport) -> Result<()> {
        let line = format_report(report, self.format)?;
        writeln!(self.out, "{}", line).context("write report line")?;
        self.out.flush().context("flush report line")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameReport {
        FrameReport {
            sequence: 3,
            motion: 0,
            left_distance: 1.5,
            right_distance: 0.0,
            door_closed: true,
            timers: TimerState {
                frames_since_movement: 2,
                frames_since_closed: 0,
            },
        }
    }

    #[test]
    fn text_line_states_both_counters() -> Result<()> {
        assert_eq!(
            format_report(&sample(), ReportFormat::Text)?,
            "Last movement: 2, Last closed: 0"
        );
        Ok(())
    }

    #[test]
    fn json_line_carries_full_report() -> Result<()> {
        let line = format_report(&sample(), ReportFormat::Json)?;
        let value: serde_json::Value = serde_json::from_str(&line)?;
        assert_eq!(value["sequence"], 3);
        assert_eq!(value["door_closed"], true);
        assert_eq!(value["timers"]["frames_since_movement"], 2);
        assert_eq!(value["timers"]["frames_since_closed"], 0);
        Ok(())
    }

    #[test]
    fn line_reporter_writes_one_line_per_report() -> Result<()> {
        let mut reporter = LineReporter::new(Vec::new(), ReportFormat::Text);
        reporter.report(&sample())?;
        reporter.report(&sample())?;
        let out = String::from_utf8(reporter.into_inner())?;
        assert_eq!(out.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn format_parses_case_insensitively() -> Result<()> {
        assert_eq!("JSON".parse::<ReportFormat>()?, ReportFormat::Json);
        assert_eq!(" text ".parse::<ReportFormat>()?, ReportFormat::Text);
        assert!("xml".parse::<ReportFormat>().is_err());
        Ok(())
    }
}

use crate::config::CorrelatorSettings;
use crate::history::{AnomalyRecord, History, PacketRecord};
use crate::worker::{CancelToken, TICK, Worker};
use chrono::TimeDelta;
use log::{debug, error};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Sentinel line written in place of the packet list when nothing matched.
const NO_MATCH_SENTINEL: &str = "No packets found within the time window of this anomaly.";

/// The anomaly-packet correlator: the sole consumer of both histories.
///
/// Each pass handles only anomalies appended since the previous pass
/// (tracked by a private cursor of absolute indices, so exactly-once holds
/// even across ring eviction), matches each one against recently
/// transmitted packets inside a symmetric time window, and persists one
/// plain-text report per anomaly. Reports are write-only: the pipeline
/// never reads them back.
pub struct Correlator {
    packets: History<PacketRecord>,
    anomalies: History<AnomalyRecord>,
    cursor: u64,
    window: TimeDelta,
    scan_limit: usize,
    report_dir: PathBuf,
    /// Passes run on this fixed cadence, trading report latency for scan cost.
    cadence: Duration,
}

impl Correlator {
    /// Creates the correlator and its report directory.
    pub fn new(
        packets: History<PacketRecord>,
        anomalies: History<AnomalyRecord>,
        settings: &CorrelatorSettings,
    ) -> std::io::Result<Self> {
        fs::create_dir_all(&settings.report_dir)?;
        Ok(Self {
            packets,
            anomalies,
            cursor: 0,
            window: TimeDelta::milliseconds(settings.window_ms as i64),
            scan_limit: settings.scan_limit,
            report_dir: settings.report_dir.clone(),
            cadence: Duration::from_millis(settings.window_ms),
        })
    }

    /// How many anomalies have been processed so far.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Processes every anomaly appended since the previous pass. Returns
    /// the number of reports successfully persisted.
    ///
    /// The cursor advances unconditionally — a failed report write is
    /// logged and never reprocessed, so a permanently unwritable target
    /// cannot wedge the worker in a retry loop.
    pub fn pass(&mut self) -> usize {
        let (fresh, next_cursor) = self.anomalies.snapshot_since(self.cursor);
        if fresh.is_empty() {
            self.cursor = next_cursor;
            return 0;
        }

        // One bounded snapshot of recent packets serves the whole pass.
        let candidates = self.packets.recent(self.scan_limit);
        let base_index = next_cursor - fresh.len() as u64;

        let mut written = 0;
        for (offset, anomaly) in fresh.iter().enumerate() {
            let index = base_index + offset as u64;
            let matched = self.matched_packets(anomaly, &candidates);
            match self.persist_report(index, anomaly, &matched) {
                Ok(()) => written += 1,
                Err(e) => error!("correlator: failed to persist report {index}: {e}"),
            }
        }

        self.cursor = next_cursor;
        debug!("correlator: pass complete, cursor at {}", self.cursor);
        written
    }

    /// Packets whose timestamp lies within `window / 2` of the anomaly, in
    /// either direction (boundary inclusive).
    fn matched_packets(
        &self,
        anomaly: &AnomalyRecord,
        candidates: &[PacketRecord],
    ) -> Vec<PacketRecord> {
        let half_window = self.window / 2;
        candidates
            .iter()
            .filter(|packet| (packet.timestamp - anomaly.timestamp).abs() <= half_window)
            .cloned()
            .collect()
    }

    fn persist_report(
        &self,
        index: u64,
        anomaly: &AnomalyRecord,
        matched: &[PacketRecord],
    ) -> std::io::Result<()> {
        let path = self.report_dir.join(format!("anomaly_{index:06}.txt"));
        let mut body = format!(
            "Time Detected: {}\n\nType: {}\n\n{}\n\n\n",
            anomaly.timestamp.to_rfc3339(),
            anomaly.kind,
            anomaly.description
        );
        if matched.is_empty() {
            body.push_str(NO_MATCH_SENTINEL);
            body.push('\n');
        } else {
            for packet in matched {
                body.push_str(&format!(
                    "{} @ {} -> {}\n",
                    packet.sequence,
                    packet.timestamp.to_rfc3339(),
                    packet.hex
                ));
            }
        }
        fs::write(path, body)
    }
}

impl Worker for Correlator {
    fn name(&self) -> &'static str {
        "correlator"
    }

    fn run(&mut self, cancel: &CancelToken) {
        let mut last_pass: Option<Instant> = None;
        while !cancel.is_cancelled() {
            let due = last_pass.is_none_or(|t| t.elapsed() >= self.cadence);
            if due {
                self.pass();
                last_pass = Some(Instant::now());
            }
            thread::sleep(TICK);
        }
    }
}

use crate::config::MonitorSettings;
use crate::diag::{ChannelError, DiagnosticChannel};
use crate::history::{AnomalyKind, AnomalyRecord, History};
use crate::worker::{CancelToken, TICK, Worker};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Fault-log query: recent error-priority lines only, bounded so the
/// response stays small.
const FATAL_LOG_QUERY: &str = "logcat -d -t 100 *:E";
/// Clears the fault-log buffer after a successful scan so the same lines
/// are not reported again on the next sweep.
const FATAL_LOG_CLEAR: &str = "logcat -c";
const CPU_QUERY: &str = "top -b -n 1";
const MEM_QUERY: &str = "cat /proc/meminfo";

/// Log lines matching any of these indicate the target application (or the
/// platform under it) died or wedged.
const FATAL_INDICATORS: &[&str] = &[
    "Fatal signal",
    "FATAL EXCEPTION",
    "ANR in",
    "Segmentation fault",
    "SIGABRT",
    "SIGBUS",
    "java.lang.RuntimeException",
    "java.lang.NullPointerException",
    "java.lang.IllegalStateException",
];

/// Chatty platform services that routinely log error-priority noise and
/// must not produce anomalies.
const NOISE_ALLOWLIST: &[&str] = &["chatty", "dex2oat", "WifiVendorHal", "lowmemorykiller"];

/// A diagnostic reading that did not have the expected shape. The sample is
/// skipped, never escalated.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("no '{0}' token in diagnostic output")]
    MissingField(&'static str),
    #[error("malformed numeric value '{0}'")]
    BadNumber(String),
}

/// First steady-state resource reading, the fixed reference for spike
/// detection. Set once by the first sweep in which both metrics parse and
/// never recalibrated afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub cpu: f32,
    pub ram: f32,
}

/// Does this fault-log line survive the curated signature filter?
pub fn is_fatal_line(line: &str) -> bool {
    if NOISE_ALLOWLIST.iter().any(|noise| line.contains(noise)) {
        return false;
    }
    FATAL_INDICATORS
        .iter()
        .any(|indicator| line.contains(indicator))
}

/// Parses aggregate CPU usage from an Android-style `top -b -n 1` dump.
///
/// The summary line reads like `800%cpu 42%user 0%nice 58%sys 698%idle ...`;
/// usage is `(total - idle) / total`, normalized to a 0-100 percentage.
pub fn parse_cpu_percent(output: &str) -> Result<f32, ParseError> {
    let mut total: Option<f32> = None;
    let mut idle: Option<f32> = None;
    for token in output.split_whitespace() {
        if let Some(value) = token.strip_suffix("%cpu") {
            total = Some(parse_number(value)?);
        } else if let Some(value) = token.strip_suffix("%idle") {
            idle = Some(parse_number(value)?);
        }
    }
    let total = total.ok_or(ParseError::MissingField("%cpu"))?;
    let idle = idle.ok_or(ParseError::MissingField("%idle"))?;
    if total <= 0.0 {
        return Err(ParseError::BadNumber(total.to_string()));
    }
    Ok(((total - idle).max(0.0) / total) * 100.0)
}

/// Parses used-memory percentage from `/proc/meminfo` (`MemTotal` and
/// `MemAvailable`, both in kB).
pub fn parse_mem_percent(output: &str) -> Result<f32, ParseError> {
    let mut total_kb: Option<f32> = None;
    let mut available_kb: Option<f32> = None;
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = Some(parse_meminfo_kb(rest)?);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = Some(parse_meminfo_kb(rest)?);
        }
    }
    let total = total_kb.ok_or(ParseError::MissingField("MemTotal"))?;
    let available = available_kb.ok_or(ParseError::MissingField("MemAvailable"))?;
    if total <= 0.0 {
        return Err(ParseError::BadNumber(total.to_string()));
    }
    Ok(((total - available).max(0.0) / total) * 100.0)
}

fn parse_number(s: &str) -> Result<f32, ParseError> {
    s.parse::<f32>()
        .map_err(|_| ParseError::BadNumber(s.to_string()))
}

fn parse_meminfo_kb(rest: &str) -> Result<f32, ParseError> {
    let value = rest
        .split_whitespace()
        .next()
        .ok_or(ParseError::MissingField("kB value"))?;
    parse_number(value)
}

/// The device health monitor: keeps a diagnostic channel to the target,
/// sweeps it on a fixed wall-clock interval for fatal log signatures and
/// resource spikes, and appends [`AnomalyRecord`]s.
///
/// Sole writer of the anomaly history. Owns the spike baseline.
///
/// The only unrecoverable failure in the whole pipeline is the initial
/// channel open — there is no retry path for a missing physical link.
/// Everything after that (channel errors, malformed output) skips the
/// affected sample and keeps the loop alive.
pub struct HealthMonitor {
    channel: Box<dyn DiagnosticChannel>,
    anomalies: History<AnomalyRecord>,
    sweep_interval: Duration,
    spike_threshold: f32,
    log_timeout: Duration,
    resource_timeout: Duration,
    baseline: Option<Baseline>,
    channel_open: bool,
}

impl HealthMonitor {
    pub fn new(
        channel: Box<dyn DiagnosticChannel>,
        anomalies: History<AnomalyRecord>,
        settings: &MonitorSettings,
    ) -> Self {
        Self {
            channel,
            anomalies,
            sweep_interval: settings.sweep_interval(),
            spike_threshold: settings.spike_threshold,
            log_timeout: settings.log_timeout(),
            resource_timeout: settings.resource_timeout(),
            baseline: None,
            channel_open: false,
        }
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// Opens the diagnostic channel. On failure the caller must treat the
    /// worker as dead; `shutdown` still releases whatever was acquired.
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        self.channel.open()?;
        self.channel_open = true;
        Ok(())
    }

    /// One diagnostic sweep: fatal-signature scan, then resource sampling.
    /// Channel errors are logged here and never propagate.
    pub fn sweep(&mut self) {
        if let Err(e) = self.detect_fatal_signatures() {
            warn!("health-monitor: fatal-signature scan skipped: {e}");
        }
        if let Err(e) = self.monitor_resources() {
            warn!("health-monitor: resource sample skipped: {e}");
        }
    }

    fn detect_fatal_signatures(&mut self) -> Result<(), ChannelError> {
        let output = self.channel.execute(FATAL_LOG_QUERY, self.log_timeout)?;
        for line in output.lines() {
            if is_fatal_line(line) {
                self.anomalies.push(AnomalyRecord {
                    timestamp: Utc::now(),
                    kind: AnomalyKind::FatalError,
                    description: line.trim().to_string(),
                });
            }
        }
        self.channel.execute(FATAL_LOG_CLEAR, self.log_timeout)?;
        Ok(())
    }

    fn monitor_resources(&mut self) -> Result<(), ChannelError> {
        let cpu_output = self.channel.execute(CPU_QUERY, self.resource_timeout)?;
        let mem_output = self.channel.execute(MEM_QUERY, self.resource_timeout)?;

        let cpu = match parse_cpu_percent(&cpu_output) {
            Ok(value) => value,
            Err(e) => {
                debug!("health-monitor: cpu sample discarded: {e}");
                return Ok(());
            }
        };
        let ram = match parse_mem_percent(&mem_output) {
            Ok(value) => value,
            Err(e) => {
                debug!("health-monitor: memory sample discarded: {e}");
                return Ok(());
            }
        };

        self.observe_sample(cpu, ram);
        Ok(())
    }

    /// Spike evaluation against the baseline, separated from channel I/O.
    fn observe_sample(&mut self, cpu: f32, ram: f32) {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(Baseline { cpu, ram });
            info!("health-monitor: baseline established (cpu {cpu:.1}%, ram {ram:.1}%)");
            return;
        };

        let cpu_limit = baseline.cpu * self.spike_threshold;
        let ram_limit = baseline.ram * self.spike_threshold;
        if cpu >= cpu_limit || ram >= ram_limit {
            self.anomalies.push(AnomalyRecord {
                timestamp: Utc::now(),
                kind: AnomalyKind::ResourcePressure,
                description: format!(
                    "cpu {cpu:.1}% (baseline {:.1}%), ram {ram:.1}% (baseline {:.1}%), threshold x{:.2}",
                    baseline.cpu, baseline.ram, self.spike_threshold
                ),
            });
        }
    }

    /// Closes the channel exactly once; a second call is a no-op.
    fn shutdown(&mut self) {
        if self.channel_open {
            self.channel_open = false;
            self.channel.close();
            info!("health-monitor: diagnostic channel closed");
        }
    }
}

impl Worker for HealthMonitor {
    fn name(&self) -> &'static str {
        "health-monitor"
    }

    fn run(&mut self, cancel: &CancelToken) {
        if let Err(e) = self.connect() {
            error!("health-monitor: failed to open diagnostic channel, worker terminating: {e}");
            // Release whatever the failed open may have acquired.
            self.channel.close();
            return;
        }

        // Sweeps are scheduled against elapsed wall-clock time, not tick
        // counts, so timer drift does not accumulate.
        let mut last_sweep: Option<Instant> = None;
        while !cancel.is_cancelled() {
            let due = last_sweep.is_none_or(|t| t.elapsed() >= self.sweep_interval);
            if due {
                self.sweep();
                last_sweep = Some(Instant::now());
            }
            thread::sleep(TICK);
        }

        self.shutdown();
    }
}

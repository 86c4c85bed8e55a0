use crate::frame::FrameTemplate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TransmitterSettings {
    /// Source MAC; omitted means a fresh random one per frame.
    #[serde(default)]
    pub src_mac: Option<String>,
    #[serde(default = "default_dst_mac")]
    pub dst_mac: String,
    #[serde(default = "default_src_ip")]
    pub src_ip: String,
    #[serde(default = "default_dst_ip")]
    pub dst_ip: String,
    #[serde(default = "default_src_port")]
    pub src_port: u16,
    #[serde(default = "default_dst_port")]
    pub dst_port: u16,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    #[serde(default = "default_use_tcp")]
    pub use_tcp: bool,
    #[serde(default = "default_tcp_flags")]
    pub tcp_flags: String,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
    /// Where the UDP link sender encapsulates frames to.
    #[serde(default = "default_collector_addr")]
    pub collector_addr: String,
}

fn default_dst_mac() -> String {
    "ff:ff:ff:ff:ff:ff".to_string()
}
fn default_src_ip() -> String {
    "192.168.1.100".to_string()
}
fn default_dst_ip() -> String {
    "192.168.1.1".to_string()
}
fn default_src_port() -> u16 {
    12345
}
fn default_dst_port() -> u16 {
    80
}
fn default_ttl() -> u8 {
    64
}
fn default_use_tcp() -> bool {
    true
}
fn default_tcp_flags() -> String {
    "S".to_string()
}
fn default_mutation_rate() -> f64 {
    0.01
}
fn default_interface() -> String {
    "eth0".to_string()
}
fn default_cycle_delay_ms() -> u64 {
    10
}
fn default_collector_addr() -> String {
    "127.0.0.1:9999".to_string()
}

impl Default for TransmitterSettings {
    fn default() -> Self {
        Self {
            src_mac: None,
            dst_mac: default_dst_mac(),
            src_ip: default_src_ip(),
            dst_ip: default_dst_ip(),
            src_port: default_src_port(),
            dst_port: default_dst_port(),
            ttl: default_ttl(),
            use_tcp: default_use_tcp(),
            tcp_flags: default_tcp_flags(),
            mutation_rate: default_mutation_rate(),
            interface: default_interface(),
            cycle_delay_ms: default_cycle_delay_ms(),
            collector_addr: default_collector_addr(),
        }
    }
}

impl TransmitterSettings {
    pub fn template(&self) -> FrameTemplate {
        FrameTemplate {
            src_mac: self.src_mac.clone(),
            dst_mac: self.dst_mac.clone(),
            src_ip: self.src_ip.clone(),
            dst_ip: self.dst_ip.clone(),
            src_port: self.src_port,
            dst_port: self.dst_port,
            ttl: self.ttl,
            use_tcp: self.use_tcp,
            tcp_flags: self.tcp_flags.clone(),
            payload: Vec::new(),
        }
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct MonitorSettings {
    /// Base invocation for the diagnostic bridge, e.g. `["adb", "shell"]`.
    #[serde(default = "default_base_command")]
    pub base_command: Vec<String>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f32,
    #[serde(default = "default_log_timeout_secs")]
    pub log_timeout_secs: u64,
    #[serde(default = "default_resource_timeout_secs")]
    pub resource_timeout_secs: u64,
}

fn default_base_command() -> Vec<String> {
    vec!["adb".to_string(), "shell".to_string()]
}
fn default_sweep_interval_secs() -> u64 {
    5
}
fn default_spike_threshold() -> f32 {
    1.2
}
fn default_log_timeout_secs() -> u64 {
    5
}
fn default_resource_timeout_secs() -> u64 {
    3
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            base_command: default_base_command(),
            sweep_interval_secs: default_sweep_interval_secs(),
            spike_threshold: default_spike_threshold(),
            log_timeout_secs: default_log_timeout_secs(),
            resource_timeout_secs: default_resource_timeout_secs(),
        }
    }
}

impl MonitorSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn log_timeout(&self) -> Duration {
        Duration::from_secs(self.log_timeout_secs)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CorrelatorSettings {
    /// Full width of the symmetric match window around an anomaly.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// How many of the newest packet records each pass scans.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_window_ms() -> u64 {
    2000
}
fn default_scan_limit() -> usize {
    100
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("./reports")
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            scan_limit: default_scan_limit(),
            report_dir: default_report_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HistorySettings {
    #[serde(default = "default_packet_capacity")]
    pub packet_capacity: usize,
    #[serde(default = "default_anomaly_capacity")]
    pub anomaly_capacity: usize,
}

fn default_packet_capacity() -> usize {
    1000
}
fn default_anomaly_capacity() -> usize {
    200
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            packet_capacity: default_packet_capacity(),
            anomaly_capacity: default_anomaly_capacity(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FrayConfig {
    #[serde(default)]
    pub transmitter: TransmitterSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub correlator: CorrelatorSettings,
    #[serde(default)]
    pub history: HistorySettings,
}

impl FrayConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: FrayConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

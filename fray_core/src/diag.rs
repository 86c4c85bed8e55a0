use log::{debug, warn};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors surfaced by the diagnostic channel.
///
/// Only a failure from [`DiagnosticChannel::open`] is fatal to the health
/// monitor; every steady-state error is logged and the sweep that hit it is
/// skipped.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A diagnostic command exceeded its bounded timeout.
    #[error("diagnostic command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Spawning, waiting on, or reading from the channel failed.
    #[error("diagnostic channel I/O error: {0}")]
    Io(String),

    /// The channel was used before `open()` or after `close()`.
    #[error("diagnostic channel is closed")]
    Closed,
}

/// A remote command interface for querying target device health.
///
/// Key provisioning and authentication happen before the channel is handed
/// to the pipeline; the core only opens, executes, and closes. Every
/// `execute` call carries an explicit timeout so no sweep can block the
/// monitor loop indefinitely.
pub trait DiagnosticChannel: Send {
    /// Opens the channel. A failure here has no recovery path (the physical
    /// link is missing) and terminates the health monitor.
    fn open(&mut self) -> Result<(), ChannelError>;

    /// Runs one diagnostic command and returns its textual output.
    /// Also serves as the raw passthrough for ad hoc commands from the
    /// presentation layer.
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<String, ChannelError>;

    /// Closes the channel. Must be idempotent.
    fn close(&mut self);
}

/// Timeout for the probe command issued by `open()`; generous because the
/// first exchange may include device authentication.
const OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// A [`DiagnosticChannel`] backed by a local bridge command, e.g.
/// `adb shell` — each diagnostic command is appended to the base invocation
/// and run as a subprocess whose lifetime is bounded by a polling timeout.
pub struct CommandChannel {
    /// Base invocation the diagnostic command is appended to.
    base: Vec<String>,
    open: bool,
}

impl CommandChannel {
    pub fn new(base: Vec<String>) -> Self {
        Self { base, open: false }
    }

    fn run_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ChannelError> {
        let mut cmd = Command::new(&self.base[0]);
        cmd.args(&self.base[1..])
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| {
            ChannelError::Io(format!("failed to spawn '{}': {e}", self.base[0]))
        })?;

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_status)) => break,
                Ok(None) => {
                    if start.elapsed() > timeout {
                        if let Err(e) = child.kill() {
                            warn!("failed to kill timed-out diagnostic command: {e}");
                        }
                        let _ = child.wait();
                        return Err(ChannelError::Timeout {
                            command: command.to_string(),
                            timeout,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    return Err(ChannelError::Io(format!(
                        "error waiting for diagnostic command: {e}"
                    )));
                }
            }
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_string(&mut output)
                .map_err(|e| ChannelError::Io(e.to_string()))?;
        }
        Ok(output)
    }
}

impl DiagnosticChannel for CommandChannel {
    fn open(&mut self) -> Result<(), ChannelError> {
        if self.base.is_empty() {
            return Err(ChannelError::Io("empty base command".to_string()));
        }
        // Probe the link; any round trip proves the bridge is reachable.
        self.run_with_timeout("echo ok", OPEN_TIMEOUT)?;
        self.open = true;
        Ok(())
    }

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<String, ChannelError> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        self.run_with_timeout(command, timeout)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            debug!("diagnostic channel closed");
        }
    }
}

/// Queries tried in order by [`device_ip`]; first non-empty answer wins.
const DEVICE_IP_QUERIES: &[&str] = &[
    "ip addr show wlan0 | grep 'inet ' | cut -d' ' -f6 | cut -d/ -f1",
    "ifconfig wlan0 | grep 'inet addr' | cut -d: -f2 | cut -d' ' -f1",
    "dumpsys connectivity | grep 'IPv4 address' | cut -d' ' -f3",
];

const DEVICE_IP_TIMEOUT: Duration = Duration::from_secs(5);

/// Looks up the target device's IP address over the diagnostic channel,
/// trying several commands in sequence. Returns the first non-empty
/// address, or `"unavailable"` when every query comes back empty or fails.
pub fn device_ip(channel: &mut dyn DiagnosticChannel) -> String {
    for query in DEVICE_IP_QUERIES {
        match channel.execute(query, DEVICE_IP_TIMEOUT) {
            Ok(output) => {
                let address = output.trim();
                if !address.is_empty() {
                    return address.to_string();
                }
            }
            Err(e) => debug!("device IP query failed: {e}"),
        }
    }
    "unavailable".to_string()
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// What a scripted command should answer with.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Output(String),
        Timeout,
        Io,
    }

    /// A scripted [`DiagnosticChannel`] for tests: commands are matched by
    /// substring against a reply table, and every interaction is recorded.
    #[derive(Default)]
    pub struct ScriptedChannel {
        /// `(substring, reply)` pairs; first match wins. Unmatched commands
        /// answer with empty output.
        pub replies: Vec<(String, Reply)>,
        pub executed: Vec<String>,
        pub fail_open: bool,
        pub open_calls: usize,
        pub close_calls: usize,
    }

    impl ScriptedChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(mut self, pattern: &str, reply: Reply) -> Self {
            self.replies.push((pattern.to_string(), reply));
            self
        }
    }

    impl DiagnosticChannel for ScriptedChannel {
        fn open(&mut self) -> Result<(), ChannelError> {
            self.open_calls += 1;
            if self.fail_open {
                Err(ChannelError::Io("no transport".to_string()))
            } else {
                Ok(())
            }
        }

        fn execute(
            &mut self,
            command: &str,
            timeout: Duration,
        ) -> Result<String, ChannelError> {
            self.executed.push(command.to_string());
            for (pattern, reply) in &self.replies {
                if command.contains(pattern.as_str()) {
                    return match reply {
                        Reply::Output(s) => Ok(s.clone()),
                        Reply::Timeout => Err(ChannelError::Timeout {
                            command: command.to_string(),
                            timeout,
                        }),
                        Reply::Io => Err(ChannelError::Io("scripted failure".to_string())),
                    };
                }
            }
            Ok(String::new())
        }

        fn close(&mut self) {
            self.close_calls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::{Reply, ScriptedChannel};
    use super::*;

    #[test]
    fn command_channel_rejects_use_before_open() {
        let mut channel = CommandChannel::new(vec!["sh".to_string(), "-c".to_string()]);
        match channel.execute("echo hi", Duration::from_secs(1)) {
            Err(ChannelError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn command_channel_executes_through_base_command() {
        let mut channel = CommandChannel::new(vec!["sh".to_string(), "-c".to_string()]);
        channel.open().expect("open via sh");
        let output = channel
            .execute("echo frame", Duration::from_secs(2))
            .expect("echo runs");
        assert_eq!(output.trim(), "frame");
    }

    #[test]
    fn command_channel_times_out_and_kills_the_child() {
        let mut channel = CommandChannel::new(vec!["sh".to_string(), "-c".to_string()]);
        channel.open().expect("open via sh");
        let start = Instant::now();
        match channel.execute("sleep 5", Duration::from_millis(200)) {
            Err(ChannelError::Timeout { command, .. }) => assert_eq!(command, "sleep 5"),
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn command_channel_open_fails_for_missing_bridge() {
        let mut channel =
            CommandChannel::new(vec!["./no_such_bridge_binary_12345".to_string()]);
        match channel.open() {
            Err(ChannelError::Io(msg)) => assert!(msg.contains("failed to spawn")),
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn close_is_idempotent() {
        let mut channel = CommandChannel::new(vec!["sh".to_string(), "-c".to_string()]);
        channel.open().expect("open via sh");
        channel.close();
        channel.close();
        match channel.execute("echo hi", Duration::from_secs(1)) {
            Err(ChannelError::Closed) => {}
            other => panic!("expected Closed after close, got {other:?}"),
        }
    }

    #[test]
    fn device_ip_returns_first_non_empty_answer() {
        let mut channel = ScriptedChannel::new()
            .reply("ip addr show wlan0", Reply::Output("\n".to_string()))
            .reply("ifconfig wlan0", Reply::Output("192.168.1.42\n".to_string()));
        assert_eq!(device_ip(&mut channel), "192.168.1.42");
        assert_eq!(channel.executed.len(), 2, "stops at the first hit");
    }

    #[test]
    fn device_ip_reports_unavailable_when_every_query_fails() {
        let mut channel = ScriptedChannel::new()
            .reply("ip addr show wlan0", Reply::Io)
            .reply("ifconfig wlan0", Reply::Timeout)
            .reply("dumpsys connectivity", Reply::Output(String::new()));
        assert_eq!(device_ip(&mut channel), "unavailable");
        assert_eq!(channel.executed.len(), 3);
    }
}

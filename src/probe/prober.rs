//! Latency measurement capability and the system `ping` implementation.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::servers::Latency;

/// Measures round-trip time to one address.
///
/// Implementations must give up on their own after roughly `timeout`;
/// the scheduler only adds a safety margin on top.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> Latency;
}

/// Runs the platform `ping` for a single echo request.
#[derive(Debug, Clone)]
pub struct PingProber {
    command: String,
}

impl PingProber {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str, timeout: Duration) -> Latency {
        let mut child = match Command::new(&self.command)
            .args(ping_arguments(address))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to start {} for {}: {}", self.command, address, e);
                return Latency::Failed;
            }
        };

        let mut output = Vec::new();
        let timed_out = match child.stdout.take() {
            Some(mut stdout) => tokio::time::timeout(timeout, stdout.read_to_end(&mut output))
                .await
                .is_err(),
            None => false,
        };

        if timed_out {
            log::debug!("Ping to {} timed out, terminating", address);
            if let Err(e) = child.start_kill() {
                log::debug!("Failed to kill ping for {}: {}", address, e);
            }
        }
        if let Err(e) = child.wait().await {
            log::debug!("Failed to reap ping for {}: {}", address, e);
        }

        // Partial output after a timeout may still carry a summary line.
        match parse_ping_output(&String::from_utf8_lossy(&output)) {
            Some(ms) => Latency::Measured(ms),
            None => Latency::Failed,
        }
    }
}

/// One packet with a short deadline.
pub fn ping_arguments(address: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if cfg!(windows) {
        args.extend(["-n", "1", "-w", "1200"].iter().map(|s| s.to_string()));
    } else {
        args.extend(["-c", "1"].iter().map(|s| s.to_string()));
        if cfg!(target_os = "linux") {
            args.extend(["-w", "1"].iter().map(|s| s.to_string()));
        }
        if cfg!(target_os = "macos") {
            args.extend(["-t", "1"].iter().map(|s| s.to_string()));
        }
    }
    args.push(address.to_string());
    args
}

/// Average round trip in whole milliseconds from the summary line, the
/// last non-empty line of the output.
///
/// Understands the Unix `rtt min/avg/max/mdev = 1.1/2.2/3.3/0.4 ms` form
/// and the Windows `Minimum = 1ms, Maximum = 2ms, Average = 1ms` form.
pub fn parse_ping_output(output: &str) -> Option<u32> {
    let last = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;

    if last.contains("min/avg/max") {
        let values = last.split('=').nth(1)?.trim();
        let avg = values.split('/').nth(1)?.trim();
        let ms: f64 = avg.parse().ok()?;
        return (ms >= 0.0).then(|| ms as u32);
    }

    if let Some(pos) = last.find("Average =") {
        let value = last[pos + "Average =".len()..].trim();
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        return digits.parse().ok();
    }

    None
}

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ping to {host} failed: {reason}")]
    Unreachable { host: String, reason: String },
    #[error("could not parse ping output: {0}")]
    Malformed(String),
    #[error("ping did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("failed to spawn ping: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One round-trip measurement against the configured target, in
/// milliseconds. Implementations must be bounded in time.
pub trait Prober {
    fn probe(&self) -> impl Future<Output = Result<f64, ProbeError>>;
}

/// Prober backed by the system `ping` binary. The binary bounds each request
/// with its own timeout; an outer deadline guards against a hung process.
pub struct PingProber {
    host: String,
    count: u32,
    timeout: Duration,
}

impl PingProber {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            host: config.host.clone(),
            count: config.probe.count,
            timeout: config.probe.timeout,
        }
    }

    fn deadline(&self) -> Duration {
        self.timeout * self.count + Duration::from_secs(5)
    }
}

impl Prober for PingProber {
    async fn probe(&self) -> Result<f64, ProbeError> {
        let output = Command::new("ping")
            .arg("-n")
            .arg("-q")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(self.timeout.as_secs().max(1).to_string())
            .arg(&self.host)
            .stdin(Stdio::null())
            .output();

        let output = tokio::time::timeout(self.deadline(), output)
            .await
            .map_err(|_| ProbeError::TimedOut(self.deadline()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Unreachable {
                host: self.host.clone(),
                reason: if stderr.trim().is_empty() {
                    format!("exit status {}", output.status)
                } else {
                    stderr.trim().to_string()
                },
            });
        }

        parse_avg_rtt(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Pull the average out of the iputils/busybox summary line, e.g.
/// `rtt min/avg/max/mdev = 20.392/20.502/20.611/0.109 ms`.
fn parse_avg_rtt(stdout: &str) -> Result<f64, ProbeError> {
    let summary = stdout
        .lines()
        .find(|line| line.contains("min/avg/max"))
        .ok_or_else(|| ProbeError::Malformed("no rtt summary line".into()))?;

    let values = summary
        .split('=')
        .nth(1)
        .ok_or_else(|| ProbeError::Malformed(summary.to_string()))?;

    values
        .trim()
        .trim_end_matches("ms")
        .trim()
        .split('/')
        .nth(1)
        .and_then(|avg| avg.trim().parse::<f64>().ok())
        .ok_or_else(|| ProbeError::Malformed(summary.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iputils_summary() {
        let stdout = "\
PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.

--- 8.8.8.8 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 20.392/20.502/20.611/0.109 ms
";
        let avg = parse_avg_rtt(stdout).expect("avg");
        assert!((avg - 20.502).abs() < 1e-9);
    }

    #[test]
    fn parses_busybox_summary() {
        let stdout = "\
--- 8.8.8.8 ping statistics ---
4 packets transmitted, 4 packets received, 0% packet loss
round-trip min/avg/max = 19.1/21.5/25.0 ms
";
        let avg = parse_avg_rtt(stdout).expect("avg");
        assert!((avg - 21.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_output_without_summary() {
        let err = parse_avg_rtt("request timed out").unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }
}

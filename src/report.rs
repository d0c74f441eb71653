use crate::config::{BenchmarkSetup, Transmission};
use crate::statistics::StatisticsSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Where and when a benchmark ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub version: String,
    pub system_info: String,
    pub timestamp: i64,
    pub timestamp_str: String,
}

impl RunInfo {
    pub fn current() -> Self {
        let now = chrono::Utc::now();
        Self {
            version: format!("netbench {}", env!("CARGO_PKG_VERSION")),
            system_info: format!(
                "{} {} {}",
                std::env::consts::OS,
                std::env::consts::ARCH,
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            timestamp: now.timestamp(),
            timestamp_str: now.to_rfc2822(),
        }
    }
}

/// Results of one benchmark run.
///
/// Everything except the raw counters is derived from the final statistics
/// snapshot. Throughput and latency are based on the messages the clients
/// received, i.e. on completed round trips.
///
/// # Examples
///
/// ```
/// use netbench::{BenchmarkReport, BenchmarkSetup, StatisticsSnapshot};
/// use std::time::Duration;
///
/// let setup = BenchmarkSetup::new().with_clients(1).with_message_size(100);
/// let snapshot = StatisticsSnapshot {
///     messages_client_sent: 1_001,
///     messages_client_received: 1_000,
///     messages_server_sent: 1_000,
///     messages_server_received: 1_001,
///     errors: 0,
///     duration: Duration::from_secs(2),
/// };
///
/// let report = BenchmarkReport::new("tcp", &setup, 1, snapshot);
/// assert_eq!(report.total_bytes, 100_000);
/// assert_eq!(report.message_throughput, 500.0);
/// assert_eq!(report.mean_latency, Some(Duration::from_millis(2)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub transport: String,
    pub transmission: Transmission,
    pub clients_requested: usize,
    pub clients_connected: usize,
    pub parallel_messages: usize,
    pub message_size: usize,
    pub errors: u64,
    pub duration: Duration,
    pub messages_client_sent: u64,
    pub messages_server_received: u64,
    pub messages_server_sent: u64,
    pub messages_client_received: u64,
    /// Bytes echoed back to the clients
    pub total_bytes: u64,
    /// Bytes per second
    pub data_throughput: f64,
    /// Messages per second
    pub message_throughput: f64,
    /// Run duration divided by received messages
    pub mean_latency: Option<Duration>,
    pub run_info: RunInfo,
}

impl BenchmarkReport {
    pub fn new(
        transport: &str,
        setup: &BenchmarkSetup,
        clients_connected: usize,
        snapshot: StatisticsSnapshot,
    ) -> Self {
        let received = snapshot.messages_client_received;
        let seconds = snapshot.duration.as_secs_f64();
        let total_bytes = received.saturating_mul(setup.message_size as u64);

        let per_second = |value: f64| if seconds > 0.0 { value / seconds } else { 0.0 };

        let mean_latency = if received > 0 {
            let nanos = snapshot.duration.as_nanos() / u128::from(received);
            Some(Duration::from_nanos(nanos as u64))
        } else {
            None
        };

        Self {
            transport: transport.to_string(),
            transmission: setup.transmission,
            clients_requested: setup.clients,
            clients_connected,
            parallel_messages: setup.parallel_messages,
            message_size: setup.message_size,
            errors: snapshot.errors,
            duration: snapshot.duration,
            messages_client_sent: snapshot.messages_client_sent,
            messages_server_received: snapshot.messages_server_received,
            messages_server_sent: snapshot.messages_server_sent,
            messages_client_received: received,
            total_bytes,
            data_throughput: per_second(total_bytes as f64),
            message_throughput: per_second(received as f64),
            mean_latency,
            run_info: RunInfo::current(),
        }
    }

    pub fn total_megabytes(&self) -> f64 {
        self.total_bytes as f64 / MEGABYTE
    }

    pub fn megabytes_per_second(&self) -> f64 {
        self.data_throughput / MEGABYTE
    }

    /// Clients that were requested but never took part
    pub fn missing_clients(&self) -> usize {
        self.clients_requested.saturating_sub(self.clients_connected)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

//! Client configuration
//!
//! [`ClientConfig`] is what the library consumes. [`ClientArgs`] reads the same
//! settings from CLI arguments and environment variables using clap.

use clap::Parser;
use std::time::Duration;

/// Runtime settings for a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Number of persistent streams the transmitter opens
    pub parallelisation: usize,
    /// Deadline for unary requests, including connection validation
    pub request_timeout: Duration,
    /// Deadline for transaction open, commit, rollback and close
    pub transaction_timeout: Duration,
    /// How long close waits for the channel to shut down gracefully
    pub shutdown_timeout: Duration,
    /// Interval between session keep-alive pulses
    pub session_pulse_interval: Duration,
    /// Rounds of replica polling while looking for a primary
    pub primary_discovery_attempts: usize,
    pub primary_discovery_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            parallelisation: calculate_parallelisation(),
            request_timeout: Duration::from_secs(30),
            transaction_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            session_pulse_interval: Duration::from_secs(5),
            primary_discovery_attempts: 10,
            primary_discovery_backoff: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub fn with_parallelisation(mut self, parallelisation: usize) -> Self {
        self.parallelisation = parallelisation;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn with_session_pulse_interval(mut self, interval: Duration) -> Self {
        self.session_pulse_interval = interval;
        self
    }

    pub fn with_primary_discovery(mut self, attempts: usize, backoff: Duration) -> Self {
        self.primary_discovery_attempts = attempts;
        self.primary_discovery_backoff = backoff;
        self
    }
}

/// Stream count for this machine.
///
/// Each stream buffers independently and costs the server its own resources,
/// so the count grows slowly with the number of cores.
pub fn calculate_parallelisation() -> usize {
    parallelisation_for(num_cpus::get())
}

fn parallelisation_for(cores: usize) -> usize {
    match cores {
        0..=4 => 2,
        5..=9 => 3,
        10..=16 => 4,
        _ => cores.div_ceil(4),
    }
}

/// TypeDB client settings
#[derive(Parser, Debug, Clone)]
#[command(name = "typedb-probe")]
#[command(about = "Connect to a TypeDB server or cluster and report its databases")]
pub struct ClientArgs {
    /// Server addresses; more than one selects the cluster client
    #[arg(
        long,
        env = "TYPEDB_ADDRESSES",
        value_delimiter = ',',
        default_value = "localhost:1729"
    )]
    pub addresses: Vec<String>,

    /// Number of transmitter streams (defaults to a value derived from CPU count)
    #[arg(long, env = "TYPEDB_PARALLELISATION")]
    pub parallelisation: Option<usize>,

    /// Request timeout in milliseconds
    #[arg(long, env = "TYPEDB_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Graceful shutdown timeout in milliseconds
    #[arg(long, env = "TYPEDB_SHUTDOWN_TIMEOUT_MS", default_value = "10000")]
    pub shutdown_timeout_ms: u64,

    /// Session keep-alive interval in milliseconds
    #[arg(long, env = "TYPEDB_SESSION_PULSE_MS", default_value = "5000")]
    pub session_pulse_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ClientArgs {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.addresses.iter().all(|a| a.trim().is_empty()) {
            return Err("TYPEDB_ADDRESSES must name at least one server".to_string());
        }

        if self.parallelisation == Some(0) {
            return Err("TYPEDB_PARALLELISATION must be at least 1".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("TYPEDB_REQUEST_TIMEOUT_MS must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Addresses with blanks and surrounding whitespace removed
    pub fn addresses(&self) -> Vec<String> {
        self.addresses
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect()
    }

    pub fn is_cluster(&self) -> bool {
        self.addresses().len() > 1
    }

    pub fn client_config(&self) -> ClientConfig {
        let request_timeout = Duration::from_millis(self.request_timeout_ms);
        ClientConfig {
            parallelisation: self.parallelisation.unwrap_or_else(calculate_parallelisation),
            request_timeout,
            transaction_timeout: request_timeout,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            session_pulse_interval: Duration::from_millis(self.session_pulse_ms),
            ..ClientConfig::default()
        }
    }
}

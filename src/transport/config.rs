//! Transport configuration.

use std::time::Duration;

use crate::core::{
    TransportError, DEFAULT_ACK_DELAY_MAX_MS, DEFAULT_ACK_DELAY_MIN_MS, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_HANDSHAKE_RESEND, DEFAULT_HANDSHAKE_RETRIES, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_PENDING_BYTES, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RTO_MS, DEFAULT_MIN_RTO_MS,
    DEFAULT_NONCE_SEARCH_WINDOW, DEFAULT_TICK_HZ, MAX_DATAGRAM,
};

/// Tunable options for a [`Transport`](crate::transport::Transport).
///
/// Start from `TransportConfig::default()` and override with the consuming
/// setters:
///
/// ```
/// use std::time::Duration;
/// use squall::transport::TransportConfig;
///
/// let config = TransportConfig::default()
///     .idle_timeout(Duration::from_secs(10))
///     .tick_hz(20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maintenance tick rate in Hz.
    pub tick_hz: u32,
    /// Reap a connection after this long without inbound datagrams.
    pub idle_timeout: Duration,
    /// Retransmission attempts per frame before the connection is dropped.
    pub max_retries: u32,
    /// Lower RTO clamp, milliseconds.
    pub min_rto_ms: f32,
    /// Upper RTO clamp, milliseconds.
    pub max_rto_ms: f32,
    /// Lower bound of the delayed-ACK interval, milliseconds.
    pub ack_delay_min_ms: f32,
    /// Upper bound of the delayed-ACK interval, milliseconds.
    pub ack_delay_max_ms: f32,
    /// Maximum datagram size on the wire (before encryption overhead).
    pub max_datagram: usize,
    /// Byte bound on payloads queued before the handshake completes.
    pub max_pending_bytes: usize,
    /// Forward search window for out-of-order receive nonces.
    pub nonce_search_window: u64,
    /// Re-send the handshake key at this interval while unanswered.
    pub handshake_resend: Duration,
    /// Handshake re-sends before tearing the connection down.
    pub handshake_retries: u32,
    /// zstd level for body compression.
    pub compression_level: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_rto_ms: DEFAULT_MIN_RTO_MS,
            max_rto_ms: DEFAULT_MAX_RTO_MS,
            ack_delay_min_ms: DEFAULT_ACK_DELAY_MIN_MS,
            ack_delay_max_ms: DEFAULT_ACK_DELAY_MAX_MS,
            max_datagram: MAX_DATAGRAM,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            nonce_search_window: DEFAULT_NONCE_SEARCH_WINDOW,
            handshake_resend: DEFAULT_HANDSHAKE_RESEND,
            handshake_retries: DEFAULT_HANDSHAKE_RETRIES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl TransportConfig {
    /// Set the maintenance tick rate.
    pub fn tick_hz(mut self, hz: u32) -> Self {
        self.tick_hz = hz;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the per-frame retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the RTO clamp in milliseconds.
    pub fn rto_bounds_ms(mut self, min: f32, max: f32) -> Self {
        self.min_rto_ms = min;
        self.max_rto_ms = max;
        self
    }

    /// Set the pre-handshake queue byte bound.
    pub fn max_pending_bytes(mut self, bytes: usize) -> Self {
        self.max_pending_bytes = bytes;
        self
    }

    /// Set the receive-nonce search window.
    pub fn nonce_search_window(mut self, window: u64) -> Self {
        self.nonce_search_window = window;
        self
    }

    /// Check the configuration for nonsense values.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.tick_hz == 0 || self.tick_hz > 1000 {
            return Err(TransportError::Config(format!(
                "tick_hz must be in 1..=1000, got {}",
                self.tick_hz
            )));
        }
        if self.min_rto_ms <= 0.0 || self.max_rto_ms < self.min_rto_ms {
            return Err(TransportError::Config(format!(
                "rto bounds invalid: [{}, {}]",
                self.min_rto_ms, self.max_rto_ms
            )));
        }
        if self.ack_delay_max_ms < self.ack_delay_min_ms {
            return Err(TransportError::Config(format!(
                "ack delay bounds invalid: [{}, {}]",
                self.ack_delay_min_ms, self.ack_delay_max_ms
            )));
        }
        if self.nonce_search_window == 0 {
            return Err(TransportError::Config(
                "nonce_search_window must be at least 1".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(TransportError::Config("max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(TransportConfig::default().tick_hz(0).validate().is_err());
        assert!(TransportConfig::default()
            .rto_bounds_ms(100.0, 50.0)
            .validate()
            .is_err());
        assert!(TransportConfig::default()
            .nonce_search_window(0)
            .validate()
            .is_err());
    }
}

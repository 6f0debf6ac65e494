//! RTT estimation and retransmission timeout, RFC 6298 style.

use crate::core::{
    INITIAL_RTO_MS, INITIAL_RTT_MS, INITIAL_RTT_VAR_MS, RTO_K, RTT_ALPHA, RTT_BETA,
};

/// Smoothed RTT / RTO estimator over f32 milliseconds.
///
/// Samples are only fed from first-transmission ACKs (Karn's rule); the RTO
/// doubles on every retransmission and is re-derived from SRTT on the next
/// clean sample. The RTO is clamped to the configured bounds at all times.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt_ms: f32,
    rttvar_ms: f32,
    rto_ms: f32,
    first_sample: bool,
    min_rto_ms: f32,
    max_rto_ms: f32,
}

impl RttEstimator {
    /// Create an estimator with the protocol's initial guesses and the
    /// given RTO clamp.
    pub fn new(min_rto_ms: f32, max_rto_ms: f32) -> Self {
        Self {
            srtt_ms: INITIAL_RTT_MS,
            rttvar_ms: INITIAL_RTT_VAR_MS,
            rto_ms: INITIAL_RTO_MS.clamp(min_rto_ms, max_rto_ms),
            first_sample: true,
            min_rto_ms,
            max_rto_ms,
        }
    }

    /// Fold in one RTT sample and re-derive the RTO.
    pub fn on_sample(&mut self, sample_ms: f32) {
        if self.first_sample {
            self.srtt_ms = sample_ms;
            self.rttvar_ms = sample_ms / 2.0;
            self.first_sample = false;
        } else {
            let delta = sample_ms - self.srtt_ms;
            self.srtt_ms += RTT_ALPHA * delta;
            self.rttvar_ms += RTT_BETA * (delta.abs() - self.rttvar_ms);
        }
        self.rto_ms =
            (self.srtt_ms + RTO_K * self.rttvar_ms).clamp(self.min_rto_ms, self.max_rto_ms);
    }

    /// Double the RTO after a retransmission, staying within the clamp.
    pub fn backoff(&mut self) {
        self.rto_ms = (self.rto_ms * 2.0).clamp(self.min_rto_ms, self.max_rto_ms);
    }

    /// Current smoothed RTT.
    pub fn srtt_ms(&self) -> f32 {
        self.srtt_ms
    }

    /// Current RTT variance.
    pub fn rttvar_ms(&self) -> f32 {
        self.rttvar_ms
    }

    /// Current retransmission timeout.
    pub fn rto_ms(&self) -> f32 {
        self.rto_ms
    }

    /// Whether at least one sample has been folded in.
    pub fn has_sample(&self) -> bool {
        !self.first_sample
    }

    /// The delayed-ACK interval: a quarter of SRTT, clamped to the
    /// configured bounds.
    pub fn ack_delay_ms(&self, min_ms: f32, max_ms: f32) -> f32 {
        (self.srtt_ms / 4.0).clamp(min_ms, max_ms)
    }
}

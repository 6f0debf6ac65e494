//! Reliability layer: send/receive windows, RTT/RTO estimation,
//! retransmission, duplicate suppression, and ACK scheduling.
//!
//! The engine guarantees arrival and at-most-once delivery of reliable
//! payloads; it does not order them. Sequence numbers are 16-bit and wrap;
//! all comparisons are wrap-aware.

mod engine;
mod rtt;
mod state;

pub use engine::{
    collect_retransmits, is_timed_out, prepare_outgoing, process_incoming, sequence_more_recent,
    should_send_ack,
};
pub use rtt::RttEstimator;
pub use state::{Delivery, InFlightPacket, ReliabilityState};

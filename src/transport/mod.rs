//! Transport layer: configuration, the connection manager, the I/O pump,
//! and the application-facing [`Transport`] handle.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             Application                  │
//! ├──────────────────────────────────────────┤
//! │   Transport (pump tasks + events)        │  ← this module
//! │   ConnectionTable (endpoint demux)       │
//! ├──────────────────────────────────────────┤
//! │   Connection (per-peer pipeline)         │
//! ├──────────────────────────────────────────┤
//! │   reliability / crypto / compress / wire │
//! ├──────────────────────────────────────────┤
//! │                 UDP                      │
//! └──────────────────────────────────────────┘
//! ```

mod config;
mod events;
mod manager;
mod pump;

pub use config::TransportConfig;
pub use events::TransportEvent;
pub use pump::{EventReceiver, Transport};

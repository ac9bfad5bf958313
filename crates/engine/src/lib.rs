//! Shotcheck Engine
//!
//! Status aggregation for visual regression reports. Screenshots for named
//! UI states ("breakpoints") arrive as reference/test pairs; each complete
//! pair is compared once, classified, and rolled up into result groups.
//!
//! # Architecture
//!
//! ```text
//! transport events ──► Engine ──► DiffRequestor ──► Comparator
//!   (image / error)      │                              │
//!                        │◄──────── DiffOutcome ◄───────┘
//!                        ▼
//!                   classify ──► Aggregator ──► StateChange broadcast
//! ```
//!
//! The pixel comparison ([`Comparator`]) and the event channel
//! ([`Transport`]) are collaborators; [`Session`] drives one engine on a
//! single task.

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod requestor;
pub mod session;
pub mod transport;
pub mod types;

pub use aggregator::{derive_group_verdict, Aggregator};
pub use classifier::{classify, format_mismatch};
pub use config::{EngineConfig, ImageLayout};
pub use engine::{Engine, EngineEvent};
pub use error::{ComparisonFailure, Error, Result};
pub use requestor::{Comparator, DiffOutcome, DiffRequest, DiffRequestor, PendingDiff, RequestOutcome};
pub use session::{Session, SessionHandle};
pub use transport::{ChannelTransport, Transport, TransportEvent, TransportPublisher};
pub use types::*;

/// Shotcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Topic the report channel listens on by default
pub const DEFAULT_TOPIC: &str = "screenshots:test";

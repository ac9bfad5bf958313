//! Shotcheck Web
//!
//! Network front end for a report session: the channel WebSocket screenshot
//! producers publish into, the report API, and static screenshot serving.

pub mod channel;
pub mod config;
pub mod server;

pub use channel::{ChannelBridge, InboundMessage, JoinReply, OutboundMessage};
pub use config::ServerConfig;
pub use server::{ApiError, ReportServer};

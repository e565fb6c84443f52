//! # Mesh Protocol
//!
//! Lightweight mesh-overlay networking: independent nodes exchange a
//! compact binary packet format over arbitrary duplex transports and
//! cooperatively build routing and service-discovery tables from flooded
//! control messages.
//!
//! ## Architecture
//! - [`core`]: wire format - SLIP-style framing, the optional-field packet
//!   codec with a Hamming-protected control word and trailing CRC-32, and
//!   the incremental stream parser
//! - [`router`]: the per-node engine - channel pool, flooded
//!   distance-vector route/service propagation, anycast service dispatch,
//!   and request/response context correlation
//! - [`transport`]: the [`Channel`](transport::Channel) capability that
//!   concrete transports implement, plus an in-process pair for tests and
//!   development
//! - [`config`], [`error`], [`utils`]: configuration, the error taxonomy,
//!   and metrics
//!
//! ## Example
//! ```no_run
//! use mesh_protocol::{LocalChannel, Packet, Router};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mesh_protocol::Result<()> {
//! let alpha = Router::new("alpha");
//! let beta = Router::new("beta");
//! alpha.start()?;
//! beta.start()?;
//!
//! beta.register_service("ping", |packet| {
//!     println!("ping from {}", packet.src_addr);
//! });
//!
//! let (a_end, b_end) = LocalChannel::pair();
//! alpha.add_channel(a_end)?;
//! beta.add_channel(b_end)?;
//!
//! alpha.send(Packet {
//!     service: "ping".into(),
//!     data: b"hello".to_vec(),
//!     ..Default::default()
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees and non-goals
//! Delivery is best-effort: there is no retransmission, no authentication
//! or encryption of the wire format, and single-bit header correction only.
//! Corrupted frames are dropped silently and counted.

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod error;
pub mod router;
pub mod transport;
pub mod utils;

pub use crate::config::RouterConfig;
pub use crate::core::packet::{Address, NetState, Packet};
pub use crate::core::parser::Parser;
pub use crate::error::{MeshError, Result};
pub use crate::router::Router;
pub use crate::transport::local::LocalChannel;
pub use crate::transport::{Channel, ChannelId};

//! # Meshbus
//!
//! A federated publish/subscribe endpoint mesh with credit-based flow
//! control.
//!
//! ## Architecture
//!
//! Meshbus is structured as a **routing kernel** with clean layering:
//!
//! - **`meshbus-core`**: the stream governor, peering state machine, and
//!   credit accounting — pure state machines, runtime-agnostic
//! - **`meshbus-wire`**: byte-level frame codec and the metadata replay
//!   file
//! - **`meshbus`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbus::{CoreConfig, Endpoint, MessageQueue};
//! use meshbus_core::filter::filter_of;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Two endpoints in one process, wired directly.
//! let left = Endpoint::spawn(CoreConfig::new());
//! let right = Endpoint::spawn(CoreConfig::new());
//!
//! right.subscribe(filter_of(["game/moves"])).await?;
//! let mut queue = MessageQueue::attach(&right).await?;
//!
//! left.peer_with(right.handle()).await?;
//! left.publish("game/moves", "e2e4")?;
//!
//! if let Some(msg) = queue.recv().await {
//!     println!("received on {}", msg.topic);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Flow control
//!
//! Every downstream consumer — local queues and remote peers alike —
//! grants credit for the messages it is willing to take; the governor
//! never buffers more than the slowest consumer's window plus a small
//! configurable slack. Attach a [`Publisher`] instead of using
//! [`Endpoint::publish`] to feel that backpressure at the producer.

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow some pedantic patterns
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::future_not_send)] // Runtime-agnostic design
#![allow(clippy::missing_errors_doc)]

mod endpoint;
mod publisher;
mod queue;

/// Development helpers (benches/tests)
pub mod dev_tracing;

pub use endpoint::Endpoint;
pub use publisher::Publisher;
pub use queue::{MessageQueue, StoreFeed, DEFAULT_QUEUE_CREDIT};

// Re-export core types that appear in the public API.
pub use meshbus_core::config::CoreConfig;
pub use meshbus_core::data::Data;
pub use meshbus_core::error::CoreError;
pub use meshbus_core::filter::Filter;
pub use meshbus_core::ids::NodeId;
pub use meshbus_core::message::{Command, DataMessage, Payload};
pub use meshbus_core::network::{AddressBook, NetworkAddress};
pub use meshbus_core::peer::{PeerInfo, PeerStatus};
pub use meshbus_core::topic::Topic;
pub use meshbus_wire::{MetaFileReader, MetaFileWriter};

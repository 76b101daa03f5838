//! Meshbus Core
//!
//! This crate contains the runtime-agnostic routing kernel:
//! - Topics, filters, and the data model (`topic`, `filter`, `data`)
//! - Routed messages and batches (`message`)
//! - Credit accounting for producers and consumers (`path`, `lane`)
//! - The stream governor and peering state machine (`governor`, `peer`)
//! - The core task and its mailbox (`actor`, `mailbox`)
//! - Network cache and status notification (`network`, `status`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod actor;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod governor;
pub mod ids;
pub mod lane;
pub mod mailbox;
pub mod message;
pub mod network;
pub mod path;
pub mod peer;
pub mod protocol;
pub mod status;
pub mod topic;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::actor::Core;
    pub use crate::config::CoreConfig;
    pub use crate::data::{Data, DataKind, Port, PortProto, Set, Subnet, Table, Timespan, Timestamp, Vector};
    pub use crate::error::CoreError;
    pub use crate::filter::{filter_of, Filter};
    pub use crate::governor::{GovernorEvent, StreamGovernor};
    pub use crate::ids::{NodeId, SinkId, StreamId};
    pub use crate::mailbox::{reply_channel, CoreMsg, PeerHandle, UnpeerTarget};
    pub use crate::message::{Batch, Command, DataMessage, Payload};
    pub use crate::network::{AddressBook, NetworkAddress};
    pub use crate::peer::{PeerInfo, PeerStatus};
    pub use crate::protocol::{CloseReason, Frame};
    pub use crate::status::{CoreObserver, Event, StatusCode};
    pub use crate::topic::Topic;
}

//! Meshbus Wire
//!
//! Byte-level encoding for the peering protocol (`codec`) and the
//! metadata replay file (`recorder`). The routing kernel never touches
//! bytes itself; everything here sits at the transport boundary.

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod recorder;

pub use codec::{decode_frame, encode_frame, frame_to_bytes, WireError};
pub use recorder::{MetaFileReader, MetaFileWriter, MAGIC, VERSION};

//! Small shared utilities: UUIDs and timestamps.

mod timestamps;
mod uuid_utils;

pub use timestamps::{iso_timestamp, now, Timestamp};
pub use uuid_utils::generate_uuid;

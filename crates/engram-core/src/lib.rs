//! Engram Core Library
//!
//! Fundamental types, traits, and error handling for the engram
//! tiered memory engine.
//!
//! # Modules
//!
//! - `record` - Memory record model and validation
//! - `id` - Tier-tagged record identifiers
//! - `value` - Typed values and metadata maps
//! - `timestamp` - UTC timestamp wrapper
//! - `error` - Error types and result alias

pub mod error;
pub mod id;
pub mod record;
pub mod timestamp;
pub mod value;

pub use error::{Error, Result};
pub use id::{RecordId, Tier};
pub use record::{clamp_unit, meta, MemoryRecord, MemoryRecordBuilder, MemoryType, Priority};
pub use timestamp::Timestamp;
pub use value::{Metadata, Value};

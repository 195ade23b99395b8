//! Codec module - serialization for frame text.
//!
//! The session layer speaks one JSON document per text message, so there is a
//! single codec:
//!
//! - [`JsonCodec`] - `serde_json` text encoding/decoding
//!
//! # Design
//!
//! The codec is a marker struct with static methods rather than a trait
//! object; there is nothing to select at runtime.
//!
//! # Example
//!
//! ```
//! use rpc_session::codec::JsonCodec;
//!
//! let encoded = JsonCodec::encode(&"hello").unwrap();
//! assert_eq!(encoded, "\"hello\"");
//! let decoded: String = JsonCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;

pub use json::JsonCodec;

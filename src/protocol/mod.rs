//! Protocol module - JSON frame shapes and inbound classification.
//!
//! This module implements the text protocol spoken with the backend:
//! - Outbound request and notification frames
//! - Inbound reply/event classification
//! - The error object carried by failed replies

mod frame;
mod wire_format;

pub use frame::{Event, Frame};
pub use wire_format::{Notification, Request, RpcErrorObject};

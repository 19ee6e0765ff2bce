//! API request handlers.

pub mod info;
pub mod messages;
pub mod peers;

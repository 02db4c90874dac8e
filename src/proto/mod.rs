//! Wire protocol: frame codec, size limits, and the control-message schema.

pub mod frame;
pub mod limits;
pub mod message;

pub use message::{AppToBroker, BrokerToApp, MimeMapEntry, ResourceType};

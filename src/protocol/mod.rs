//! Packet model and wire codec adapter for the MQTT 3.1.1 client
//!
//! The client core works with the plain typed values in [`packets`]. Byte-level
//! framing is delegated to the MQTT 3.1.1 codec in `rumqttc::mqttbytes::v4`;
//! [`codec`] only converts between the two representations.

pub mod codec;
pub mod packets;
pub mod topics;

pub use codec::{decode, encode, CodecError};
pub use packets::*;
pub use topics::*;

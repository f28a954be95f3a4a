pub mod events;
mod frame;

pub use frame::{decode, encode, OutboundEvent, OwnedPayload, Payload, WireFrame};

//! Request multiplexing over the client's persistent streams

pub mod transmitter;

pub use transmitter::{PendingResult, RequestTransmitter};

//! Domain layer: the mapping model, the G2P Connect protocol envelopes and the
//! ports the application layer talks to.

pub mod mapping;
pub mod ports;
pub mod protocol;

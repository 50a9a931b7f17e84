//! Application layer containing the transaction correlation engine.
//!
//! This module defines the `IdMapper` service, the single entry point for
//! submitting requests to the ID mapper authority, correlating its callbacks,
//! waiting on outcomes and running the update-or-link saga. Every record
//! update is serialized per store key through `KeyedLocks`.

pub mod builder;
pub mod correlator;
pub mod dispatcher;
pub mod locks;
pub mod mapper;
pub mod registry;
pub mod saga;
pub mod waiter;

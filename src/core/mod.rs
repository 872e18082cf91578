//! Pure domain model of the payment store: payments, HTLC shards, routes
//! and the status state machine. Nothing in this module tree performs I/O;
//! everything is computable from a payment snapshot and therefore testable
//! in isolation.

pub mod payment;
pub mod route;
pub mod state;

//! Client library for sopmq: connects, authenticates, and issues
//! publish/consume requests over a single multiplexed connection.

pub mod client;
pub mod connection;
pub mod session;

pub use client::Client;
pub use connection::ClientHandle;

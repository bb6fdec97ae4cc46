//! querybroker - run equivalent analysis requests at most once.
//!
//! Requests are hashed by content. The first sighting of a hash creates a
//! status record and sends one discovery message to downstream workers;
//! later equal requests join that record. Workers report progress on three
//! event queues, and every caller gets the record's current snapshot back.

pub mod broker;
pub mod config;
pub mod gateway;
pub mod ingest;
pub mod models;
pub mod query;
pub mod server;
pub mod store;
pub mod updater;

//! leash-broker: Message broker between agents and app targets
//!
//! The broker owns a single TCP listener. Targets register under a project
//! identifier; agents address commands to a project and the broker routes
//! each command to the active target connection, relays the reply back by
//! request id, and fans target console output out to log subscribers.

pub mod broker;
pub mod config;
pub mod handlers;
pub mod pending;
pub mod registry;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use pending::PendingRelay;
pub use registry::{ConnId, ConnRegistry};

pub mod config;
pub mod credentials;
pub mod delivery;
pub mod envoy;
pub mod error;
pub mod poller;
pub mod points;
pub mod shutdown;
pub mod tracker;

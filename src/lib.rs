pub mod clock;
pub mod config;
pub mod error;
pub mod ifdiscovery;
pub mod leap;
pub mod mgmt;
pub mod mgmt_transport;
pub mod sampler;
pub mod servo;
pub mod session;
pub mod stats;

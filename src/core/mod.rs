pub mod catalog;
pub mod client;
pub mod connection;
pub mod data_types;
pub mod device;
pub mod dist;
pub mod error;
pub mod modbus;
pub mod planner;
pub mod poller;
pub mod settings;

pub use catalog::*;
pub use client::*;
pub use connection::*;
pub use data_types::*;
pub use device::*;
pub use dist::*;
pub use error::*;
pub use modbus::*;
pub use planner::*;
pub use poller::*;
pub use settings::*;

pub mod poller;
pub mod schedule;
pub mod sink;

pub use poller::*;
pub use schedule::*;
pub use sink::*;

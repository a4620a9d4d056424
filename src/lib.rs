#[macro_use]
extern crate enum_primitive;

pub mod core;
pub mod queue;


pub mod prelude {
    pub use crate::core::*;
    pub use tokio_util::sync::CancellationToken;
}

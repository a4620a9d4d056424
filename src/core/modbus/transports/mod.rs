pub mod emulated;
pub mod tcp;

pub use emulated::*;
pub use tcp::*;

pub mod client;
pub mod result;

pub use client::*;
pub use result::*;

pub mod composite;
pub mod error;
pub mod function;
pub mod transport;
pub mod transports;

pub use composite::*;
pub use error::*;
pub use function::*;
pub use transport::*;
pub use transports::*;

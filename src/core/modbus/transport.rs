use std::future::Future;

use super::{ReadFunction, Word};
use crate::core::Error;

/// A live session to one device. Implementations are driven by one caller at a time.
///
/// Implementations may use `async fn`; the returned futures must be `Send`.
pub trait Transport {
    /// Issues the request and returns the register words of the reply.
    fn read(
        &mut self,
        function: ReadFunction,
    ) -> impl Future<Output = Result<Vec<Word>, Error>> + Send;

    /// Releases the session. Further reads fail.
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

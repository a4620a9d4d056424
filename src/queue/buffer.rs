use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use tokio::sync::{oneshot, Mutex};

use crate::core::modbus::{Header, TransportError};

/// A decoded frame as read off the wire: the MBAP header and the PDU that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Header,
    pub pdu: Vec<u8>,
}

#[derive(Debug, Default)]
struct Observers {
    // Stores the `TransactionId`: waiting request
    waiting: HashMap<u16, oneshot::Sender<Frame>>,
    closed: bool,
}

/// Routes frames read by the listener to the request waiting on the same transaction id.
///
/// Frames nobody waits for (late replies to abandoned requests, or unsolicited traffic)
/// are dropped. Once closed, every waiter is released and new subscriptions fail.
#[derive(Debug)]
pub struct Topic {
    observers: Mutex<Observers>,
}

impl Topic {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: Mutex::new(Observers::default()),
        })
    }

    /// Registers interest in `id`. Must happen before the request is written so a fast
    /// reply cannot slip past.
    pub(crate) async fn subscribe(
        &self,
        id: u16,
    ) -> Result<oneshot::Receiver<Frame>, TransportError> {
        let mut observers = self.observers.lock().await;
        if observers.closed {
            return Err(TransportError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        if observers.waiting.insert(id, tx).is_some() {
            debug!("Replaced stale subscriber on TxnID={id}");
        }

        debug!("Registered subscriber to Topic on TxnID={id}");
        Ok(rx)
    }

    pub(crate) async fn publish(&self, frame: Frame) {
        let identifier = frame.header.transaction_id;

        match self.observers.lock().await.waiting.remove(&identifier) {
            Some(observer) => {
                debug!("Found observer to notify of packet TxnID={identifier}");
                if observer.send(frame).is_err() {
                    debug!("Observer for TxnID={identifier} went away before delivery");
                }
            }
            None => debug!("Dropping frame nobody waits for, TxnID={identifier}"),
        }
    }

    pub(crate) async fn close(&self) {
        let mut observers = self.observers.lock().await;
        observers.closed = true;
        observers.waiting.clear();
    }
}

use std::io::Write;
use std::sync::Arc;

use enum_primitive::FromPrimitive;
use futures_util::sink::SinkExt;
use log::{debug, error, trace};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::core::modbus::{
    pack_words, ComposedMessage, Compositor, ExceptionCode, Header, ProtocolError, ReadFunction,
    Reason, Transport, TransportError, Word, MAX_PDU_LENGTH, MODBUS_HEADER_SIZE,
    MODBUS_PROTOCOL_TCP,
};
use crate::core::{Connect, ConnectionConfig, Error};
use crate::queue::{Frame, Topic};

/// The base transaction ID. Each request takes the next value, wrapping at [`u16::MAX`],
/// and the device relays it back so the reply can be matched to its request.
const STARTING_TRANSACTION_ID: u16 = 0;

/// A Modbus TCP session.
///
/// Writes go straight to the socket; a background listener decodes incoming frames and
/// hands each one to the request waiting on its transaction id. Dropping the transport
/// stops the listener and closes the socket.
#[derive(Debug)]
pub struct TcpTransport {
    transaction_id: u16,
    unit_id: u8,

    cancel: Arc<Notify>,
    stream_write: FramedWrite<OwnedWriteHalf, FrameCodec>,
    topic: Arc<Topic>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, unit_id: u8) -> TcpTransport {
        let (read, write) = stream.into_split();
        let fr = FramedRead::new(read, FrameCodec);
        let fw = FramedWrite::new(write, FrameCodec);

        let topic = Topic::new();
        let notify = Arc::new(Notify::new());

        let listener_topic = Arc::clone(&topic);
        let listener_notify = Arc::clone(&notify);

        tokio::spawn(async move { TcpTransport::listen(listener_topic, listener_notify, fr).await });

        TcpTransport {
            unit_id,
            transaction_id: STARTING_TRANSACTION_ID,

            cancel: notify,
            stream_write: fw,
            topic,
        }
    }

    async fn listen(
        topic: Arc<Topic>,
        notify: Arc<Notify>,
        mut read: FramedRead<OwnedReadHalf, FrameCodec>,
    ) {
        loop {
            tokio::select! {
                data = read.next() => {
                    match data {
                        Some(Ok(frame)) => {
                            trace!(
                                "Obtained packet of size {}. TxnID={}",
                                frame.header.length,
                                frame.header.transaction_id
                            );

                            topic.publish(frame).await;
                        }
                        Some(Err(err)) => {
                            error!("Error reading from `FrameCodec` stream: {err}");
                            break;
                        }
                        None => {
                            debug!("Peer closed the connection");
                            break;
                        }
                    }
                }
                _ = notify.notified() => {
                    break
                }
            }
        }

        topic.close().await;
        debug!("Listening ended, pending requests released.")
    }

    fn compositor(&mut self) -> Compositor {
        Compositor::new(&mut self.transaction_id, self.unit_id)
    }

    fn validate_response_header(req: &Header, resp: &Header) -> Result<(), ProtocolError> {
        if req.transaction_id != resp.transaction_id {
            return Err(Reason::TransactionMismatch {
                sent: req.transaction_id,
                received: resp.transaction_id,
            }
            .into());
        }

        if resp.protocol_id != MODBUS_PROTOCOL_TCP {
            return Err(Reason::ProtocolMismatch(resp.protocol_id).into());
        }

        if req.unit_id != resp.unit_id {
            return Err(Reason::UnitMismatch {
                sent: req.unit_id,
                received: resp.unit_id,
            }
            .into());
        }

        Ok(())
    }

    fn validate_response_code(req_code: u8, pdu: &[u8]) -> Result<(), ProtocolError> {
        let res_code = *pdu.first().ok_or(Reason::UnexpectedReplySize)?;

        match res_code {
            code if code == req_code | 0x80 => {
                let exception = *pdu.get(1).ok_or(Reason::UnexpectedReplySize)?;
                match ExceptionCode::from_u8(exception) {
                    Some(code) => Err(ProtocolError::Exception(code)),
                    None => Err(Reason::UnknownException(exception).into()),
                }
            }
            code if code == req_code => Ok(()),
            code => Err(Reason::FunctionMismatch {
                sent: req_code,
                received: code,
            }
            .into()),
        }
    }

    fn get_reply_data(pdu: &[u8], expected_bytes: usize) -> Result<&[u8], ProtocolError> {
        let given_response_length = *pdu.get(1).ok_or(Reason::UnexpectedReplySize)? as usize;
        let reply_length_does_not_match = pdu.len() != expected_bytes + 2;

        if given_response_length != expected_bytes || reply_length_does_not_match {
            return Err(Reason::UnexpectedReplySize.into());
        }

        Ok(pdu.get(2..).ok_or(Reason::UnexpectedReplySize)?)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.notify_one();
    }
}

impl Transport for TcpTransport {
    async fn read(&mut self, function: ReadFunction) -> Result<Vec<Word>, Error> {
        let ComposedMessage {
            content,
            header,
            expected_bytes,
        } = self.compositor().compose_read(&function)?;

        // Subscribe before sending, the reply may beat us otherwise.
        let response = self.topic.subscribe(header.transaction_id).await?;
        self.stream_write.send(content).await?;

        let frame = response.await.map_err(|_| TransportError::Closed)?;
        debug!(
            "Response contains ... Header={:?}. Pdu={:?}",
            frame.header, frame.pdu
        );

        TcpTransport::validate_response_header(&header, &frame.header)?;
        TcpTransport::validate_response_code(function.code(), &frame.pdu)?;

        let bytes = TcpTransport::get_reply_data(&frame.pdu, expected_bytes)?;
        Ok(pack_words(bytes))
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.cancel.notify_one();
        self.stream_write.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Connects to devices over Modbus TCP.
///
/// ```no_run
/// use modbus_poller::prelude::*;
///
/// # async fn docs() -> Result<(), Error> {
/// let config = ConnectionConfig::new("192.168.200.1", 6607);
/// let mut client = ModbusClient::new(config, Tcp);
/// client.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Tcp;

impl Connect for Tcp {
    type Transport = TcpTransport;

    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Transport, Error> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|err| Error::connection(config, err))?;
        stream
            .set_nodelay(true)
            .map_err(|err| Error::connection(config, err))?;

        debug!("Opened TCP session to {config}");
        Ok(TcpTransport::new(stream, config.unit_id))
    }
}

#[derive(Debug)]
pub(crate) struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MODBUS_HEADER_SIZE {
            // Not enough data to read length marker.
            return Ok(None);
        }

        let header = Header::unpack(&src[..MODBUS_HEADER_SIZE])?;

        // The length counts the unit id, so anything below 2 cannot hold a function code.
        // The upper bound keeps a corrupt length from making us buffer without limit.
        if header.length < 2 || header.length as usize > MAX_PDU_LENGTH + 1 {
            return Err(TransportError::InvalidFrameLength(header.length));
        }

        // We include the UnitID as a part of the header, therefore we must subtract its length
        // from the size of the expected message.
        let expected_size = MODBUS_HEADER_SIZE + header.length as usize - 1;
        if src.len() < expected_size {
            src.reserve(expected_size - src.len());

            // We inform the Framed that we need more bytes to form the next
            // frame.
            return Ok(None);
        }

        let pdu = src[MODBUS_HEADER_SIZE..expected_size].to_vec();
        src.advance(expected_size);

        Ok(Some(Frame { header, pdu }))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.writer()
            .write_all(item.as_slice())
            .map_err(TransportError::Io)
    }
}

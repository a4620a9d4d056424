use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{ReadFunction, Reason, MAX_READ_QUANTITY};
use crate::core::Error;

pub const MODBUS_PROTOCOL_TCP: u16 = 0x0000;
pub const MODBUS_TCP_DEFAULT_PORT: u16 = 502;
pub const MODBUS_HEADER_SIZE: usize = 7;

/// Largest PDU (function code plus data) a Modbus TCP frame may carry.
pub const MAX_PDU_LENGTH: usize = 253;

/// Ephemeral structure created from the transport to compose messages. It's internal state is
/// only a mutable view of the transport's transaction counter together with the unit id
/// the requests are addressed to.
pub struct Compositor<'a> {
    pub transaction_id: &'a mut u16,
    pub unit_id: u8,
}

#[derive(Debug)]
pub struct ComposedMessage {
    pub content: Vec<u8>,

    pub(crate) header: Header,
    pub(crate) expected_bytes: usize,
}

/// The MBAP header on a given modbus message.
///
/// Defines how large the payload will be, and the corresponding transaction, protocol and unit ids.
/// `length` counts the unit id plus the PDU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl<'a> Compositor<'a> {
    pub fn new(transaction_id: &'a mut u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            unit_id,
        }
    }

    fn new_tid(&mut self) -> u16 {
        *self.transaction_id = self.transaction_id.wrapping_add(1);
        *self.transaction_id
    }

    pub fn compose_read(&mut self, function: &ReadFunction) -> Result<ComposedMessage, Error> {
        let (addr, count) = match *function {
            ReadFunction::HoldingRegisters(a, c) => (a, c),
        };

        if count < 1 || count > MAX_READ_QUANTITY {
            return Err(Reason::QuantityOutOfRange(count).into());
        }

        // unit id, function code, address and count
        let header = Header::new(self, 6);
        let mut content = header.pack()?;

        content.write_u8(function.code())?;
        content.write_u16::<BigEndian>(addr)?;
        content.write_u16::<BigEndian>(count)?;

        Ok(ComposedMessage {
            content,
            header,
            expected_bytes: function.expected_bytes(),
        })
    }
}

impl Header {
    fn new(compositor: &mut Compositor, length: u16) -> Header {
        Header {
            transaction_id: compositor.new_tid(),
            protocol_id: MODBUS_PROTOCOL_TCP,
            length,
            unit_id: compositor.unit_id,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>, io::Error> {
        let mut buff = Vec::with_capacity(MODBUS_HEADER_SIZE);
        buff.write_u16::<BigEndian>(self.transaction_id)?;
        buff.write_u16::<BigEndian>(self.protocol_id)?;
        buff.write_u16::<BigEndian>(self.length)?;
        buff.write_u8(self.unit_id)?;
        Ok(buff)
    }

    pub fn unpack(buff: &[u8]) -> Result<Header, io::Error> {
        let mut rdr = io::Cursor::new(buff);
        Ok(Header {
            transaction_id: rdr.read_u16::<BigEndian>()?,
            protocol_id: rdr.read_u16::<BigEndian>()?,
            length: rdr.read_u16::<BigEndian>()?,
            unit_id: rdr.read_u8()?,
        })
    }
}

use byteorder::{BigEndian, ByteOrder};

pub type Address = u16;
pub type Quantity = u16;
pub type Word = u16;

/// Largest number of holding registers a single read request may ask for.
pub const MAX_READ_QUANTITY: Quantity = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFunction {
    HoldingRegisters(Address, Quantity),
}

impl ReadFunction {
    pub(crate) fn code(&self) -> u8 {
        match *self {
            ReadFunction::HoldingRegisters(_, _) => 0x03,
        }
    }

    pub fn address(&self) -> Address {
        match *self {
            ReadFunction::HoldingRegisters(addr, _) => addr,
        }
    }

    pub fn quantity(&self) -> Quantity {
        match *self {
            ReadFunction::HoldingRegisters(_, quant) => quant,
        }
    }

    /// Number of data bytes a well-formed reply carries.
    pub fn expected_bytes(&self) -> usize {
        2 * self.quantity() as usize
    }
}

/// Packs big-endian reply bytes into register words. A trailing odd byte is ignored.
pub fn pack_words(bytes: &[u8]) -> Vec<Word> {
    let even = bytes.len() - bytes.len() % 2;
    let mut words = vec![0; even / 2];
    BigEndian::read_u16_into(&bytes[..even], &mut words);
    words
}

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::core::modbus::{ProtocolError, Quantity, Reason, Word};

/// The encodings a register (or group of consecutive registers) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Width in 16-bit words.
    pub const fn size(&self) -> Quantity {
        match self {
            DataType::U16 | DataType::I16 => 1,
            DataType::U32 | DataType::I32 | DataType::F32 => 2,
            DataType::U64 | DataType::I64 | DataType::F64 => 4,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            DataType::U16 => "u16",
            DataType::I16 => "i16",
            DataType::U32 => "u32",
            DataType::I32 => "i32",
            DataType::U64 => "u64",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u16" => Ok(DataType::U16),
            "i16" => Ok(DataType::I16),
            "u32" => Ok(DataType::U32),
            "i32" => Ok(DataType::I32),
            "u64" => Ok(DataType::U64),
            "i64" => Ok(DataType::I64),
            "f32" => Ok(DataType::F32),
            "f64" => Ok(DataType::F64),
            other => Err(format!(
                "unrecognized type `{other}`, expected one of u16, i16, u32, i32, u64, i64, f32, f64"
            )),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Order of the 16-bit words making up a multi-word value.
/// Bytes inside a word are always big-endian, as Modbus mandates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordOrder {
    /// High word first.
    #[default]
    Big,
    /// Low word first.
    Little,
}

/// A decoded register value, before scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl RegisterValue {
    pub fn data_type(&self) -> DataType {
        match self {
            RegisterValue::U16(_) => DataType::U16,
            RegisterValue::I16(_) => DataType::I16,
            RegisterValue::U32(_) => DataType::U32,
            RegisterValue::I32(_) => DataType::I32,
            RegisterValue::U64(_) => DataType::U64,
            RegisterValue::I64(_) => DataType::I64,
            RegisterValue::F32(_) => DataType::F32,
            RegisterValue::F64(_) => DataType::F64,
        }
    }

    /// 64-bit integers beyond 2^53 lose precision here.
    pub fn as_f64(&self) -> f64 {
        match *self {
            RegisterValue::U16(v) => v as f64,
            RegisterValue::I16(v) => v as f64,
            RegisterValue::U32(v) => v as f64,
            RegisterValue::I32(v) => v as f64,
            RegisterValue::U64(v) => v as f64,
            RegisterValue::I64(v) => v as f64,
            RegisterValue::F32(v) => v as f64,
            RegisterValue::F64(v) => v,
        }
    }
}

impl Display for RegisterValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterValue::U16(v) => write!(f, "{v}"),
            RegisterValue::I16(v) => write!(f, "{v}"),
            RegisterValue::U32(v) => write!(f, "{v}"),
            RegisterValue::I32(v) => write!(f, "{v}"),
            RegisterValue::U64(v) => write!(f, "{v}"),
            RegisterValue::I64(v) => write!(f, "{v}"),
            RegisterValue::F32(v) => write!(f, "{v}"),
            RegisterValue::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Decodes the leading words of a reply into a typed value.
pub struct StandardDecoder<'a> {
    pub words: &'a [Word],
    pub word_order: WordOrder,
}

impl StandardDecoder<'_> {
    pub fn decode_as(&self, data_type: DataType) -> Result<RegisterValue, ProtocolError> {
        let width = data_type.size() as usize;
        let words = self
            .words
            .get(..width)
            .ok_or(Reason::DecodingError(data_type.name()))?;

        let mut buf = [0u8; 8];
        let ordered: Vec<Word> = match self.word_order {
            WordOrder::Big => words.to_vec(),
            WordOrder::Little => words.iter().rev().copied().collect(),
        };
        for (index, word) in ordered.iter().enumerate() {
            BigEndian::write_u16(&mut buf[index * 2..], *word);
        }
        let bytes = &buf[..width * 2];

        Ok(match data_type {
            DataType::U16 => RegisterValue::U16(BigEndian::read_u16(bytes)),
            DataType::I16 => RegisterValue::I16(BigEndian::read_i16(bytes)),
            DataType::U32 => RegisterValue::U32(BigEndian::read_u32(bytes)),
            DataType::I32 => RegisterValue::I32(BigEndian::read_i32(bytes)),
            DataType::U64 => RegisterValue::U64(BigEndian::read_u64(bytes)),
            DataType::I64 => RegisterValue::I64(BigEndian::read_i64(bytes)),
            DataType::F32 => RegisterValue::F32(BigEndian::read_f32(bytes)),
            DataType::F64 => RegisterValue::F64(BigEndian::read_f64(bytes)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(words: &[Word], data_type: DataType) -> RegisterValue {
        StandardDecoder {
            words,
            word_order: WordOrder::Big,
        }
        .decode_as(data_type)
        .expect("Must decode")
    }

    #[test]
    fn decodes_sixteen_bit_values() {
        assert_eq!(decode(&[u16::MAX], DataType::U16), RegisterValue::U16(u16::MAX));
        assert_eq!(decode(&[u16::MAX], DataType::I16), RegisterValue::I16(-1));
        assert_eq!(decode(&[205], DataType::I16).as_f64(), 205.0);
    }

    #[test]
    fn decodes_thirty_two_bit_values() {
        assert_eq!(decode(&[0, 8000], DataType::U32), RegisterValue::U32(8000));
        assert_eq!(
            decode(&[0x000F, 0xF0FF], DataType::U32),
            RegisterValue::U32(0x000F_F0FF)
        );
        assert_eq!(
            decode(&[u16::MAX, u16::MAX - 53], DataType::I32),
            RegisterValue::I32(-54)
        );
        assert_eq!(
            decode(&[0x41A4, 0x0000], DataType::F32),
            RegisterValue::F32(20.5)
        );
    }

    #[test]
    fn decodes_sixty_four_bit_values() {
        assert_eq!(
            decode(&[0, 0, 1, 2], DataType::U64),
            RegisterValue::U64(0x0001_0002)
        );
        assert_eq!(
            decode(&[0xFFFF, 0xFFFF, 0xFFFF, 0xFFFE], DataType::I64),
            RegisterValue::I64(-2)
        );
        assert_eq!(
            decode(&[0x4034, 0x8000, 0, 0], DataType::F64),
            RegisterValue::F64(20.5)
        );
    }

    #[test]
    fn honours_little_word_order() {
        let value = StandardDecoder {
            words: &[0xF0FF, 0x000F],
            word_order: WordOrder::Little,
        }
        .decode_as(DataType::U32)
        .expect("Must decode");

        assert_eq!(value, RegisterValue::U32(0x000F_F0FF));
    }

    #[test]
    fn ignores_trailing_words() {
        assert_eq!(decode(&[7, 1, 2], DataType::U16), RegisterValue::U16(7));
    }

    #[test]
    fn short_input_is_a_protocol_error() {
        let result = StandardDecoder {
            words: &[1],
            word_order: WordOrder::Big,
        }
        .decode_as(DataType::F32);

        assert_eq!(
            result,
            Err(ProtocolError::InvalidData(Reason::DecodingError("f32")))
        );
    }

    #[test]
    fn parses_type_names() {
        assert_eq!("I32".parse::<DataType>(), Ok(DataType::I32));
        assert!("TWO_BYTE_INT_SIGNED".parse::<DataType>().is_err());
    }
}

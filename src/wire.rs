//! Canonical wire encoding of tuples.
//!
//! A tuple serializes to a `u32` field count followed by one record per
//! field: a `u8` variant tag and the payload in canonical form. Integers and
//! float bit patterns travel in network byte order, strings as `u32` length
//! plus UTF-8 bytes, function-call holders as `u32` name length + name +
//! nested argument tuple. The encoding is self-describing; decoding is the
//! exact inverse and rejects anything that does not frame.

use std::io::Write;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::error::{DecodeError, Result};
use crate::tuple::Tuple;
use crate::value::{FnCall, Value, ValueKind};

/// Wire tag of the `Ref` variant; the concrete variants use
/// [`ValueKind::index`] directly.
const REF_TAG: u8 = 11;

/// Fn-call argument tuples nest; bound the recursion.
const MAX_CALL_DEPTH: usize = 64;

////////////////////////////////////////////////////////////////////////////////
// endianness helpers
////////////////////////////////////////////////////////////////////////////////

// Raw header words (the ack correlation id) go through these two, applied
// symmetrically on both sides of the wire.

#[inline]
pub fn to_communication_endian(word: u32) -> [u8; 4] {
    word.to_be_bytes()
}

#[inline]
pub fn from_communication_endian(raw: [u8; 4]) -> u32 {
    u32::from_be_bytes(raw)
}

////////////////////////////////////////////////////////////////////////////////
// encoding
////////////////////////////////////////////////////////////////////////////////

/// Serialize `tuple` into `stream`.
pub fn write_tuple(stream: &mut impl Write, tuple: &Tuple) -> Result<()> {
    stream.write_u32::<NetworkEndian>(tuple.len() as u32)?;
    for value in tuple {
        write_value(stream, value)?;
    }
    Ok(())
}

fn write_value(stream: &mut impl Write, value: &Value) -> Result<()> {
    match value {
        Value::I16(v) => {
            stream.write_u8(ValueKind::I16.index())?;
            stream.write_i16::<NetworkEndian>(*v)?;
        }
        Value::U16(v) => {
            stream.write_u8(ValueKind::U16.index())?;
            stream.write_u16::<NetworkEndian>(*v)?;
        }
        Value::I32(v) => {
            stream.write_u8(ValueKind::I32.index())?;
            stream.write_i32::<NetworkEndian>(*v)?;
        }
        Value::U32(v) => {
            stream.write_u8(ValueKind::U32.index())?;
            stream.write_u32::<NetworkEndian>(*v)?;
        }
        Value::I64(v) => {
            stream.write_u8(ValueKind::I64.index())?;
            stream.write_i64::<NetworkEndian>(*v)?;
        }
        Value::U64(v) => {
            stream.write_u8(ValueKind::U64.index())?;
            stream.write_u64::<NetworkEndian>(*v)?;
        }
        Value::F32(v) => {
            stream.write_u8(ValueKind::F32.index())?;
            stream.write_u32::<NetworkEndian>(v.to_bits())?;
        }
        Value::F64(v) => {
            stream.write_u8(ValueKind::F64.index())?;
            stream.write_u64::<NetworkEndian>(v.to_bits())?;
        }
        Value::Str(v) => {
            stream.write_u8(ValueKind::Str.index())?;
            stream.write_u32::<NetworkEndian>(v.len() as u32)?;
            stream.write_all(v.as_bytes())?;
        }
        Value::FnCall(call) => {
            stream.write_u8(ValueKind::FnCall.index())?;
            stream.write_u32::<NetworkEndian>(call.name().len() as u32)?;
            stream.write_all(call.name().as_bytes())?;
            write_tuple(stream, call.args())?;
        }
        Value::FnCallTag => {
            stream.write_u8(ValueKind::FnCallTag.index())?;
        }
        Value::Ref(kind) => {
            stream.write_u8(REF_TAG)?;
            stream.write_u8(kind.index())?;
        }
    }
    Ok(())
}

/// Serialize `tuple` into a fresh buffer.
pub fn serialize(tuple: &Tuple) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + tuple.len() * 8);
    write_tuple(&mut buf, tuple).expect("Can't fail for a Vec");
    buf
}

////////////////////////////////////////////////////////////////////////////////
// decoding
////////////////////////////////////////////////////////////////////////////////

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, count: usize) -> std::result::Result<&'a [u8], DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: count - self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> std::result::Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> std::result::Result<u16, DecodeError> {
        Ok(NetworkEndian::read_u16(self.take(2)?))
    }

    fn read_u32(&mut self) -> std::result::Result<u32, DecodeError> {
        Ok(NetworkEndian::read_u32(self.take(4)?))
    }

    fn read_u64(&mut self) -> std::result::Result<u64, DecodeError> {
        Ok(NetworkEndian::read_u64(self.take(8)?))
    }

    fn read_len(&mut self) -> std::result::Result<usize, DecodeError> {
        let declared = self.read_u32()? as usize;
        if declared > self.remaining() {
            return Err(DecodeError::LengthOutOfBounds {
                declared,
                remaining: self.remaining(),
            });
        }
        Ok(declared)
    }
}

/// Deserialize one tuple out of `buf`, requiring `buf` to be fully consumed.
pub fn deserialize(buf: &[u8]) -> Result<Tuple> {
    let mut reader = SliceReader::new(buf);
    let tuple = read_tuple(&mut reader, 0)?;
    if reader.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()).into());
    }
    Ok(tuple)
}

fn read_tuple(
    reader: &mut SliceReader<'_>,
    depth: usize,
) -> std::result::Result<Tuple, DecodeError> {
    if depth > MAX_CALL_DEPTH {
        return Err(DecodeError::NestingTooDeep);
    }
    let field_count = reader.read_len()?;
    let mut fields = Vec::with_capacity(field_count.min(64));
    for _ in 0..field_count {
        fields.push(read_value(reader, depth)?);
    }
    Ok(Tuple::from_values(fields))
}

fn read_value(
    reader: &mut SliceReader<'_>,
    depth: usize,
) -> std::result::Result<Value, DecodeError> {
    let tag_offset = reader.pos;
    let tag = reader.read_u8()?;
    if tag == REF_TAG {
        let index = reader.read_u8()?;
        let kind = ValueKind::from_index(index).ok_or(DecodeError::UnknownKind(index))?;
        return Ok(Value::Ref(kind));
    }
    let kind = ValueKind::from_index(tag).ok_or(DecodeError::UnknownTag {
        offset: tag_offset,
        tag,
    })?;
    let value = match kind {
        ValueKind::I16 => Value::I16(reader.read_u16()? as i16),
        ValueKind::U16 => Value::U16(reader.read_u16()?),
        ValueKind::I32 => Value::I32(reader.read_u32()? as i32),
        ValueKind::U32 => Value::U32(reader.read_u32()?),
        ValueKind::I64 => Value::I64(reader.read_u64()? as i64),
        ValueKind::U64 => Value::U64(reader.read_u64()?),
        ValueKind::F32 => Value::F32(f32::from_bits(reader.read_u32()?)),
        ValueKind::F64 => Value::F64(f64::from_bits(reader.read_u64()?)),
        ValueKind::Str => {
            let len = reader.read_len()?;
            let text = std::str::from_utf8(reader.take(len)?)?;
            Value::Str(text.to_owned())
        }
        ValueKind::FnCall => {
            let name_len = reader.read_len()?;
            let name = std::str::from_utf8(reader.take(name_len)?)?.to_owned();
            let args = read_tuple(reader, depth + 1)?;
            Value::FnCall(FnCall::new(name, args))
        }
        ValueKind::FnCallTag => Value::FnCallTag,
    };
    Ok(value)
}

////////////////////////////////////////////////////////////////////////////////
// request framing
////////////////////////////////////////////////////////////////////////////////

// Every request payload is the sender-chosen ack correlation id followed by
// the serialized tuple. Ack payloads are either empty (absent result) or a
// bare serialized tuple.

pub fn encode_frame(ack: u32, tuple: &Tuple) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + tuple.len() * 8);
    buf.extend_from_slice(&to_communication_endian(ack));
    write_tuple(&mut buf, tuple).expect("Can't fail for a Vec");
    buf
}

pub fn decode_frame(buf: &[u8]) -> Result<(u32, Tuple)> {
    if buf.len() < 4 {
        return Err(DecodeError::UnexpectedEof {
            offset: buf.len(),
            needed: 4 - buf.len(),
        }
        .into());
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[..4]);
    let ack = from_communication_endian(word);
    let tuple = deserialize(&buf[4..])?;
    Ok((ack, tuple))
}

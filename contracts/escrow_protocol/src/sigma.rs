//! # Sigma values
//!
//! Serialization of the typed constants stored in box registers and in the
//! constants section of a program.  Only the value types the escrow protocol
//! touches are supported:
//!
//! | Type              | Code | Data encoding                                |
//! |-------------------|------|----------------------------------------------|
//! | `Boolean`         | 1    | one byte, `0x00` / `0x01`                    |
//! | `Byte`            | 2    | one byte                                     |
//! | `Short`/`Int`/`Long` | 3/4/5 | ZigZag, then VLQ                         |
//! | `BigInt`          | 6    | VLQ length + two's-complement big-endian     |
//! | `GroupElement`    | 7    | 33-byte compressed point                     |
//! | `SigmaProp`       | 8    | `0xcd` (ProveDlog) + 33-byte point           |
//! | `Coll[T]`         | 12+T | VLQ length + items (`Coll[Byte]` is raw)     |
//! | `(T1, T2)`        | 60+T1 / 72+T2 / 84+T | items back to back       |
//!
//! A serialized constant is the type followed by the data.

use crate::error::{ProtocolError, Result};

pub mod type_code {
    pub const BOOLEAN: u8 = 1;
    pub const BYTE: u8 = 2;
    pub const SHORT: u8 = 3;
    pub const INT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const BIG_INT: u8 = 6;
    pub const GROUP_ELEMENT: u8 = 7;
    pub const SIGMA_PROP: u8 = 8;

    pub const COLL: u8 = 12;
    pub const PAIR_FIRST_PRIM: u8 = 60;
    pub const PAIR_SECOND_PRIM: u8 = 72;
    pub const PAIR_SYMMETRIC: u8 = 84;
}

/// ProveDlog marker inside a serialized `SigmaProp`.
pub const PROVE_DLOG: u8 = 0xcd;

pub const GROUP_ELEMENT_SIZE: usize = 33;

/// Largest two's-complement BigInt payload (256 bits).
const MAX_BIG_INT_BYTES: usize = 32;

const SOURCE: &str = "constant";

// ── Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    BigInt,
    GroupElement,
    SigmaProp,
    Coll(Box<SType>),
    Pair(Box<SType>, Box<SType>),
}

impl SType {
    fn primitive_code(&self) -> Option<u8> {
        use type_code::*;
        match self {
            SType::Boolean => Some(BOOLEAN),
            SType::Byte => Some(BYTE),
            SType::Short => Some(SHORT),
            SType::Int => Some(INT),
            SType::Long => Some(LONG),
            SType::BigInt => Some(BIG_INT),
            SType::GroupElement => Some(GROUP_ELEMENT),
            SType::SigmaProp => Some(SIGMA_PROP),
            SType::Coll(_) | SType::Pair(_, _) => None,
        }
    }

    fn from_primitive_code(code: u8) -> Result<SType> {
        use type_code::*;
        Ok(match code {
            BOOLEAN => SType::Boolean,
            BYTE => SType::Byte,
            SHORT => SType::Short,
            INT => SType::Int,
            LONG => SType::Long,
            BIG_INT => SType::BigInt,
            GROUP_ELEMENT => SType::GroupElement,
            SIGMA_PROP => SType::SigmaProp,
            other => {
                return Err(ProtocolError::malformed(
                    SOURCE,
                    format!("unsupported primitive type code {other}"),
                ))
            }
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        use type_code::*;
        if let Some(code) = self.primitive_code() {
            out.push(code);
            return Ok(());
        }
        match self {
            SType::Coll(elem) => match elem.primitive_code() {
                Some(code) => out.push(COLL + code),
                None => {
                    return Err(ProtocolError::malformed(
                        SOURCE,
                        "nested collections are not supported",
                    ))
                }
            },
            SType::Pair(first, second) => {
                match (first.primitive_code(), second.primitive_code()) {
                    (Some(a), Some(b)) if a == b => out.push(PAIR_SYMMETRIC + a),
                    (Some(a), _) => {
                        out.push(PAIR_FIRST_PRIM + a);
                        second.write(out)?;
                    }
                    (None, Some(b)) => {
                        out.push(PAIR_SECOND_PRIM + b);
                        first.write(out)?;
                    }
                    (None, None) => {
                        return Err(ProtocolError::malformed(
                            SOURCE,
                            "pairs of two non-primitive types are not supported",
                        ))
                    }
                }
            }
            _ => unreachable!("primitive types handled above"),
        }
        Ok(())
    }

    pub fn read(reader: &mut SigmaReader<'_>) -> Result<SType> {
        use type_code::*;
        let code = reader.get_u8()?;
        match code {
            1..=8 => SType::from_primitive_code(code),
            c if c > COLL && c <= COLL + SIGMA_PROP => Ok(SType::Coll(Box::new(
                SType::from_primitive_code(c - COLL)?,
            ))),
            c if c > PAIR_FIRST_PRIM && c <= PAIR_FIRST_PRIM + SIGMA_PROP => {
                let first = SType::from_primitive_code(c - PAIR_FIRST_PRIM)?;
                let second = SType::read(reader)?;
                Ok(SType::Pair(Box::new(first), Box::new(second)))
            }
            c if c > PAIR_SECOND_PRIM && c <= PAIR_SECOND_PRIM + SIGMA_PROP => {
                let second = SType::from_primitive_code(c - PAIR_SECOND_PRIM)?;
                let first = SType::read(reader)?;
                Ok(SType::Pair(Box::new(first), Box::new(second)))
            }
            c if c > PAIR_SYMMETRIC && c <= PAIR_SYMMETRIC + SIGMA_PROP => {
                let item = SType::from_primitive_code(c - PAIR_SYMMETRIC)?;
                Ok(SType::Pair(Box::new(item.clone()), Box::new(item)))
            }
            other => Err(ProtocolError::malformed(
                SOURCE,
                format!("unsupported type code {other}"),
            )),
        }
    }

    /// Short type name in the notation explorers use (`SLong`, `Coll[SByte]`).
    pub fn name(&self) -> String {
        match self {
            SType::Boolean => "SBoolean".into(),
            SType::Byte => "SByte".into(),
            SType::Short => "SShort".into(),
            SType::Int => "SInt".into(),
            SType::Long => "SLong".into(),
            SType::BigInt => "SBigInt".into(),
            SType::GroupElement => "SGroupElement".into(),
            SType::SigmaProp => "SSigmaProp".into(),
            SType::Coll(elem) => format!("Coll[{}]", elem.name()),
            SType::Pair(a, b) => format!("({}, {})", a.name(), b.name()),
        }
    }
}

// ── Values ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    /// Two's-complement big-endian magnitude, minimal length.
    BigInt(Vec<u8>),
    GroupElement(Vec<u8>),
    /// ProveDlog over the contained compressed point.
    SigmaProp(Vec<u8>),
    /// `Coll[Byte]`, kept raw.
    Bytes(Vec<u8>),
    Coll(SType, Vec<SValue>),
    Pair(Box<SValue>, Box<SValue>),
}

impl SValue {
    pub fn tpe(&self) -> SType {
        match self {
            SValue::Boolean(_) => SType::Boolean,
            SValue::Byte(_) => SType::Byte,
            SValue::Short(_) => SType::Short,
            SValue::Int(_) => SType::Int,
            SValue::Long(_) => SType::Long,
            SValue::BigInt(_) => SType::BigInt,
            SValue::GroupElement(_) => SType::GroupElement,
            SValue::SigmaProp(_) => SType::SigmaProp,
            SValue::Bytes(_) => SType::Coll(Box::new(SType::Byte)),
            SValue::Coll(elem, _) => SType::Coll(Box::new(elem.clone())),
            SValue::Pair(a, b) => SType::Pair(Box::new(a.tpe()), Box::new(b.tpe())),
        }
    }

    pub fn long_coll(items: &[i64]) -> SValue {
        SValue::Coll(
            SType::Long,
            items.iter().copied().map(SValue::Long).collect(),
        )
    }

    /// Serialize as a constant: type then data.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.tpe().write(&mut out)?;
        self.write_data(&mut out)?;
        Ok(out)
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_bytes()?))
    }

    /// Parse a constant that must span the whole input.
    pub fn from_bytes(bytes: &[u8]) -> Result<SValue> {
        let mut reader = SigmaReader::new(bytes);
        let value = SValue::read_constant(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(ProtocolError::malformed(
                SOURCE,
                format!("{} trailing bytes after constant", reader.remaining()),
            ));
        }
        Ok(value)
    }

    pub fn from_hex(encoded: &str) -> Result<SValue> {
        let bytes = hex::decode(encoded)
            .map_err(|e| ProtocolError::malformed(SOURCE, format!("invalid hex: {e}")))?;
        SValue::from_bytes(&bytes)
    }

    pub fn read_constant(reader: &mut SigmaReader<'_>) -> Result<SValue> {
        let tpe = SType::read(reader)?;
        SValue::read_data(&tpe, reader)
    }

    fn write_data(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            SValue::Boolean(b) => out.push(u8::from(*b)),
            SValue::Byte(b) => out.push(*b as u8),
            SValue::Short(v) => put_vlq(out, zigzag_i32(i32::from(*v))),
            SValue::Int(v) => put_vlq(out, zigzag_i32(*v)),
            SValue::Long(v) => put_vlq(out, zigzag_i64(*v)),
            SValue::BigInt(bytes) => {
                if bytes.is_empty() || bytes.len() > MAX_BIG_INT_BYTES {
                    return Err(ProtocolError::malformed(
                        SOURCE,
                        format!("BigInt of {} bytes is out of range", bytes.len()),
                    ));
                }
                put_vlq(out, bytes.len() as u64);
                out.extend_from_slice(bytes);
            }
            SValue::GroupElement(point) => {
                check_point(point)?;
                out.extend_from_slice(point);
            }
            SValue::SigmaProp(point) => {
                check_point(point)?;
                out.push(PROVE_DLOG);
                out.extend_from_slice(point);
            }
            SValue::Bytes(bytes) => {
                put_coll_len(out, bytes.len())?;
                out.extend_from_slice(bytes);
            }
            SValue::Coll(elem, items) => {
                if *elem == SType::Boolean {
                    return Err(ProtocolError::malformed(
                        SOURCE,
                        "Coll[Boolean] is not supported",
                    ));
                }
                put_coll_len(out, items.len())?;
                for item in items {
                    if item.tpe() != *elem {
                        return Err(ProtocolError::malformed(
                            SOURCE,
                            format!(
                                "collection of {} holds a {}",
                                elem.name(),
                                item.tpe().name()
                            ),
                        ));
                    }
                    item.write_data(out)?;
                }
            }
            SValue::Pair(a, b) => {
                a.write_data(out)?;
                b.write_data(out)?;
            }
        }
        Ok(())
    }

    fn read_data(tpe: &SType, reader: &mut SigmaReader<'_>) -> Result<SValue> {
        Ok(match tpe {
            SType::Boolean => match reader.get_u8()? {
                0 => SValue::Boolean(false),
                1 => SValue::Boolean(true),
                other => {
                    return Err(ProtocolError::malformed(
                        SOURCE,
                        format!("invalid boolean byte {other}"),
                    ))
                }
            },
            SType::Byte => SValue::Byte(reader.get_u8()? as i8),
            SType::Short => {
                let v = unzigzag_i32(reader.get_vlq()?)?;
                let short = i16::try_from(v).map_err(|_| {
                    ProtocolError::malformed(SOURCE, format!("short value {v} out of range"))
                })?;
                SValue::Short(short)
            }
            SType::Int => SValue::Int(unzigzag_i32(reader.get_vlq()?)?),
            SType::Long => SValue::Long(unzigzag_i64(reader.get_vlq()?)),
            SType::BigInt => {
                let len = reader.get_vlq()? as usize;
                if len == 0 || len > MAX_BIG_INT_BYTES {
                    return Err(ProtocolError::malformed(
                        SOURCE,
                        format!("BigInt length {len} out of range"),
                    ));
                }
                SValue::BigInt(reader.get_bytes(len)?.to_vec())
            }
            SType::GroupElement => {
                SValue::GroupElement(reader.get_bytes(GROUP_ELEMENT_SIZE)?.to_vec())
            }
            SType::SigmaProp => {
                let marker = reader.get_u8()?;
                if marker != PROVE_DLOG {
                    return Err(ProtocolError::malformed(
                        SOURCE,
                        format!("unsupported sigma proposition 0x{marker:02x}"),
                    ));
                }
                SValue::SigmaProp(reader.get_bytes(GROUP_ELEMENT_SIZE)?.to_vec())
            }
            SType::Coll(elem) => {
                let len = reader.get_coll_len()?;
                match elem.as_ref() {
                    SType::Byte => SValue::Bytes(reader.get_bytes(len)?.to_vec()),
                    SType::Boolean => {
                        return Err(ProtocolError::malformed(
                            SOURCE,
                            "Coll[Boolean] is not supported",
                        ))
                    }
                    other => {
                        let mut items = Vec::with_capacity(len.min(1024));
                        for _ in 0..len {
                            items.push(SValue::read_data(other, reader)?);
                        }
                        SValue::Coll(other.clone(), items)
                    }
                }
            }
            SType::Pair(a, b) => {
                let first = SValue::read_data(a, reader)?;
                let second = SValue::read_data(b, reader)?;
                SValue::Pair(Box::new(first), Box::new(second))
            }
        })
    }
}

fn check_point(point: &[u8]) -> Result<()> {
    if point.len() != GROUP_ELEMENT_SIZE {
        return Err(ProtocolError::malformed(
            SOURCE,
            format!("group element must be 33 bytes, got {}", point.len()),
        ));
    }
    Ok(())
}

fn put_coll_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > u16::MAX as usize {
        return Err(ProtocolError::malformed(
            SOURCE,
            format!("collection of {len} items exceeds 65535"),
        ));
    }
    put_vlq(out, len as u64);
    Ok(())
}

// ── Primitive codecs ─────────────────────────────────────────────────

pub fn put_vlq(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes `put_vlq` emits for `value`.
pub fn vlq_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

pub fn zigzag_i64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn unzigzag_i64(z: u64) -> i64 {
    ((z >> 1) as i64) ^ -((z & 1) as i64)
}

pub fn zigzag_i32(v: i32) -> u64 {
    u64::from(((v << 1) ^ (v >> 31)) as u32)
}

fn unzigzag_i32(z: u64) -> Result<i32> {
    let z = u32::try_from(z).map_err(|_| {
        ProtocolError::malformed(SOURCE, format!("int encoding {z} exceeds 32 bits"))
    })?;
    Ok(((z >> 1) as i32) ^ -((z & 1) as i32))
}

/// Cursor over a byte slice with the reads the sigma format needs.
pub struct SigmaReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SigmaReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Everything not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| ProtocolError::malformed(SOURCE, "unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::malformed(
                SOURCE,
                format!("expected {len} bytes, {} left", self.remaining()),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn get_vlq(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.get_u8()?;
            if shift >= 64 || (shift == 63 && byte > 1) {
                return Err(ProtocolError::malformed(SOURCE, "VLQ value overflows 64 bits"));
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn get_coll_len(&mut self) -> Result<usize> {
        let len = self.get_vlq()?;
        if len > u64::from(u16::MAX) {
            return Err(ProtocolError::malformed(
                SOURCE,
                format!("collection length {len} exceeds 65535"),
            ));
        }
        Ok(len as usize)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_constant_matches_known_encoding() {
        // 1000L -> zigzag 2000 -> VLQ d0 0f
        assert_eq!(SValue::Long(1000).to_hex().unwrap(), "05d00f");
        assert_eq!(SValue::Long(-1).to_hex().unwrap(), "0501");
    }

    #[test]
    fn int_constant_matches_known_encoding() {
        assert_eq!(SValue::Int(500_000).to_hex().unwrap(), "04c0843d");
    }

    #[test]
    fn byte_coll_is_length_prefixed() {
        let v = SValue::Bytes(b"abc".to_vec());
        assert_eq!(v.to_hex().unwrap(), "0e03616263");
        assert_eq!(SValue::from_hex("0e03616263").unwrap(), v);
    }

    #[test]
    fn long_coll_type_code_is_0x11() {
        let v = SValue::long_coll(&[1, 2, 3]);
        let bytes = v.to_bytes().unwrap();
        assert_eq!(bytes[0], 0x11);
        assert_eq!(bytes[1], 3);
        assert_eq!(SValue::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn boolean_long_pair_uses_first_primitive_code() {
        let v = SValue::Pair(
            Box::new(SValue::Boolean(true)),
            Box::new(SValue::Long(7)),
        );
        let bytes = v.to_bytes().unwrap();
        assert_eq!(&bytes[..3], &[0x3d, 0x05, 0x01]);
        assert_eq!(SValue::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn symmetric_pair_round_trips() {
        let v = SValue::Pair(Box::new(SValue::Int(1)), Box::new(SValue::Int(-2)));
        let bytes = v.to_bytes().unwrap();
        assert_eq!(bytes[0], type_code::PAIR_SYMMETRIC + type_code::INT);
        assert_eq!(SValue::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn sigma_prop_carries_prove_dlog_marker() {
        let v = SValue::SigmaProp(vec![2u8; 33]);
        let bytes = v.to_bytes().unwrap();
        assert_eq!(&bytes[..2], &[0x08, 0xcd]);
        assert_eq!(bytes.len(), 35);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        assert!(matches!(
            SValue::from_hex("050200"),
            Err(ProtocolError::MalformedRegister { .. })
        ));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(SValue::from_hex("0e05616263").is_err());
        assert!(SValue::from_hex("05").is_err());
    }

    #[test]
    fn vlq_len_matches_encoder() {
        for v in [0u64, 1, 127, 128, 16_383, 16_384, u64::MAX] {
            let mut out = Vec::new();
            put_vlq(&mut out, v);
            assert_eq!(out.len(), vlq_len(v), "value {v}");
        }
    }

    #[test]
    fn zigzag_extremes() {
        for v in [0i64, 1, -1, i64::MAX, i64::MIN] {
            assert_eq!(unzigzag_i64(zigzag_i64(v)), v);
        }
    }
}

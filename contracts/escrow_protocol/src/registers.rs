//! # Registers
//!
//! Maps [`EscrowState`] onto the six register slots of an escrow box and
//! back.
//!
//! | Slot | Content                         |
//! |------|---------------------------------|
//! | R4   | deadline                        |
//! | R5   | minimum threshold (`Long`)      |
//! | R6   | counters triple                 |
//! | R7   | unit price (`Long`)             |
//! | R8   | constants blob (`Coll[Byte]`)   |
//! | R9   | content blob (`Coll[Byte]`)     |
//!
//! The slots whose encoding changed between contract generations (R4 and R6)
//! are described by one [`RegisterLayout`] per version in [`LAYOUTS`].
//! Supporting a new version means adding a table entry.

use std::collections::BTreeMap;

use crate::error::{ProtocolError, Result};
use crate::sigma::SValue;
use crate::types::{ContractConstants, Counters, Deadline, EscrowState, ProtocolVersion};

pub const REGISTER_NAMES: [&str; 6] = ["R4", "R5", "R6", "R7", "R8", "R9"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineEncoding {
    /// `Int` block height.
    HeightInt,
    /// `(Boolean, Long)`: `(is_timestamp, deadline)`.
    FlaggedLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterEncoding {
    /// One `BigInt` holding `sold + refunded * 2^64 + exchanged * 2^128`.
    PackedBigInt,
    /// `Coll[Long]` of `[sold, refunded, exchanged]`.
    LongTriple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    pub version: ProtocolVersion,
    pub deadline: DeadlineEncoding,
    pub counters: CounterEncoding,
    /// Whether the base asset may be a token instead of the native coin.
    pub token_base_asset: bool,
}

pub const LAYOUTS: &[RegisterLayout] = &[
    RegisterLayout {
        version: ProtocolVersion::V1_0,
        deadline: DeadlineEncoding::HeightInt,
        counters: CounterEncoding::PackedBigInt,
        token_base_asset: false,
    },
    RegisterLayout {
        version: ProtocolVersion::V1_1,
        deadline: DeadlineEncoding::HeightInt,
        counters: CounterEncoding::LongTriple,
        token_base_asset: false,
    },
    RegisterLayout {
        version: ProtocolVersion::V2_0,
        deadline: DeadlineEncoding::FlaggedLong,
        counters: CounterEncoding::LongTriple,
        token_base_asset: true,
    },
];

pub fn layout(version: ProtocolVersion) -> Result<&'static RegisterLayout> {
    LAYOUTS
        .iter()
        .find(|l| l.version == version)
        .ok_or_else(|| ProtocolError::UnsupportedVersion(version.to_string()))
}

/// The typed content of R4..R9.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    pub r4: SValue,
    pub r5: SValue,
    pub r6: SValue,
    pub r7: SValue,
    pub r8: SValue,
    pub r9: SValue,
}

impl Registers {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SValue)> {
        REGISTER_NAMES
            .into_iter()
            .zip([&self.r4, &self.r5, &self.r6, &self.r7, &self.r8, &self.r9])
    }

    /// Serialized size of each slot, in R4..R9 order.
    pub fn serialized_sizes(&self) -> Result<Vec<usize>> {
        self.iter()
            .map(|(name, v)| {
                v.to_bytes()
                    .map(|b| b.len())
                    .map_err(|e| e.in_register(name))
            })
            .collect()
    }

    /// `{"R4": "<hex>", ...}` as carried in node and explorer JSON.
    pub fn to_hex_map(&self) -> Result<BTreeMap<String, String>> {
        self.iter()
            .map(|(name, v)| {
                v.to_hex()
                    .map(|h| (name.to_string(), h))
                    .map_err(|e| e.in_register(name))
            })
            .collect()
    }

    pub fn from_hex_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let get = |name: &str| -> Result<SValue> {
            let encoded = map
                .get(name)
                .ok_or_else(|| ProtocolError::malformed(name, "register is missing"))?;
            SValue::from_hex(encoded).map_err(|e| e.in_register(name))
        };
        Ok(Self {
            r4: get("R4")?,
            r5: get("R5")?,
            r6: get("R6")?,
            r7: get("R7")?,
            r8: get("R8")?,
            r9: get("R9")?,
        })
    }
}

// ── Encode ───────────────────────────────────────────────────────────

pub fn encode(state: &EscrowState) -> Result<Registers> {
    let layout = layout(state.version)?;
    if state.constants.base_asset_id.is_some() && !layout.token_base_asset {
        return Err(ProtocolError::precondition(format!(
            "protocol {} only accepts the native coin as base asset",
            state.version
        )));
    }
    if !state.counters.is_consistent() {
        return Err(ProtocolError::precondition(format!(
            "inconsistent counters {:?}",
            state.counters
        )));
    }

    Ok(Registers {
        r4: encode_deadline(layout, &state.deadline)?,
        r5: SValue::Long(to_long(state.minimum_threshold, "minimum threshold")?),
        r6: encode_counters(layout, &state.counters)?,
        r7: SValue::Long(to_long(state.unit_price, "unit price")?),
        r8: SValue::Bytes(state.constants.to_blob()),
        r9: SValue::Bytes(state.content_blob.clone()),
    })
}

fn to_long(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| ProtocolError::precondition(format!("{what} {value} exceeds i64::MAX")))
}

fn encode_deadline(layout: &RegisterLayout, deadline: &Deadline) -> Result<SValue> {
    match (layout.deadline, *deadline) {
        (DeadlineEncoding::HeightInt, Deadline::BlockHeight(h)) => {
            let h = i32::try_from(h).map_err(|_| {
                ProtocolError::precondition(format!("deadline height {h} exceeds i32::MAX"))
            })?;
            Ok(SValue::Int(h))
        }
        (DeadlineEncoding::HeightInt, Deadline::Timestamp(_)) => {
            Err(ProtocolError::precondition(format!(
                "protocol {} only supports block-height deadlines",
                layout.version
            )))
        }
        (DeadlineEncoding::FlaggedLong, d) => Ok(SValue::Pair(
            Box::new(SValue::Boolean(matches!(d, Deadline::Timestamp(_)))),
            Box::new(SValue::Long(to_long(d.raw(), "deadline")?)),
        )),
    }
}

fn encode_counters(layout: &RegisterLayout, counters: &Counters) -> Result<SValue> {
    match layout.counters {
        CounterEncoding::PackedBigInt => {
            to_long(counters.sold, "sold counter")?;
            to_long(counters.refunded, "refund counter")?;
            to_long(counters.exchanged, "exchange counter")?;
            Ok(SValue::BigInt(pack_counters(counters)))
        }
        CounterEncoding::LongTriple => Ok(SValue::long_coll(&[
            to_long(counters.sold, "sold counter")?,
            to_long(counters.refunded, "refund counter")?,
            to_long(counters.exchanged, "exchange counter")?,
        ])),
    }
}

/// Minimal two's-complement big-endian form of the packed counters.
fn pack_counters(counters: &Counters) -> Vec<u8> {
    let mut be = Vec::with_capacity(25);
    be.extend_from_slice(&counters.exchanged.to_be_bytes());
    be.extend_from_slice(&counters.refunded.to_be_bytes());
    be.extend_from_slice(&counters.sold.to_be_bytes());

    let first = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
    let mut out: Vec<u8> = be[first..].to_vec();
    if out[0] & 0x80 != 0 {
        out.insert(0, 0);
    }
    out
}

fn unpack_counters(bytes: &[u8]) -> Result<Counters> {
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        return Err(ProtocolError::malformed("R6", "packed counters are negative"));
    }
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let magnitude = &bytes[first..];
    if magnitude.len() > 24 {
        return Err(ProtocolError::malformed(
            "R6",
            format!("packed counters span {} bytes", magnitude.len()),
        ));
    }
    let mut padded = [0u8; 24];
    padded[24 - magnitude.len()..].copy_from_slice(magnitude);

    let word = |i: usize| {
        let mut w = [0u8; 8];
        w.copy_from_slice(&padded[i * 8..i * 8 + 8]);
        u64::from_be_bytes(w)
    };
    let counters = Counters::new(word(2), word(1), word(0));
    // The contract reads each packed word back as a Long.
    for (name, v) in [
        ("sold", counters.sold),
        ("refunded", counters.refunded),
        ("exchanged", counters.exchanged),
    ] {
        if i64::try_from(v).is_err() {
            return Err(ProtocolError::malformed(
                "R6",
                format!("packed {name} counter {v} exceeds i64::MAX"),
            ));
        }
    }
    Ok(counters)
}

// ── Decode ───────────────────────────────────────────────────────────

pub fn decode(registers: &Registers, version: ProtocolVersion) -> Result<EscrowState> {
    let layout = layout(version)?;

    let deadline = decode_deadline(layout, &registers.r4)?;
    let minimum_threshold = expect_non_negative_long(&registers.r5, "R5")?;
    let counters = decode_counters(layout, &registers.r6)?;
    let unit_price = expect_non_negative_long(&registers.r7, "R7")?;

    let constants = ContractConstants::from_blob(expect_bytes(&registers.r8, "R8")?)?;
    if constants.base_asset_id.is_some() && !layout.token_base_asset {
        return Err(ProtocolError::malformed(
            "R8",
            format!("protocol {version} cannot carry a token base asset"),
        ));
    }
    let content_blob = expect_bytes(&registers.r9, "R9")?.to_vec();

    Ok(EscrowState {
        version,
        deadline,
        minimum_threshold,
        counters,
        unit_price,
        constants,
        content_blob,
    })
}

fn type_mismatch(register: &str, expected: &str, found: &SValue) -> ProtocolError {
    ProtocolError::malformed(
        register,
        format!("expected {expected}, found {}", found.tpe().name()),
    )
}

fn expect_non_negative_long(value: &SValue, register: &str) -> Result<u64> {
    match value {
        SValue::Long(v) => u64::try_from(*v)
            .map_err(|_| ProtocolError::malformed(register, format!("negative value {v}"))),
        other => Err(type_mismatch(register, "SLong", other)),
    }
}

fn expect_bytes<'a>(value: &'a SValue, register: &str) -> Result<&'a [u8]> {
    match value {
        SValue::Bytes(b) => Ok(b),
        other => Err(type_mismatch(register, "Coll[SByte]", other)),
    }
}

fn decode_deadline(layout: &RegisterLayout, value: &SValue) -> Result<Deadline> {
    match (layout.deadline, value) {
        (DeadlineEncoding::HeightInt, SValue::Int(h)) => u64::try_from(*h)
            .map(Deadline::BlockHeight)
            .map_err(|_| ProtocolError::malformed("R4", format!("negative height {h}"))),
        (DeadlineEncoding::HeightInt, other) => Err(type_mismatch("R4", "SInt", other)),
        (DeadlineEncoding::FlaggedLong, SValue::Pair(flag, raw)) => {
            match (flag.as_ref(), raw.as_ref()) {
                (SValue::Boolean(is_timestamp), SValue::Long(v)) => {
                    let v = u64::try_from(*v).map_err(|_| {
                        ProtocolError::malformed("R4", format!("negative deadline {v}"))
                    })?;
                    Ok(if *is_timestamp {
                        Deadline::Timestamp(v)
                    } else {
                        Deadline::BlockHeight(v)
                    })
                }
                _ => Err(type_mismatch("R4", "(SBoolean, SLong)", value)),
            }
        }
        (DeadlineEncoding::FlaggedLong, other) => {
            Err(type_mismatch("R4", "(SBoolean, SLong)", other))
        }
    }
}

fn decode_counters(layout: &RegisterLayout, value: &SValue) -> Result<Counters> {
    let counters = match (layout.counters, value) {
        (CounterEncoding::PackedBigInt, SValue::BigInt(bytes)) => unpack_counters(bytes)?,
        (CounterEncoding::PackedBigInt, other) => {
            return Err(type_mismatch("R6", "SBigInt", other))
        }
        (CounterEncoding::LongTriple, SValue::Coll(_, items)) => {
            if items.len() != 3 {
                return Err(ProtocolError::malformed(
                    "R6",
                    format!("expected 3 counters, found {}", items.len()),
                ));
            }
            let mut out = [0u64; 3];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = expect_non_negative_long(item, "R6")?;
            }
            Counters::new(out[0], out[1], out[2])
        }
        (CounterEncoding::LongTriple, other) => {
            return Err(type_mismatch("R6", "Coll[SLong]", other))
        }
    };
    if !counters.is_consistent() {
        return Err(ProtocolError::malformed(
            "R6",
            format!("refunded + exchanged exceeds sold in {counters:?}"),
        ));
    }
    Ok(counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_version_has_a_layout() {
        for v in ProtocolVersion::ALL {
            assert_eq!(layout(v).unwrap().version, v);
        }
    }

    #[test]
    fn packed_counters_layout() {
        let c = Counters::new(1, 2, 3);
        let packed = pack_counters(&c);
        // 3 * 2^128 + 2 * 2^64 + 1, minimal big-endian.
        assert_eq!(packed.len(), 17);
        assert_eq!(packed[0], 3);
        assert_eq!(unpack_counters(&packed).unwrap(), c);
    }

    #[test]
    fn packed_zero_is_single_byte() {
        assert_eq!(pack_counters(&Counters::default()), vec![0]);
        assert_eq!(unpack_counters(&[0]).unwrap(), Counters::default());
    }

    #[test]
    fn packed_high_bit_gets_sign_byte() {
        let c = Counters::new(0x80, 0, 0);
        let packed = pack_counters(&c);
        assert_eq!(packed, vec![0x00, 0x80]);
        assert_eq!(unpack_counters(&packed).unwrap(), c);
    }

    #[test]
    fn packed_counters_stay_within_long_range() {
        let widest = Counters::new(i64::MAX as u64, i64::MAX as u64 / 2, i64::MAX as u64 / 2);
        assert_eq!(unpack_counters(&pack_counters(&widest)).unwrap(), widest);

        for c in [
            Counters::new(u64::MAX, 0, 0),
            Counters::new(u64::MAX, u64::MAX, 0),
            Counters::new(i64::MAX as u64 + 1, 0, 0),
        ] {
            let err = unpack_counters(&pack_counters(&c)).unwrap_err();
            assert!(
                matches!(err, ProtocolError::MalformedRegister { ref register, .. } if register == "R6"),
                "{err:?}"
            );
        }
    }

    #[test]
    fn negative_packed_counters_are_rejected() {
        assert!(unpack_counters(&[0x80, 0x01]).is_err());
    }
}

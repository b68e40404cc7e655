use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::error::ProtocolError;
use crate::registers::{decode, encode, Registers};
use crate::sigma::SValue;
use crate::types::*;

fn token_id() -> impl Strategy<Value = TokenId> {
    any::<[u8; 32]>().prop_map(TokenId)
}

fn constants(token_base: bool) -> impl Strategy<Value = ContractConstants> {
    (
        prop::collection::vec(any::<u8>(), 1..64),
        prop::collection::vec(any::<u8>(), 0..64),
        0u32..=10_000,
        token_id(),
        prop::option::of(token_id()),
    )
        .prop_filter_map("base equals reward", move |(owner, dev, bps, reward, base)| {
            let base_asset_id = if token_base { base } else { None };
            (base_asset_id != Some(reward)).then_some(ContractConstants {
                owner_authorization: owner,
                dev_authorization: dev,
                dev_fee_bps: bps,
                reward_token_id: reward,
                base_asset_id,
            })
        })
}

fn counters(max: u64) -> impl Strategy<Value = Counters> {
    (0..=max, 0..=max, 0..=max).prop_map(|(a, b, c)| {
        let mut v = [a, b, c];
        v.sort_unstable();
        // refunded + exchanged <= sold
        let sold = v[2];
        let refunded = v[0] / 2;
        let exchanged = (sold - refunded).min(v[1]);
        Counters::new(sold, refunded, exchanged)
    })
}

fn state(version: ProtocolVersion) -> BoxedStrategy<EscrowState> {
    let (deadline, token_base, counter_max): (BoxedStrategy<Deadline>, bool, u64) = match version
    {
        ProtocolVersion::V1_0 => (
            (0u64..=i32::MAX as u64).prop_map(Deadline::BlockHeight).boxed(),
            false,
            i64::MAX as u64,
        ),
        ProtocolVersion::V1_1 => (
            (0u64..=i32::MAX as u64).prop_map(Deadline::BlockHeight).boxed(),
            false,
            i64::MAX as u64,
        ),
        ProtocolVersion::V2_0 => (
            prop_oneof![
                (0u64..=i64::MAX as u64).prop_map(Deadline::BlockHeight),
                (0u64..=i64::MAX as u64).prop_map(Deadline::Timestamp),
            ]
            .boxed(),
            true,
            i64::MAX as u64,
        ),
    };
    (
        deadline,
        0u64..=i64::MAX as u64,
        counters(counter_max),
        0u64..=i64::MAX as u64,
        constants(token_base),
        prop::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(
            move |(deadline, minimum_threshold, counters, unit_price, constants, content_blob)| {
                EscrowState {
                    version,
                    deadline,
                    minimum_threshold,
                    counters,
                    unit_price,
                    constants,
                    content_blob,
                }
            },
        )
        .boxed()
}

fn round_trip(s: &EscrowState) -> EscrowState {
    let registers = encode(s).unwrap();
    let hex = registers.to_hex_map().unwrap();
    decode(&Registers::from_hex_map(&hex).unwrap(), s.version).unwrap()
}

proptest! {
    #[test]
    fn v1_0_round_trips(s in state(ProtocolVersion::V1_0)) {
        prop_assert_eq!(round_trip(&s), s);
    }

    #[test]
    fn v1_1_round_trips(s in state(ProtocolVersion::V1_1)) {
        prop_assert_eq!(round_trip(&s), s);
    }

    #[test]
    fn v2_0_round_trips(s in state(ProtocolVersion::V2_0)) {
        prop_assert_eq!(round_trip(&s), s);
    }
}

fn sample(version: ProtocolVersion) -> EscrowState {
    EscrowState {
        version,
        deadline: Deadline::BlockHeight(1_200_000),
        minimum_threshold: 500,
        counters: Counters::new(600, 0, 100),
        unit_price: 10,
        constants: ContractConstants {
            owner_authorization: vec![0x00, 0x08, 0xcd],
            dev_authorization: vec![],
            dev_fee_bps: 500,
            reward_token_id: TokenId([1u8; 32]),
            base_asset_id: None,
        },
        content_blob: br#"{"title":"Solar"}"#.to_vec(),
    }
}

#[test]
fn test_layouts_differ_where_versions_differ() {
    let v10 = encode(&sample(ProtocolVersion::V1_0)).unwrap();
    let v11 = encode(&sample(ProtocolVersion::V1_1)).unwrap();
    let v20 = encode(&sample(ProtocolVersion::V2_0)).unwrap();

    assert!(matches!(v10.r6, SValue::BigInt(_)));
    assert_eq!(v11.r6, SValue::long_coll(&[600, 0, 100]));
    assert_eq!(v10.r4, SValue::Int(1_200_000));
    assert_eq!(
        v20.r4,
        SValue::Pair(
            Box::new(SValue::Boolean(false)),
            Box::new(SValue::Long(1_200_000))
        )
    );
    assert_eq!(v11.r5, v20.r5);
    assert_eq!(v11.r5.to_hex().unwrap(), "05e807");
}

#[test]
fn test_decode_rejects_wrong_slot_type() {
    let mut registers = encode(&sample(ProtocolVersion::V1_1)).unwrap();
    registers.r6 = SValue::BigInt(vec![1]);
    let err = decode(&registers, ProtocolVersion::V1_1).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedRegister { ref register, .. } if register == "R6"));
}

#[test]
fn test_decode_rejects_inconsistent_counters() {
    let mut registers = encode(&sample(ProtocolVersion::V2_0)).unwrap();
    registers.r6 = SValue::long_coll(&[10, 8, 5]);
    assert!(decode(&registers, ProtocolVersion::V2_0).is_err());

    registers.r6 = SValue::long_coll(&[10, -1, 0]);
    assert!(decode(&registers, ProtocolVersion::V2_0).is_err());
}

#[test]
fn test_packed_counters_beyond_long_range_are_malformed() {
    let mut registers = encode(&sample(ProtocolVersion::V1_0)).unwrap();
    // sold = u64::MAX, refunded = exchanged = 0
    let mut packed = vec![0x00];
    packed.extend_from_slice(&[0xff; 8]);
    registers.r6 = SValue::BigInt(packed);
    let err = decode(&registers, ProtocolVersion::V1_0).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedRegister { ref register, .. } if register == "R6"));

    let mut s = sample(ProtocolVersion::V1_0);
    s.counters = Counters::new(u64::MAX, 0, 0);
    assert!(matches!(encode(&s), Err(ProtocolError::PreconditionFailed(_))));
}

#[test]
fn test_decode_rejects_broken_constants_blob() {
    let mut registers = encode(&sample(ProtocolVersion::V1_1)).unwrap();
    registers.r8 = SValue::Bytes(b"not json".to_vec());
    let err = decode(&registers, ProtocolVersion::V1_1).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedRegister { ref register, .. } if register == "R8"));
}

#[test]
fn test_broken_content_blob_still_decodes() {
    let mut registers = encode(&sample(ProtocolVersion::V1_1)).unwrap();
    registers.r9 = SValue::Bytes(vec![0xff, 0xfe]);
    let state = decode(&registers, ProtocolVersion::V1_1).unwrap();
    let content = ProjectContent::parse_or_placeholder(&state.content_blob, "0123456789abcdef");
    assert_eq!(content.title, "Project 01234567");
}

#[test]
fn test_timestamp_deadline_needs_v2() {
    let mut s = sample(ProtocolVersion::V1_1);
    s.deadline = Deadline::Timestamp(1_700_000_000_000);
    assert!(matches!(encode(&s), Err(ProtocolError::PreconditionFailed(_))));
    s.version = ProtocolVersion::V2_0;
    assert_eq!(round_trip(&s), s);
}

#[test]
fn test_missing_register_in_hex_map() {
    let mut hex: BTreeMap<String, String> = encode(&sample(ProtocolVersion::V1_0))
        .unwrap()
        .to_hex_map()
        .unwrap();
    hex.remove("R7");
    let err = Registers::from_hex_map(&hex).unwrap_err();
    assert!(matches!(err, ProtocolError::MalformedRegister { ref register, .. } if register == "R7"));
}

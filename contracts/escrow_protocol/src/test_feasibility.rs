use crate::error::ProtocolError;
use crate::feasibility::{BoxSizeModel, FeasibilityValidator};
use crate::params::MAX_BOX_SIZE;
use crate::registers::encode;
use crate::types::*;
use crate::variants::stub::resolver;

fn draft(base_asset_id: Option<TokenId>) -> EscrowState {
    EscrowState {
        version: ProtocolVersion::V2_0,
        deadline: Deadline::Timestamp(1_750_000_000_000),
        minimum_threshold: 500,
        counters: Counters::default(),
        unit_price: 10,
        constants: ContractConstants {
            owner_authorization: [&[0x00, 0x08, 0xcd, 0x02][..], &[0x42; 32][..]].concat(),
            dev_authorization: [&[0x00, 0x08, 0xcd, 0x03][..], &[0x24; 32][..]].concat(),
            dev_fee_bps: 500,
            reward_token_id: TokenId([0x11; 32]),
            base_asset_id,
        },
        content_blob: Vec::new(),
    }
}

fn content(description_len: usize) -> ProjectContent {
    ProjectContent {
        title: "Community solar".into(),
        description: "d".repeat(description_len),
        image: "https://example.org/panel.png".into(),
        link: "https://example.org".into(),
    }
}

async fn validator(base_asset_id: Option<TokenId>) -> FeasibilityValidator {
    FeasibilityValidator::for_constants(&resolver(), draft(base_asset_id))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_content_at_exact_limit_is_valid_and_one_more_byte_is_not() {
    let v = validator(None).await;
    let base = v.validate(&content(200)).unwrap();
    assert!(base.is_valid);

    let fill = 200 + base.remaining_capacity;
    let exact = v.validate(&content(fill)).unwrap();
    assert!(exact.is_valid, "{}", exact.message);
    assert_eq!(exact.estimated_size, MAX_BOX_SIZE);
    assert_eq!(exact.remaining_capacity, 0);

    let over = v.validate(&content(fill + 1)).unwrap();
    assert!(!over.is_valid);
    assert_eq!(over.remaining_capacity, 0);
    assert_eq!(over.excess(), 1);
    assert!(over.message.contains("by 1 bytes"));
    assert_eq!(
        over.into_result().unwrap_err(),
        ProtocolError::InfeasibleSize { excess: 1 }
    );
}

#[tokio::test]
async fn test_growth_near_limit_is_byte_exact() {
    let v = validator(None).await;
    let near = v.validate(&content(3_000)).unwrap();
    for n in [1usize, 7, 64, 500] {
        let grown = v.validate(&content(3_000 + n)).unwrap();
        assert_eq!(grown.estimated_size, near.estimated_size + n);
    }
}

#[tokio::test]
async fn test_token_base_costs_one_token_slot() {
    let model = BoxSizeModel::default();
    let native = draft(None);
    let token = draft(Some(TokenId([0x99; 32])));

    let native_regs = encode(&native).unwrap();
    let token_regs = encode(&token).unwrap();
    let blob_growth = token_regs.r8.to_bytes().unwrap().len() - native_regs.r8.to_bytes().unwrap().len();

    let a = model.estimate(100, native.token_slots(), &native_regs).unwrap();
    let b = model.estimate(100, token.token_slots(), &token_regs).unwrap();
    assert_eq!(b - a, model.per_token + blob_growth);
}

#[test]
fn test_larger_of_mint_and_escrow_boxes_counts() {
    let model = BoxSizeModel::default();
    let mut state = draft(None);
    state.content_blob = content(10).to_blob();
    let registers = encode(&state).unwrap();

    let small_mint = FeasibilityValidator::with_program_sizes(model, state.clone(), 400, 100);
    let big_mint = FeasibilityValidator::with_program_sizes(model, state.clone(), 100, 400);
    let expected = model.estimate(400, 2, &registers).unwrap();
    assert_eq!(
        small_mint.validate_state(&state).unwrap().estimated_size,
        expected
    );
    assert_eq!(
        big_mint.validate_state(&state).unwrap().estimated_size,
        expected
    );
}

#[test]
fn test_report_messages() {
    let model = BoxSizeModel::default();
    let ok = model.report(4_000);
    assert!(ok.is_valid);
    assert_eq!(ok.remaining_capacity, 96);
    assert_eq!(ok.message, "96 bytes remaining");

    let bad = model.report(4_200);
    assert!(!bad.is_valid);
    assert_eq!(bad.excess(), 104);
}

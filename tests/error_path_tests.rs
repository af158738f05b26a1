//! Error path tests
//!
//! Malformed buffers, invalid fee refunds, repository failures and misuse of the
//! signing API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use identity_consensus::asset_lock::{AssetLockProof, ChainAssetLockProof, InstantLock, RawAssetLockProof};
use identity_consensus::execution_context::{FeeRefund, Operation};
use identity_consensus::hashing::{canonical_encode, prefix_with_protocol_version};
use identity_consensus::identity_create::IdentityCreateTransition;
use identity_consensus::identity_update::IdentityUpdateTransition;
use identity_consensus::signature::scheme_for;
use identity_consensus::transaction::OutPoint;
use identity_consensus::*;

fn chain_create() -> StateTransition {
    let data = scheme_for(KeyType::EcdsaSecp256k1)
        .unwrap()
        .public_key_data(&[0x31; 32])
        .unwrap();
    let mut create = IdentityCreateTransition::new(
        AssetLockProof::Chain(ChainAssetLockProof {
            core_chain_locked_height: 10,
            out_point: OutPoint::new([0x41; 32], 0),
        }),
        vec![IdentityPublicKey::new(0, KeyType::EcdsaSecp256k1, Purpose::Authentication, SecurityLevel::Master, data)],
    );
    create.sign_by_private_key(&[0x32; 32], KeyType::EcdsaHash160).unwrap();
    create.into()
}

fn refund(identifier: Identifier, credits: Credits) -> FeeRefund {
    FeeRefund { identifier, credits_per_epoch: BTreeMap::from([(0, credits)]) }
}

fn parse_error(consensus: &IdentityConsensus<InMemoryStateRepository>, buffer: &[u8]) -> ConsensusError {
    let result = consensus.create_from_buffer(buffer).unwrap_err();
    assert_eq!(result.errors().len(), 1);
    result.first_error().cloned().unwrap()
}

#[test]
fn test_unknown_asset_lock_proof_type() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let body = canonical_encode(&(
        StateTransitionType::IdentityCreate as u8,
        RawAssetLockProof { proof_type: 7, payload: vec![] },
        Vec::<IdentityPublicKey>::new(),
    ))
    .unwrap();
    let buffer = prefix_with_protocol_version(PROTOCOL_VERSION, &body);

    assert!(matches!(
        StateTransition::from_buffer(&buffer),
        Err(ProtocolError::UnknownAssetLockProofType(7))
    ));
    assert!(matches!(parse_error(&consensus, &buffer), ConsensusError::SerializedObjectParsing { .. }));
}

#[test]
fn test_truncated_buffer() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let buffer = chain_create().to_buffer(false).unwrap();

    let truncated = &buffer[..buffer.len() / 2];
    assert!(matches!(parse_error(&consensus, truncated), ConsensusError::SerializedObjectParsing { .. }));

    assert!(matches!(parse_error(&consensus, &[]), ConsensusError::SerializedObjectParsing { .. }));
}

#[test]
fn test_trailing_bytes_rejected() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let mut buffer = chain_create().to_buffer(false).unwrap();
    buffer.push(0);

    assert!(matches!(parse_error(&consensus, &buffer), ConsensusError::SerializedObjectParsing { .. }));
}

#[test]
fn test_unsupported_protocol_version() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let StateTransition::IdentityCreate(mut create) = chain_create() else { unreachable!() };
    create.protocol_version = PROTOCOL_VERSION + 1;
    let buffer = StateTransition::from(create).to_buffer(false).unwrap();

    assert_eq!(
        parse_error(&consensus, &buffer),
        ConsensusError::UnsupportedProtocolVersion {
            parsed_protocol_version: PROTOCOL_VERSION + 1,
            latest_version: PROTOCOL_VERSION,
        }
    );
}

#[tokio::test]
async fn test_owner_refunds_across_operations_are_merged() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let mut transition = chain_create();
    let owner = transition.owner_id();

    transition.execution_context_mut().add_operation(Operation::PreCalculated {
        storage_cost: 10000,
        processing_cost: 1000,
        fee_refunds: vec![refund(owner, 1000)],
    });
    transition.execution_context_mut().add_operation(Operation::PreCalculated {
        storage_cost: 0,
        processing_cost: 0,
        fee_refunds: vec![FeeRefund { identifier: owner, credits_per_epoch: BTreeMap::from([(1, 450)]) }],
    });

    assert_eq!(consensus.calculate_fee(&mut transition).await.unwrap(), 11000 - 1450);

    let breakdown = transition.execution_context().last_calculated_fee().unwrap();
    assert_eq!(breakdown.fee_refunds.len(), 1);
    assert_eq!(breakdown.fee_refunds[0].credits_per_epoch, BTreeMap::from([(0, 1000), (1, 450)]));
    assert_eq!(breakdown.total_refunds, 1450);
    assert_eq!(breakdown.required_amount, 10000 - 1450);
}

#[tokio::test]
async fn test_refunds_to_owner_and_stranger_are_fatal() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let mut transition = chain_create();
    let owner = transition.owner_id();

    transition.execution_context_mut().add_operation(Operation::PreCalculated {
        storage_cost: 100,
        processing_cost: 10,
        fee_refunds: vec![refund(owner, 5), refund(Identifier::new([0x99; 32]), 7)],
    });

    let error = consensus.calculate_fee(&mut transition).await.unwrap_err();
    assert!(matches!(error, ProtocolError::MultipleFeeRefunds { count: 2 }));
    assert!(transition.execution_context().last_calculated_fee().is_none());
}

#[tokio::test]
async fn test_refund_to_another_identity_is_fatal() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let mut transition = chain_create();
    let stranger = Identifier::new([0x99; 32]);

    transition.execution_context_mut().add_operation(Operation::PreCalculated {
        storage_cost: 100,
        processing_cost: 10,
        fee_refunds: vec![refund(stranger, 5)],
    });

    let error = consensus.calculate_fee(&mut transition).await.unwrap_err();
    match error {
        ProtocolError::FeeRefundForAnotherIdentity { owner_id, refund_identifier } => {
            assert_eq!(owner_id, transition.owner_id());
            assert_eq!(refund_identifier, stranger);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_owner_refund_reduces_fee() {
    let consensus = IdentityConsensus::new(InMemoryStateRepository::new());
    let mut transition = chain_create();
    let owner = transition.owner_id();

    transition.execution_context_mut().add_operation(Operation::PreCalculated {
        storage_cost: 100,
        processing_cost: 10,
        fee_refunds: vec![refund(owner, 30)],
    });

    assert_eq!(consensus.calculate_fee(&mut transition).await.unwrap(), 80);

    let breakdown = transition.execution_context().last_calculated_fee().unwrap();
    assert_eq!(breakdown.required_amount, 70);
    assert_eq!(breakdown.total_refunds, 30);
    assert_eq!(breakdown.refund_distribution.len(), 1);
}

struct UnavailableRepository;

#[async_trait]
impl StateRepository for UnavailableRepository {
    async fn fetch_identity(&self, _: &Identifier, _: &mut ExecutionContext) -> anyhow::Result<Option<Identity>> {
        anyhow::bail!("identity tree unavailable")
    }

    async fn store_identity(&self, _: &Identity, _: &mut ExecutionContext) -> anyhow::Result<()> {
        anyhow::bail!("identity tree unavailable")
    }

    async fn update_identity(&self, _: &Identity, _: &mut ExecutionContext) -> anyhow::Result<()> {
        anyhow::bail!("identity tree unavailable")
    }

    async fn store_identity_public_key_hashes(
        &self,
        _: &Identifier,
        _: &[Hash160],
        _: &mut ExecutionContext,
    ) -> anyhow::Result<()> {
        anyhow::bail!("key index unavailable")
    }

    async fn fetch_identity_ids_by_public_key_hashes(
        &self,
        _: &[Hash160],
        _: &mut ExecutionContext,
    ) -> anyhow::Result<Vec<Option<Identifier>>> {
        anyhow::bail!("key index unavailable")
    }

    async fn fetch_transaction(&self, _: &Hash, _: &mut ExecutionContext) -> anyhow::Result<Option<FetchedTransaction>> {
        anyhow::bail!("core rpc unavailable")
    }

    async fn is_asset_lock_transaction_out_point_already_used(
        &self,
        _: &OutPoint,
        _: &mut ExecutionContext,
    ) -> anyhow::Result<bool> {
        anyhow::bail!("out-point set unavailable")
    }

    async fn mark_asset_lock_transaction_out_point_as_used(
        &self,
        _: &OutPoint,
        _: &mut ExecutionContext,
    ) -> anyhow::Result<()> {
        anyhow::bail!("out-point set unavailable")
    }

    async fn verify_instant_lock(&self, _: &InstantLock, _: &mut ExecutionContext) -> anyhow::Result<bool> {
        anyhow::bail!("core rpc unavailable")
    }

    async fn fetch_latest_platform_core_chain_locked_height(&self) -> anyhow::Result<Option<u32>> {
        anyhow::bail!("platform state unavailable")
    }

    async fn fetch_latest_platform_block_time(&self) -> anyhow::Result<TimestampMillis> {
        anyhow::bail!("platform state unavailable")
    }

    async fn calculate_storage_fee_distribution_amount_and_leftovers(
        &self,
        _: Credits,
        _: EpochIndex,
    ) -> anyhow::Result<(Credits, Credits)> {
        anyhow::bail!("epoch pool unavailable")
    }
}

#[tokio::test]
async fn test_repository_failure_is_protocol_error() {
    let consensus = IdentityConsensus::new(UnavailableRepository);

    let mut update = IdentityUpdateTransition::new(Identifier::new([1; 32]), 1);
    update.disable_public_keys = vec![1];
    update.public_keys_disabled_at = Some(0);
    let mut transition: StateTransition = update.into();

    assert!(consensus.validate_basic(&transition).is_valid());

    let error = consensus.validate(&mut transition).await.unwrap_err();
    assert!(matches!(error, ProtocolError::Repository(_)));
    assert!(error.to_string().contains("identity tree unavailable"));

    let mut create = chain_create();
    assert!(matches!(consensus.validate(&mut create).await, Err(ProtocolError::Repository(_))));
}

#[test]
fn test_verify_unsigned_transition() {
    let mut transition = chain_create();
    transition.as_transition_mut().set_signature(None);

    let result = transition.as_transition().verify_by_public_key(&[0; 20], KeyType::EcdsaHash160);
    assert!(matches!(result, Err(ProtocolError::StateTransitionIsNotSigned)));
}

#[test]
fn test_bip13_keys_cannot_sign() {
    let mut transition = chain_create();
    let result = transition.as_transition_mut().sign_by_private_key(&[0x32; 32], KeyType::Bip13ScriptHash);

    assert!(matches!(result, Err(ProtocolError::InvalidIdentityPublicKeyType(KeyType::Bip13ScriptHash))));
}

#[test]
fn test_sign_with_mismatched_private_key() {
    let data = scheme_for(KeyType::EcdsaSecp256k1)
        .unwrap()
        .public_key_data(&[0x51; 32])
        .unwrap();
    let key = IdentityPublicKey::new(0, KeyType::EcdsaSecp256k1, Purpose::Authentication, SecurityLevel::Master, data);
    let mut update = IdentityUpdateTransition::new(Identifier::new([1; 32]), 1);

    let result = update.sign(&key, &[0x52; 32]);
    assert!(matches!(result, Err(ProtocolError::InvalidSignaturePublicKey { .. })));
    assert!(update.signature.is_none());
    assert!(update.signature_public_key_id.is_none());
}

#[test]
fn test_sign_with_withdraw_key() {
    let key = IdentityPublicKey::new(0, KeyType::EcdsaHash160, Purpose::Withdraw, SecurityLevel::Master, vec![0; 20]);
    let mut update = IdentityUpdateTransition::new(Identifier::new([1; 32]), 1);

    let result = update.sign(&key, &[0x52; 32]);
    assert!(matches!(
        result,
        Err(ProtocolError::WrongPublicKeyPurpose { public_key_purpose: Purpose::Withdraw, .. })
    ));
    assert!(update.signature_public_key_id.is_none());
}

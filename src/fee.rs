//! Fee calculation from recorded execution operations

use tracing::debug;

use crate::config::FeeCosts;
use crate::error::{ProtocolError, Result};
use crate::execution_context::{ExecutionContext, FeeBreakdown, FeeRefund, Operation, RefundDistribution};
use crate::repository::StateRepository;
use crate::types::{Credits, Identifier};

/// Storage and processing totals of a set of operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFees {
    pub storage_fee: Credits,
    pub processing_fee: Credits,
    pub fee_refunds: Vec<FeeRefund>,
}

fn add(total: Credits, amount: Credits) -> Result<Credits> {
    total.checked_add(amount).ok_or(ProtocolError::Overflow("operation fees"))
}

fn per_byte(bytes: u64, price: Credits) -> Result<Credits> {
    bytes.checked_mul(price).ok_or(ProtocolError::Overflow("operation fees"))
}

/// Fold `refund` into `refunds`, summing credits per epoch for an identity already present
pub fn merge_fee_refund(refunds: &mut Vec<FeeRefund>, refund: &FeeRefund) -> Result<()> {
    let Some(existing) = refunds.iter_mut().find(|entry| entry.identifier == refund.identifier) else {
        refunds.push(refund.clone());
        return Ok(());
    };

    for (&epoch, &credits) in &refund.credits_per_epoch {
        let total = existing.credits_per_epoch.entry(epoch).or_insert(0);
        *total = total.checked_add(credits).ok_or(ProtocolError::Overflow("fee refunds"))?;
    }
    Ok(())
}

/// Default operation reducer priced by `costs`; refunds are merged by identity
pub fn calculate_operation_fees(operations: &[Operation], costs: &FeeCosts) -> Result<OperationFees> {
    let mut fees = OperationFees::default();

    for operation in operations {
        match operation {
            Operation::Read { key_size, value_size } => {
                let bytes = add(*key_size, *value_size)?;
                fees.processing_fee = add(fees.processing_fee, costs.read_base_processing_cost)?;
                fees.processing_fee = add(fees.processing_fee, per_byte(bytes, costs.read_credit_per_byte)?)?;
            }
            Operation::Create { key_size, value_size } => {
                let bytes = add(*key_size, *value_size)?;
                fees.storage_fee = add(fees.storage_fee, per_byte(bytes, costs.storage_credit_per_byte)?)?;
                fees.processing_fee = add(fees.processing_fee, costs.write_base_processing_cost)?;
                fees.processing_fee = add(fees.processing_fee, per_byte(bytes, costs.write_credit_per_byte)?)?;
            }
            Operation::SignatureVerification { key_type } => {
                fees.processing_fee = add(fees.processing_fee, costs.signature_verification_cost(*key_type))?;
            }
            Operation::PreCalculated { storage_cost, processing_cost, fee_refunds } => {
                fees.storage_fee = add(fees.storage_fee, *storage_cost)?;
                fees.processing_fee = add(fees.processing_fee, *processing_cost)?;
                for refund in fee_refunds {
                    merge_fee_refund(&mut fees.fee_refunds, refund)?;
                }
            }
        }
    }

    Ok(fees)
}

fn to_i64(value: i128) -> Result<i64> {
    i64::try_from(value).map_err(|_| ProtocolError::Overflow("state transition fee"))
}

/// Price the operations recorded on `ctx` with the default reducer
pub async fn calculate_state_transition_fee(
    ctx: &mut ExecutionContext,
    owner_id: &Identifier,
    user_tip: i64,
    costs: &FeeCosts,
    repository: &dyn StateRepository,
) -> Result<i64> {
    calculate_state_transition_fee_with(ctx, owner_id, user_tip, repository, |operations| {
        calculate_operation_fees(operations, costs)
    })
    .await
}

/// Price the operations recorded on `ctx` with a caller supplied reducer.
///
/// Records the full breakdown on `ctx` and returns the desired amount. Refund entries are
/// merged by identity; a transition may refund at most one identity, and only its owner.
pub async fn calculate_state_transition_fee_with<F>(
    ctx: &mut ExecutionContext,
    owner_id: &Identifier,
    user_tip: i64,
    repository: &dyn StateRepository,
    reducer: F,
) -> Result<i64>
where
    F: FnOnce(&[Operation]) -> Result<OperationFees>,
{
    let OperationFees { storage_fee, processing_fee, fee_refunds: reduced } = reducer(ctx.operations())?;

    let mut fee_refunds = Vec::with_capacity(reduced.len());
    for refund in &reduced {
        merge_fee_refund(&mut fee_refunds, refund)?;
    }

    if fee_refunds.len() > 1 {
        return Err(ProtocolError::MultipleFeeRefunds { count: fee_refunds.len() });
    }

    let mut total_refunds: Credits = 0;
    let mut refund_distribution = Vec::new();

    if let Some(refund) = fee_refunds.first() {
        if refund.identifier != *owner_id {
            return Err(ProtocolError::FeeRefundForAnotherIdentity {
                owner_id: *owner_id,
                refund_identifier: refund.identifier,
            });
        }

        total_refunds = refund.total().ok_or(ProtocolError::Overflow("fee refunds"))?;

        for (&epoch, &credits) in &refund.credits_per_epoch {
            let (amount, leftovers) = repository
                .calculate_storage_fee_distribution_amount_and_leftovers(credits, epoch)
                .await?;
            refund_distribution.push(RefundDistribution { epoch, amount, leftovers });
        }
    }

    let tip = user_tip as i128;
    let required_amount = to_i64(storage_fee as i128 - total_refunds as i128 + tip)?;
    let desired_amount =
        to_i64(storage_fee as i128 + processing_fee as i128 - total_refunds as i128 + tip)?;

    debug!(
        storage_fee,
        processing_fee,
        total_refunds,
        required_amount,
        desired_amount,
        "calculated state transition fee"
    );

    ctx.set_last_calculated_fee(FeeBreakdown {
        storage_fee,
        processing_fee,
        fee_refunds,
        total_refunds,
        refund_distribution,
        user_tip,
        required_amount,
        desired_amount,
    });

    Ok(desired_amount)
}

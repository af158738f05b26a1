//! Per-transition execution context
//!
//! Collects the operations a transition performs while it is validated and applied so
//! they can be priced afterwards. One context belongs to exactly one transition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::KeyType;
use crate::types::{Credits, EpochIndex, Identifier};

/// Credits returned to an identity for storage it freed, split by the epoch that paid for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRefund {
    pub identifier: Identifier,
    pub credits_per_epoch: BTreeMap<EpochIndex, Credits>,
}

impl FeeRefund {
    pub fn total(&self) -> Option<Credits> {
        self.credits_per_epoch
            .values()
            .try_fold(0u64, |sum, credits| sum.checked_add(*credits))
    }
}

/// Storage or processing work performed on behalf of a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Read { key_size: u64, value_size: u64 },
    Create { key_size: u64, value_size: u64 },
    SignatureVerification { key_type: KeyType },
    PreCalculated {
        storage_cost: Credits,
        processing_cost: Credits,
        fee_refunds: Vec<FeeRefund>,
    },
}

/// Refund distribution reported by the repository for one epoch entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDistribution {
    pub epoch: EpochIndex,
    pub amount: Credits,
    pub leftovers: Credits,
}

/// Full fee breakdown recorded by the fee calculator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub storage_fee: Credits,
    pub processing_fee: Credits,
    pub fee_refunds: Vec<FeeRefund>,
    pub total_refunds: Credits,
    pub refund_distribution: Vec<RefundDistribution>,
    pub user_tip: i64,
    pub required_amount: i64,
    pub desired_amount: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    operations: Vec<Operation>,
    dry_run: bool,
    last_calculated_fee: Option<FeeBreakdown>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for fee estimation: repository lookups may be replaced by stand-ins and
    /// writes are not persisted
    pub fn dry_run() -> Self {
        Self { dry_run: true, ..Self::default() }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn disable_dry_run(&mut self) {
        self.dry_run = false;
    }

    pub fn add_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn add_operations(&mut self, operations: impl IntoIterator<Item = Operation>) {
        self.operations.extend(operations);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    pub fn set_last_calculated_fee(&mut self, breakdown: FeeBreakdown) {
        self.last_calculated_fee = Some(breakdown);
    }

    pub fn last_calculated_fee(&self) -> Option<&FeeBreakdown> {
        self.last_calculated_fee.as_ref()
    }
}

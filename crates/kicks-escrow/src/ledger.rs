//! # Settlement Ledger
//!
//! Turns a closed transaction into the money movements the payment
//! collaborator must execute. Non-terminal transactions settle nothing.
//!
//! | Status | Entries |
//! |---|---|
//! | `released` | seller payout, platform fee |
//! | `refunded`, `cancelled` | full refund of `total_amount` to the buyer |

use kicks_core::{Money, UserId};
use serde::Serialize;

use crate::status::EscrowStatus;
use crate::transaction::EscrowTransaction;

/// Kind of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    SellerPayout,
    PlatformFee,
    BuyerRefund,
}

/// Who receives the funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Beneficiary {
    Seller(UserId),
    Buyer(UserId),
    Platform,
}

/// One instruction for the payment collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementEntry {
    pub kind: EntryKind,
    pub beneficiary: Beneficiary,
    pub amount: Money,
}

/// Ledger entries for `tx`. Zero-amount entries are omitted.
pub fn settlement_entries(tx: &EscrowTransaction) -> Vec<SettlementEntry> {
    let entries = match tx.status {
        EscrowStatus::Released => vec![
            SettlementEntry {
                kind: EntryKind::SellerPayout,
                beneficiary: Beneficiary::Seller(tx.seller_id.clone()),
                amount: tx.seller_payout,
            },
            SettlementEntry {
                kind: EntryKind::PlatformFee,
                beneficiary: Beneficiary::Platform,
                amount: tx.platform_fee,
            },
        ],
        EscrowStatus::Refunded | EscrowStatus::Cancelled => vec![SettlementEntry {
            kind: EntryKind::BuyerRefund,
            beneficiary: Beneficiary::Buyer(tx.buyer_id.clone()),
            amount: tx.total_amount,
        }],
        EscrowStatus::Created
        | EscrowStatus::PaymentHeld
        | EscrowStatus::Shipped
        | EscrowStatus::Delivered
        | EscrowStatus::Disputed => Vec::new(),
    };
    entries.into_iter().filter(|e| !e.amount.is_zero()).collect()
}

/// Sum of all entries; equals `total_amount` for any settled transaction.
pub fn settled_total(tx: &EscrowTransaction) -> Option<Money> {
    let entries = settlement_entries(tx);
    if entries.is_empty() {
        return None;
    }
    entries
        .iter()
        .try_fold(Money::zero(tx.total_amount.currency()), |acc, e| {
            acc.checked_add(&e.amount)
        })
        .ok()
}

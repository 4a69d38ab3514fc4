//! # Escrow Transaction
//!
//! One record per marketplace order. Amounts are fixed when the record is
//! opened and never change; everything after that is a status transition.
//!
//! ## Invariants
//!
//! - `total_amount == item_amount + shipping_amount`
//! - `platform_fee == round_half_up(item_amount * fee_rate)` (never on shipping)
//! - `seller_payout + platform_fee == total_amount`
//! - `buyer_id != seller_id`
//!
//! [`EscrowTransaction::verify_invariants`] re-checks these on every read.
//! A record that fails is reported as corrupt, never repaired in place.

use chrono::{DateTime, Utc};
use kicks_core::{FeeRate, Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::dispute::Dispute;
use crate::error::EscrowError;
use crate::status::EscrowStatus;

/// Input for opening an escrow hold on a captured payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    /// Marketplace order.
    pub order_id: OrderId,
    /// Paying account.
    pub buyer_id: UserId,
    /// Selling account.
    pub seller_id: UserId,
    /// Item price.
    pub item_amount: Money,
    /// Shipping charge.
    pub shipping_amount: Money,
    /// Fee rate override; the configured default applies when absent.
    pub fee_rate: Option<FeeRate>,
    /// Escrow window override; the configured default applies when absent.
    pub escrow_days: Option<u32>,
    /// Payment collaborator's capture reference, recorded on the `paid` event.
    pub payment_reference: Option<String>,
}

/// The escrow record for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub item_amount: Money,
    pub shipping_amount: Money,
    pub total_amount: Money,
    pub fee_rate: FeeRate,
    pub platform_fee: Money,
    pub seller_payout: Money,
    pub status: EscrowStatus,
    /// Days between delivery and automatic release. Zero releases on delivery.
    pub escrow_days: u32,
    pub tracking_number: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Kept while a dispute is open, but no longer drives release.
    pub escrow_expires_at: Option<DateTime<Utc>>,
    pub dispute: Option<Dispute>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Number of events appended so far. Used as the compare-and-swap token.
    pub version: u64,
}

/// Fee split for an item and shipping charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSplit {
    pub total_amount: Money,
    pub platform_fee: Money,
    pub seller_payout: Money,
}

/// Compute total, fee and payout. The fee is charged on the item only.
pub fn compute_fee_split(
    item_amount: Money,
    shipping_amount: Money,
    fee_rate: FeeRate,
) -> Result<FeeSplit, EscrowError> {
    let total_amount = item_amount.checked_add(&shipping_amount)?;
    let platform_fee = item_amount.apply_rate(fee_rate);
    let seller_payout = total_amount.checked_sub(&platform_fee)?;
    Ok(FeeSplit {
        total_amount,
        platform_fee,
        seller_payout,
    })
}

impl EscrowTransaction {
    /// Build a record in `created` status with version 0.
    pub(crate) fn open(
        new: &NewTransaction,
        fee_rate: FeeRate,
        escrow_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, EscrowError> {
        if new.buyer_id == new.seller_id {
            return Err(EscrowError::invalid_field(
                "seller_id",
                "seller must be a different account from the buyer",
            ));
        }
        let split = compute_fee_split(new.item_amount, new.shipping_amount, fee_rate)?;
        Ok(Self {
            order_id: new.order_id.clone(),
            buyer_id: new.buyer_id.clone(),
            seller_id: new.seller_id.clone(),
            item_amount: new.item_amount,
            shipping_amount: new.shipping_amount,
            total_amount: split.total_amount,
            fee_rate,
            platform_fee: split.platform_fee,
            seller_payout: split.seller_payout,
            status: EscrowStatus::Created,
            escrow_days,
            tracking_number: None,
            shipped_at: None,
            delivered_at: None,
            escrow_expires_at: None,
            dispute: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            version: 0,
        })
    }

    /// Whether an unresolved dispute is attached.
    pub fn has_open_dispute(&self) -> bool {
        self.dispute.as_ref().is_some_and(Dispute::is_open)
    }

    /// Whether the escrow window has elapsed and the record awaits release.
    pub fn is_due_for_release(&self, now: DateTime<Utc>) -> bool {
        self.status == EscrowStatus::Delivered
            && !self.has_open_dispute()
            && self.escrow_expires_at.is_some_and(|at| at <= now)
    }

    /// Re-check the stored invariants.
    ///
    /// # Errors
    ///
    /// [`EscrowError::CorruptRecord`] naming the first failed invariant.
    pub fn verify_invariants(&self) -> Result<(), EscrowError> {
        let corrupt = |detail: String| EscrowError::CorruptRecord {
            order_id: self.order_id.clone(),
            detail,
        };
        if self.buyer_id == self.seller_id {
            return Err(corrupt("buyer and seller are the same account".to_string()));
        }
        let split = compute_fee_split(self.item_amount, self.shipping_amount, self.fee_rate)
            .map_err(|e| corrupt(format!("amounts do not combine: {e}")))?;
        if split.total_amount != self.total_amount {
            return Err(corrupt(format!(
                "total {} != item {} + shipping {}",
                self.total_amount, self.item_amount, self.shipping_amount
            )));
        }
        if split.platform_fee != self.platform_fee {
            return Err(corrupt(format!(
                "platform fee {} does not match {} of {}",
                self.platform_fee, self.fee_rate, self.item_amount
            )));
        }
        if split.seller_payout != self.seller_payout {
            return Err(corrupt(format!(
                "payout {} + fee {} != total {}",
                self.seller_payout, self.platform_fee, self.total_amount
            )));
        }
        if self.status.is_terminal() != self.closed_at.is_some() {
            return Err(corrupt(format!(
                "status {} inconsistent with closed_at",
                self.status
            )));
        }
        if self.status == EscrowStatus::Disputed && self.dispute.is_none() {
            return Err(corrupt("disputed without a dispute record".to_string()));
        }
        if self.delivered_at.is_some() && self.shipped_at.is_none() {
            return Err(corrupt("delivered without a shipment".to_string()));
        }
        Ok(())
    }
}

//! # Dispute Manager
//!
//! The dispute reason catalog, submission validation, and the two eligibility
//! policies: whether a dispute may be opened and whether an order may be
//! cancelled. Both policies are pure functions of the transaction so the UI
//! can ask before acting and the engine can enforce the same answer.
//!
//! ## Validation
//!
//! A submission is checked as a whole. Every rejected field is reported at
//! once and nothing is partially accepted: an oversized evidence file rejects
//! the submission rather than being dropped from it.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{Actor, ActorRole};
use crate::config::DisputeConfig;
use crate::error::{EscrowError, FieldError};
use crate::status::EscrowStatus;
use crate::transaction::EscrowTransaction;

/// Version of the reason catalog. Bumped when reasons are added or relabelled.
pub const CATALOG_VERSION: u32 = 1;

// ── Reason Catalog ─────────────────────────────────────────────────────

/// Why the buyer is disputing the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    /// Tracking shows delivered but nothing arrived, or it never shipped.
    ItemNotReceived,
    /// Size, colorway or condition differs from the listing.
    NotAsDescribed,
    /// Buyer believes the pair is not authentic.
    Counterfeit,
    /// Item or box damaged in transit.
    Damaged,
    /// A different product was sent.
    WrongItem,
    /// Anything else; the description carries the detail.
    Other,
}

impl DisputeReason {
    /// Every reason, in display order.
    pub const ALL: [DisputeReason; 6] = [
        Self::ItemNotReceived,
        Self::NotAsDescribed,
        Self::Counterfeit,
        Self::Damaged,
        Self::WrongItem,
        Self::Other,
    ];

    /// The wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ItemNotReceived => "item_not_received",
            Self::NotAsDescribed => "not_as_described",
            Self::Counterfeit => "counterfeit",
            Self::Damaged => "damaged",
            Self::WrongItem => "wrong_item",
            Self::Other => "other",
        }
    }

    /// Label shown to buyers and arbiters.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ItemNotReceived => "Item not received",
            Self::NotAsDescribed => "Item not as described",
            Self::Counterfeit => "Suspected counterfeit",
            Self::Damaged => "Item arrived damaged",
            Self::WrongItem => "Wrong item received",
            Self::Other => "Other",
        }
    }
}

impl std::fmt::Display for DisputeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DisputeReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.code() == s.trim())
            .ok_or_else(|| format!("\"{s}\" is not a known dispute reason"))
    }
}

/// One catalog row, as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Wire code.
    pub code: &'static str,
    /// Display label.
    pub label: &'static str,
}

/// The versioned reason catalog.
pub fn dispute_catalog() -> (u32, Vec<CatalogEntry>) {
    let entries = DisputeReason::ALL
        .iter()
        .map(|r| CatalogEntry {
            code: r.code(),
            label: r.label(),
        })
        .collect();
    (CATALOG_VERSION, entries)
}

// ── Dispute Records ────────────────────────────────────────────────────

/// A reference to an evidence file held by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Opaque storage key or URL.
    pub reference: String,
    /// MIME type reported at upload.
    pub content_type: String,
    /// File size reported at upload.
    pub size_bytes: u64,
}

/// Raw dispute input from the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeSubmission {
    /// Catalog code.
    pub reason: String,
    /// Free-text description.
    pub description: String,
    /// Evidence references.
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSubmission {
    /// Parsed reason.
    pub reason: DisputeReason,
    /// Trimmed description.
    pub description: String,
    /// Evidence, unchanged.
    pub evidence: Vec<EvidenceRef>,
}

/// How an arbiter closed a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Pay the seller.
    Released,
    /// Refund the buyer.
    Refunded,
    /// Cancel the order and refund the buyer.
    Cancelled,
}

impl ResolutionOutcome {
    /// Status the transaction moves to.
    pub fn target_status(&self) -> EscrowStatus {
        match self {
            Self::Released => EscrowStatus::Released,
            Self::Refunded => EscrowStatus::Refunded,
            Self::Cancelled => EscrowStatus::Cancelled,
        }
    }
}

/// The arbiter's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolution {
    /// Outcome.
    pub outcome: ResolutionOutcome,
    /// Arbiter's note, if any.
    pub note: Option<String>,
    /// Arbiter who decided.
    pub resolved_by: Actor,
}

/// A dispute attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// Catalog reason.
    pub reason: DisputeReason,
    /// Buyer's description.
    pub description: String,
    /// Evidence references.
    pub evidence_refs: Vec<EvidenceRef>,
    /// When it was opened.
    pub opened_at: DateTime<Utc>,
    /// Who opened it.
    pub opened_by: Actor,
    /// When it was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// The decision, once made.
    pub resolution: Option<DisputeResolution>,
}

impl Dispute {
    /// Whether the dispute is still awaiting a decision.
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

// ── Validation ─────────────────────────────────────────────────────────

/// Validate a submission against `limits`, reporting every bad field.
pub fn validate_submission(
    submission: &DisputeSubmission,
    limits: &DisputeConfig,
) -> Result<ValidatedSubmission, EscrowError> {
    let mut errors = Vec::new();

    let reason = match submission.reason.parse::<DisputeReason>() {
        Ok(r) => Some(r),
        Err(msg) => {
            errors.push(FieldError::new("reason", msg));
            None
        }
    };

    let description = submission.description.trim();
    let chars = description.chars().count();
    if chars < limits.description_min_chars {
        errors.push(FieldError::new(
            "description",
            format!(
                "must be at least {} characters, got {chars}",
                limits.description_min_chars
            ),
        ));
    } else if chars > limits.description_max_chars {
        errors.push(FieldError::new(
            "description",
            format!(
                "must be at most {} characters, got {chars}",
                limits.description_max_chars
            ),
        ));
    }

    if submission.evidence.len() > limits.max_evidence {
        errors.push(FieldError::new(
            "evidence",
            format!(
                "at most {} files may be attached, got {}",
                limits.max_evidence,
                submission.evidence.len()
            ),
        ));
    }
    for (i, item) in submission.evidence.iter().enumerate() {
        if item.reference.trim().is_empty() {
            errors.push(FieldError::new(
                format!("evidence[{i}].reference"),
                "must not be empty",
            ));
        }
        let content_type = item.content_type.trim().to_ascii_lowercase();
        if !limits
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&content_type))
        {
            errors.push(FieldError::new(
                format!("evidence[{i}].content_type"),
                format!("\"{}\" is not an accepted image type", item.content_type),
            ));
        }
        if item.size_bytes > limits.max_evidence_bytes {
            errors.push(FieldError::new(
                format!("evidence[{i}].size_bytes"),
                format!(
                    "{} bytes exceeds the {} byte limit",
                    item.size_bytes, limits.max_evidence_bytes
                ),
            ));
        }
    }

    match reason {
        Some(reason) if errors.is_empty() => Ok(ValidatedSubmission {
            reason,
            description: description.to_string(),
            evidence: submission.evidence.clone(),
        }),
        _ => Err(EscrowError::ValidationFailed { errors }),
    }
}

// ── Eligibility ────────────────────────────────────────────────────────

/// Answer to "may the buyer open a dispute?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisputeEligibility {
    /// Whether a dispute may be opened now.
    pub can_dispute: bool,
    /// Why not, when refused.
    pub reason: Option<String>,
}

/// Answer to "may this role cancel the order?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelEligibility {
    /// Whether cancellation is allowed now.
    pub can_cancel: bool,
    /// Why not, when refused.
    pub reason: Option<String>,
}

fn refuse_dispute(reason: &str) -> DisputeEligibility {
    DisputeEligibility {
        can_dispute: false,
        reason: Some(reason.to_string()),
    }
}

fn refuse_cancel(reason: &str) -> CancelEligibility {
    CancelEligibility {
        can_cancel: false,
        reason: Some(reason.to_string()),
    }
}

/// Whether a dispute may be opened on `tx`.
///
/// Disputes are accepted only once the item is on its way or delivered, and
/// only one dispute per order.
pub fn can_open_dispute(tx: &EscrowTransaction) -> DisputeEligibility {
    if tx.dispute.is_some() {
        return refuse_dispute(match tx.dispute.as_ref().map(Dispute::is_open) {
            Some(true) => "A dispute is already open",
            _ => "A dispute has already been resolved for this order",
        });
    }
    match tx.status {
        EscrowStatus::Shipped | EscrowStatus::Delivered => DisputeEligibility {
            can_dispute: true,
            reason: None,
        },
        EscrowStatus::Created => refuse_dispute("Payment has not been captured yet"),
        EscrowStatus::PaymentHeld => {
            refuse_dispute("Order has not shipped yet; cancel the order instead")
        }
        EscrowStatus::Disputed => refuse_dispute("A dispute is already open"),
        EscrowStatus::Released => refuse_dispute("Order already released"),
        EscrowStatus::Refunded => refuse_dispute("Order already refunded"),
        EscrowStatus::Cancelled => refuse_dispute("Order was cancelled"),
    }
}

/// Whether `role` may cancel `tx`.
///
/// Buyers and sellers may cancel until the item ships. After shipping only an
/// arbiter may cancel, and once delivered no one may: problems after delivery
/// go through a dispute.
pub fn can_cancel_order(tx: &EscrowTransaction, role: ActorRole) -> CancelEligibility {
    let allowed = CancelEligibility {
        can_cancel: true,
        reason: None,
    };
    match tx.status {
        EscrowStatus::Created => refuse_cancel("Payment has not been captured yet"),
        EscrowStatus::PaymentHeld => match role {
            ActorRole::Buyer | ActorRole::Seller | ActorRole::Arbiter => allowed,
            _ => refuse_cancel("Only the buyer, the seller or an arbiter may cancel an order"),
        },
        EscrowStatus::Shipped => match role {
            ActorRole::Arbiter => allowed,
            _ => refuse_cancel(
                "Order has already shipped; open a dispute if there is a problem with it",
            ),
        },
        EscrowStatus::Delivered => refuse_cancel(
            "Delivered orders cannot be cancelled; open a dispute during the escrow window instead",
        ),
        EscrowStatus::Disputed => {
            refuse_cancel("Order is under dispute; it can only be closed by dispute resolution")
        }
        EscrowStatus::Released => refuse_cancel("Order already released"),
        EscrowStatus::Refunded => refuse_cancel("Order already refunded"),
        EscrowStatus::Cancelled => refuse_cancel("Order already cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests::sample_transaction;

    fn submission(description: &str, evidence: Vec<EvidenceRef>) -> DisputeSubmission {
        DisputeSubmission {
            reason: "not_as_described".to_string(),
            description: description.to_string(),
            evidence,
        }
    }

    fn photo(size: u64) -> EvidenceRef {
        EvidenceRef {
            reference: "s3://evidence/1.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            size_bytes: size,
        }
    }

    fn field_names(err: EscrowError) -> Vec<String> {
        match err {
            EscrowError::ValidationFailed { errors } => {
                errors.into_iter().map(|e| e.field).collect()
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn catalog_has_six_labelled_reasons() {
        let (version, entries) = dispute_catalog();
        assert_eq!(version, CATALOG_VERSION);
        assert_eq!(entries.len(), 6);
        assert!(entries.iter().all(|e| !e.label.is_empty()));
        assert_eq!(entries[2].code, "counterfeit");
    }

    #[test]
    fn valid_submission_is_trimmed() {
        let ok = validate_submission(
            &submission("   The left shoe is a different size.  ", vec![photo(1024)]),
            &DisputeConfig::default(),
        )
        .unwrap();
        assert_eq!(ok.reason, DisputeReason::NotAsDescribed);
        assert_eq!(ok.description, "The left shoe is a different size.");
        assert_eq!(ok.evidence.len(), 1);
    }

    #[test]
    fn short_description_rejected() {
        let err =
            validate_submission(&submission("too short", vec![]), &DisputeConfig::default())
                .unwrap_err();
        assert_eq!(field_names(err), vec!["description"]);
    }

    #[test]
    fn description_counts_characters_not_bytes() {
        let limits = DisputeConfig {
            description_max_chars: 500,
            ..DisputeConfig::default()
        };
        // 500 multi-byte characters is exactly at the limit.
        let text = "é".repeat(500);
        assert!(validate_submission(&submission(&text, vec![]), &limits).is_ok());
        let text = "é".repeat(501);
        assert!(validate_submission(&submission(&text, vec![]), &limits).is_err());
    }

    #[test]
    fn every_bad_field_is_reported() {
        let mut sub = submission(
            "Box was crushed and the toe box is creased badly.",
            vec![
                photo(11 * 1024 * 1024),
                EvidenceRef {
                    reference: String::new(),
                    content_type: "application/pdf".to_string(),
                    size_bytes: 10,
                },
            ],
        );
        sub.reason = "changed_my_mind".to_string();
        let fields = field_names(validate_submission(&sub, &DisputeConfig::default()).unwrap_err());
        assert_eq!(
            fields,
            vec![
                "reason",
                "evidence[0].size_bytes",
                "evidence[1].reference",
                "evidence[1].content_type",
            ]
        );
    }

    #[test]
    fn too_many_evidence_files_rejected() {
        let evidence = (0..6).map(|_| photo(100)).collect();
        let err = validate_submission(
            &submission("Six photos of the wrong colorway arriving.", evidence),
            &DisputeConfig::default(),
        )
        .unwrap_err();
        assert_eq!(field_names(err), vec!["evidence"]);
    }

    #[test]
    fn content_type_match_is_case_insensitive() {
        let mut item = photo(100);
        item.content_type = "IMAGE/PNG".to_string();
        assert!(validate_submission(
            &submission("Sole is separating from the upper already.", vec![item]),
            &DisputeConfig::default(),
        )
        .is_ok());
    }

    #[test]
    fn dispute_eligibility_by_status() {
        let mut tx = sample_transaction();
        tx.status = EscrowStatus::Shipped;
        assert!(can_open_dispute(&tx).can_dispute);
        tx.status = EscrowStatus::Delivered;
        assert!(can_open_dispute(&tx).can_dispute);

        tx.status = EscrowStatus::PaymentHeld;
        let e = can_open_dispute(&tx);
        assert!(!e.can_dispute);
        assert!(e.reason.unwrap().contains("cancel"));

        tx.status = EscrowStatus::Released;
        assert_eq!(
            can_open_dispute(&tx).reason.as_deref(),
            Some("Order already released")
        );
    }

    #[test]
    fn second_dispute_refused() {
        let mut tx = sample_transaction();
        tx.status = EscrowStatus::Disputed;
        tx.dispute = Some(Dispute {
            reason: DisputeReason::Damaged,
            description: "Crushed box and scuffed toe caps on both.".to_string(),
            evidence_refs: vec![],
            opened_at: tx.created_at,
            opened_by: Actor::Buyer(tx.buyer_id.clone()),
            resolved_at: None,
            resolution: None,
        });
        assert_eq!(
            can_open_dispute(&tx).reason.as_deref(),
            Some("A dispute is already open")
        );
    }

    #[test]
    fn cancel_policy_by_status_and_role() {
        let mut tx = sample_transaction();
        tx.status = EscrowStatus::PaymentHeld;
        assert!(can_cancel_order(&tx, ActorRole::Buyer).can_cancel);
        assert!(can_cancel_order(&tx, ActorRole::Seller).can_cancel);
        assert!(!can_cancel_order(&tx, ActorRole::Scheduler).can_cancel);

        tx.status = EscrowStatus::Shipped;
        assert!(!can_cancel_order(&tx, ActorRole::Buyer).can_cancel);
        assert!(can_cancel_order(&tx, ActorRole::Arbiter).can_cancel);

        tx.status = EscrowStatus::Delivered;
        for role in [ActorRole::Buyer, ActorRole::Seller, ActorRole::Arbiter] {
            let e = can_cancel_order(&tx, role);
            assert!(!e.can_cancel);
            assert!(e.reason.unwrap().contains("dispute"));
        }

        tx.status = EscrowStatus::Disputed;
        assert!(!can_cancel_order(&tx, ActorRole::Buyer).can_cancel);
        assert!(!can_cancel_order(&tx, ActorRole::Arbiter).can_cancel);
    }

    #[test]
    fn outcome_targets() {
        assert_eq!(
            ResolutionOutcome::Refunded.target_status(),
            EscrowStatus::Refunded
        );
        assert!(ResolutionOutcome::Released.target_status().is_terminal());
    }
}

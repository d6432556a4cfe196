//! Error types for orderhub storage operations

use crate::record::ColumnKind;
use std::fmt;
use thiserror::Error;

/// Entity kinds that can be looked up in the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Order,
    Delivery,
    Payment,
    Item,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Order => "order",
            EntityKind::Delivery => "delivery",
            EntityKind::Payment => "payment",
            EntityKind::Item => "item",
        };
        f.write_str(name)
    }
}

/// Named steps of the save and hydration pipelines.
///
/// Every error leaving the aggregate store carries the stage it failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Idempotency gate: root lookup by `order_uid`.
    CheckExisting,
    /// Fan-out group for the delivery and payment upserts.
    SaveDeliveryAndPayment,
    UpsertDelivery,
    UpsertPayment,
    InsertOrder,
    /// Fan-out group for the per-item upsert and link tasks.
    SaveItems,
    UpsertItem,
    LinkItem,
    FetchOrder,
    FetchRecent,
    /// Fan-out group for the delivery, payment and items reads of one root.
    Hydrate,
    FetchDelivery,
    FetchPayment,
    FetchItems,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CheckExisting => "check_existing",
            Stage::SaveDeliveryAndPayment => "save_delivery_and_payment",
            Stage::UpsertDelivery => "upsert_delivery",
            Stage::UpsertPayment => "upsert_payment",
            Stage::InsertOrder => "insert_order",
            Stage::SaveItems => "save_items",
            Stage::UpsertItem => "upsert_item",
            Stage::LinkItem => "link_item",
            Stage::FetchOrder => "fetch_order",
            Stage::FetchRecent => "fetch_recent",
            Stage::Hydrate => "hydrate",
            Stage::FetchDelivery => "fetch_delivery",
            Stage::FetchPayment => "fetch_payment",
            Stage::FetchItems => "fetch_items",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed record shape when binding or scanning a row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("{record} expects at least {expected} columns, got {actual}")]
    Arity {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("column '{column}' of {record} expects {expected}, got {actual}")]
    KindMismatch {
        record: &'static str,
        column: &'static str,
        expected: ColumnKind,
        actual: ColumnKind,
    },
}

/// Errors crossing the aggregate store boundary.
///
/// Dedup conflicts are never errors: they resolve to the existing row.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("{entity} not found: {key}")]
    NotFound { entity: EntityKind, key: String },

    #[error("Backing store unavailable during {operation}: {reason}")]
    Connectivity { operation: String, reason: String },

    /// First child failure of a fan-out group; sibling results are discarded.
    #[error("Fan-out group {stage} failed: {source}")]
    PartialAggregate {
        stage: Stage,
        source: Box<StoreError>,
    },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        source: Box<StoreError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task failed: {reason}")]
    TaskFailed { reason: String },
}

impl StoreError {
    pub fn not_found(entity: EntityKind, key: impl fmt::Display) -> Self {
        StoreError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn connectivity(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        StoreError::Connectivity {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap this error with the stage it failed in.
    pub fn at(self, stage: Stage) -> Self {
        StoreError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Outermost stage recorded on this error, if any.
    pub fn failing_stage(&self) -> Option<Stage> {
        match self {
            StoreError::Stage { stage, .. } | StoreError::PartialAggregate { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// Every stage on the wrapping chain, outermost first.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        let mut current = self;
        loop {
            match current {
                StoreError::Stage { stage, source }
                | StoreError::PartialAggregate { stage, source } => {
                    stages.push(*stage);
                    current = source.as_ref();
                }
                _ => return stages,
            }
        }
    }

    /// The innermost error, with all stage wrappers removed.
    pub fn root_cause(&self) -> &StoreError {
        let mut current = self;
        while let StoreError::Stage { source, .. } | StoreError::PartialAggregate { source, .. } =
            current
        {
            current = source.as_ref();
        }
        current
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), StoreError::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), StoreError::Cancelled)
    }
}

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_chain_outermost_first() {
        let err = StoreError::connectivity("upsert", "connection reset")
            .at(Stage::UpsertPayment);
        let err = StoreError::PartialAggregate {
            stage: Stage::SaveDeliveryAndPayment,
            source: Box::new(err),
        };

        assert_eq!(err.failing_stage(), Some(Stage::SaveDeliveryAndPayment));
        assert_eq!(
            err.stages(),
            vec![Stage::SaveDeliveryAndPayment, Stage::UpsertPayment]
        );
        assert!(matches!(err.root_cause(), StoreError::Connectivity { .. }));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_through_wrappers() {
        let err = StoreError::not_found(EntityKind::Order, "u1").at(Stage::FetchOrder);
        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("fetch_order"));
        assert!(msg.contains("order not found: u1"));
    }

    #[test]
    fn test_mapping_error_display() {
        let err = MappingError::KindMismatch {
            record: "payments",
            column: "amount",
            expected: ColumnKind::BigInt,
            actual: ColumnKind::Text,
        };
        let msg = StoreError::from(err).to_string();
        assert!(msg.contains("amount"));
        assert!(msg.contains("payments"));
    }
}

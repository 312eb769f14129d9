//! History ledger entries.
//!
//! One entry is written, atomically with the order change, for every
//! successful status transition including the initial `PENDING`. Entries
//! are immutable: nothing in the engine exposes an edit or delete.

use chrono::{DateTime, Utc};
use common::{HistoryEntryId, OrderId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{OrderStatus, StatusChangedData};

/// An immutable record of one status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryEntryId,
    pub order_id: OrderId,

    /// Order version produced by the transition; orders entries that share
    /// a timestamp.
    pub sequence: Version,

    /// `None` only for the creation entry.
    pub previous_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_by: String,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Builds the entry for a transition.
    pub fn append(
        order_id: OrderId,
        sequence: Version,
        previous_status: Option<OrderStatus>,
        new_status: OrderStatus,
        changed_by: impl Into<String>,
        notes: Option<String>,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HistoryEntryId::new(),
            order_id,
            sequence,
            previous_status,
            new_status,
            changed_by: changed_by.into(),
            notes,
            changed_at,
        }
    }

    /// Builds the entry for an applied status change.
    pub fn for_status_change(order_id: OrderId, sequence: Version, data: &StatusChangedData) -> Self {
        Self::append(
            order_id,
            sequence,
            Some(data.from),
            data.to,
            data.actor.clone(),
            data.notes.clone(),
            data.changed_at,
        )
    }
}

/// Inconsistency found while replaying a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("Entry {sequence} starts from {found:?} but the order was at {expected:?}")]
    Gap {
        sequence: Version,
        expected: Option<OrderStatus>,
        found: Option<OrderStatus>,
    },

    #[error("Entry {sequence} records an illegal step {from:?} -> {to}")]
    IllegalStep {
        sequence: Version,
        from: Option<OrderStatus>,
        to: OrderStatus,
    },
}

/// Replays ledger entries (sorted ascending) from the empty state.
///
/// Returns the status the path ends in, or `None` for an empty ledger.
pub fn replay(entries: &[HistoryEntry]) -> Result<Option<OrderStatus>, ReplayError> {
    let mut current: Option<OrderStatus> = None;

    for entry in entries {
        if entry.previous_status != current {
            return Err(ReplayError::Gap {
                sequence: entry.sequence,
                expected: current,
                found: entry.previous_status,
            });
        }

        let legal = match current {
            None => entry.new_status == OrderStatus::Pending,
            Some(from) => from.can_transition_to(entry.new_status),
        };
        if !legal {
            return Err(ReplayError::IllegalStep {
                sequence: entry.sequence,
                from: current,
                to: entry.new_status,
            });
        }

        current = Some(entry.new_status);
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: i64, from: Option<OrderStatus>, to: OrderStatus) -> HistoryEntry {
        HistoryEntry::append(
            OrderId::new(),
            Version::new(seq),
            from,
            to,
            "tester",
            None,
            Utc::now(),
        )
    }

    #[test]
    fn replay_of_empty_ledger_is_none() {
        assert_eq!(replay(&[]).unwrap(), None);
    }

    #[test]
    fn replay_follows_the_recorded_path() {
        let entries = vec![
            entry(1, None, OrderStatus::Pending),
            entry(2, Some(OrderStatus::Pending), OrderStatus::Approved),
            entry(3, Some(OrderStatus::Approved), OrderStatus::Cancelled),
        ];
        assert_eq!(replay(&entries).unwrap(), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn replay_detects_a_gap() {
        let entries = vec![
            entry(1, None, OrderStatus::Pending),
            entry(2, Some(OrderStatus::Approved), OrderStatus::Packed),
        ];
        assert!(matches!(replay(&entries), Err(ReplayError::Gap { .. })));
    }

    #[test]
    fn replay_detects_a_skipped_stage() {
        let entries = vec![
            entry(1, None, OrderStatus::Pending),
            entry(2, Some(OrderStatus::Pending), OrderStatus::Sent),
        ];
        assert!(matches!(
            replay(&entries),
            Err(ReplayError::IllegalStep { .. })
        ));
    }

    #[test]
    fn replay_requires_pending_first() {
        let entries = vec![entry(1, None, OrderStatus::Approved)];
        assert!(replay(&entries).is_err());
    }
}

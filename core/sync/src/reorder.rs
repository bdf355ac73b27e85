//! Reference-preserving reorder of an observable sequence.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::observable::ObservableVec;

/// Edits performed by [`reorder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderStats {
    pub inserted: usize,
    pub removed: usize,
}

impl ReorderStats {
    pub fn edits(&self) -> usize {
        self.inserted + self.removed
    }
}

/// Mutate `target` in place until it equals `desired` element for element.
///
/// `T`'s equality must be identity (a record id, a pointer), never value
/// equality, and `desired` must not repeat an element.
///
/// A single left-to-right pass: at each index `i`, an element already in
/// place is skipped; an element found later in `target` is removed from
/// there and inserted at `i`; any other element is inserted fresh. Elements
/// left past the end of `desired` are then removed from the back. Each edit
/// goes through the target's primitives, so observers receive one precise
/// notification per edit, and nothing is touched when `target` already
/// equals `desired`.
pub fn reorder<T: Clone + PartialEq>(target: &mut ObservableVec<T>, desired: &[T]) -> ReorderStats {
    let mut stats = ReorderStats::default();

    for (i, wanted) in desired.iter().enumerate() {
        if target.get(i) == Some(wanted) {
            continue;
        }
        if let Some(offset) = target[i..].iter().position(|item| item == wanted) {
            target.remove(i + offset);
            stats.removed += 1;
        }
        target.insert(i, wanted.clone());
        stats.inserted += 1;
    }

    while target.len() > desired.len() {
        target.remove(target.len() - 1);
        stats.removed += 1;
    }

    if target.len() != desired.len() {
        error!(
            target = target.len(),
            desired = desired.len(),
            "Projection length mismatch after reorder"
        );
        debug_assert_eq!(target.len(), desired.len(), "reorder left a length mismatch");
    }

    if stats.edits() > 0 {
        debug!(
            inserted = stats.inserted,
            removed = stats.removed,
            "Reordered projection"
        );
    }
    stats
}

/// Replace `target` wholesale with a single `Reset` notification.
pub fn reset<T: Clone>(target: &mut ObservableVec<T>, desired: &[T]) {
    target.reset(desired.to_vec());
}

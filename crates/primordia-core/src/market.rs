//! Label-keyed queues of posted goods with O(1) revocation on seller death.

use crate::{OrganismId, SaleId};
use slotmap::SlotMap;
use std::collections::VecDeque;
use tracing::debug;

/// One posted good. Lives in the arena while the offer stands; the seller
/// keeps the [`SaleId`] in its sold-items list so death can revoke the
/// posting without walking the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleItem {
    pub data: i32,
    pub label: usize,
    pub price: i32,
    pub seller_org: OrganismId,
    pub seller_cell: usize,
}

/// A fixed array of ordered queues indexed by label.
///
/// Queue entries are ids into a generational arena; revoking a posting
/// removes it from the arena only, and the stale queue entry is skipped the
/// next time the head is inspected.
#[derive(Debug, Default)]
pub struct Market {
    items: SlotMap<SaleId, SaleItem>,
    queues: Vec<VecDeque<SaleId>>,
    label_modulo: bool,
}

impl Market {
    #[must_use]
    pub fn new(size: usize, label_modulo: bool) -> Self {
        Self {
            items: SlotMap::with_key(),
            queues: vec![VecDeque::new(); size],
            label_modulo,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.queues.len()
    }

    /// Maps a raw label onto a queue index. With the modulo policy the
    /// label is folded into range; otherwise out-of-range labels are
    /// rejected and the operation quietly fails.
    fn resolve_label(&self, label: usize) -> Option<usize> {
        if self.label_modulo {
            Some(label % self.queues.len())
        } else if label < self.queues.len() {
            Some(label)
        } else {
            debug!(label, market_size = self.queues.len(), "market label out of range");
            None
        }
    }

    /// Appends a new posting to `market[label]`, returning its handle for
    /// the seller's sold-items list.
    pub fn post(
        &mut self,
        data: i32,
        label: usize,
        price: i32,
        seller_org: OrganismId,
        seller_cell: usize,
    ) -> Option<SaleId> {
        let slot = self.resolve_label(label)?;
        let id = self.items.insert(SaleItem {
            data,
            label: slot,
            price,
            seller_org,
            seller_cell,
        });
        self.queues[slot].push_back(id);
        Some(id)
    }

    /// Drops stale (revoked) entries off the front of a queue.
    fn skim(&mut self, slot: usize) {
        while let Some(&head) = self.queues[slot].front() {
            if self.items.contains_key(head) {
                break;
            }
            self.queues[slot].pop_front();
        }
    }

    /// Price of the live head of `market[label]`, if any.
    pub fn head_price(&mut self, label: usize) -> Option<i32> {
        let slot = self.resolve_label(label)?;
        self.skim(slot);
        let head = *self.queues[slot].front()?;
        Some(self.items[head].price)
    }

    /// Pops the live head of `market[label]`. Price and merit gating is
    /// the caller's business; this only dequeues.
    pub fn pop(&mut self, label: usize) -> Option<(SaleId, SaleItem)> {
        let slot = self.resolve_label(label)?;
        self.skim(slot);
        let head = self.queues[slot].pop_front()?;
        let item = self.items.remove(head)?;
        Some((head, item))
    }

    /// Revokes a posting by handle (seller death). The queue entry is left
    /// behind as a tombstone and skipped later.
    pub fn revoke(&mut self, id: SaleId) -> Option<SaleItem> {
        self.items.remove(id)
    }

    /// Whether a posting is still live.
    #[must_use]
    pub fn contains(&self, id: SaleId) -> bool {
        self.items.contains_key(id)
    }

    /// Live posting count under `label`.
    pub fn len(&mut self, label: usize) -> usize {
        let Some(slot) = self.resolve_label(label) else {
            return 0;
        };
        self.queues[slot]
            .iter()
            .filter(|id| self.items.contains_key(**id))
            .count()
    }

    /// Live posting count across all labels.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn org(raw: u64) -> OrganismId {
        KeyData::from_ffi(raw << 32 | 1).into()
    }

    #[test]
    fn postings_queue_in_fifo_order() {
        let mut market = Market::new(8, false);
        market.post(1, 3, 10, org(1), 5).expect("posted");
        market.post(2, 3, 20, org(2), 6).expect("posted");
        assert_eq!(market.len(3), 2);
        assert_eq!(market.head_price(3), Some(10));
        let (_, first) = market.pop(3).expect("first");
        assert_eq!(first.data, 1);
        let (_, second) = market.pop(3).expect("second");
        assert_eq!(second.data, 2);
        assert!(market.pop(3).is_none());
    }

    #[test]
    fn revoked_postings_are_skipped() {
        let mut market = Market::new(8, false);
        let a = market.post(1, 2, 10, org(1), 0).expect("posted");
        market.post(2, 2, 30, org(2), 1).expect("posted");
        market.revoke(a).expect("revoked");
        assert_eq!(market.len(2), 1);
        assert_eq!(market.head_price(2), Some(30));
        let (_, item) = market.pop(2).expect("live head");
        assert_eq!(item.data, 2);
    }

    #[test]
    fn out_of_range_labels_drop_unless_modulo() {
        let mut strict = Market::new(4, false);
        assert!(strict.post(7, 9, 1, org(1), 0).is_none());
        assert_eq!(strict.len(9), 0);

        let mut folded = Market::new(4, true);
        folded.post(7, 9, 1, org(1), 0).expect("folded");
        assert_eq!(folded.len(1), 1);
    }
}

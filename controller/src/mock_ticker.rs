//! In-memory [`Ticker`] for host tests and simulation.
use heapless::Vec;

use crate::sched::SchedError;
use crate::ticker::{SlotCursor, SlotPoll, Ticker, TickerId, TickerStart, TickerUpdate, TICKER_NULL};
use crate::time::{ticks_add, ticks_diff, ticks_not_after, TICKER_CNTR_MASK};

const NODE_MAX: usize = 16;

/// A ticker expiry delivered by [`MockTicker::advance`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub id: TickerId,
    pub ticks_at_expire: u32,
    /// Expiries skipped since the previous callback.
    pub lazy: u16,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    id: TickerId,
    expire_at: u32,
    periodic: u32,
    lazy: u16,
    skipped: u16,
    slot: u32,
}

/// A ticker kept as a list of nodes sorted by expiry.
///
/// Time only moves through [`MockTicker::advance`]. The hooks let tests make slot queries report
/// busy, fail, or see tickers expire in the middle of a walk.
#[derive(Debug, Default)]
pub struct MockTicker {
    now: u32,
    ticks_current: u32,
    nodes: Vec<Node, NODE_MAX>,
    busy: usize,
    fire_during_scan: usize,
    failing: bool,
}

impl MockTicker {
    pub fn new(now: u32) -> Self {
        Self {
            now: now & TICKER_CNTR_MASK,
            ticks_current: now & TICKER_CNTR_MASK,
            ..Default::default()
        }
    }

    /// Makes the next `n` slot queries report busy.
    pub fn inject_busy(&mut self, n: usize) {
        self.busy = n;
    }

    /// Makes the next `n` continued walks observe an expiry, moving the reference anchor.
    pub fn fire_during_scan(&mut self, n: usize) {
        self.fire_during_scan = n;
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn is_active(&self, id: TickerId) -> bool {
        self.node(id).is_some()
    }

    /// Absolute tick of the next expiry of `id`.
    pub fn expiry_of(&self, id: TickerId) -> Option<u32> {
        self.node(id).map(|n| n.expire_at)
    }

    pub fn slot_of(&self, id: TickerId) -> Option<u32> {
        self.node(id).map(|n| n.slot)
    }

    pub fn period_of(&self, id: TickerId) -> Option<u32> {
        self.node(id).map(|n| n.periodic)
    }

    /// Moves time forward, returning the callbacks due in expiry order.
    pub fn advance(&mut self, ticks: u32) -> Vec<Expiry, NODE_MAX> {
        self.now = ticks_add(self.now, ticks);
        let mut expired = Vec::new();
        while let Some(first) = self.nodes.first().copied() {
            if !ticks_not_after(first.expire_at, self.now) {
                break;
            }
            self.nodes.remove(0);
            if first.skipped >= first.lazy {
                let _ = expired.push(Expiry {
                    id: first.id,
                    ticks_at_expire: first.expire_at,
                    lazy: first.skipped,
                });
            }
            if first.periodic != 0 {
                let skipped = if first.skipped >= first.lazy { 0 } else { first.skipped + 1 };
                self.insert(Node {
                    expire_at: ticks_add(first.expire_at, first.periodic),
                    skipped,
                    ..first
                });
            }
        }
        self.ticks_current = self.now;
        expired
    }

    fn node(&self, id: TickerId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn position(&self, id: TickerId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    fn insert(&mut self, node: Node) -> bool {
        let at = self
            .nodes
            .iter()
            .position(|n| !ticks_not_after(n.expire_at, node.expire_at))
            .unwrap_or(self.nodes.len());
        self.nodes.insert(at, node).is_ok()
    }
}

impl Ticker for MockTicker {
    fn ticks_now(&self) -> u32 {
        self.now
    }

    fn start(&mut self, id: TickerId, params: TickerStart) -> Result<(), SchedError> {
        if id == TICKER_NULL || self.is_active(id) {
            return Err(SchedError::TickerFailure);
        }
        let node = Node {
            id,
            expire_at: ticks_add(params.ticks_anchor, params.ticks_first),
            periodic: params.ticks_periodic,
            lazy: params.lazy,
            skipped: params.lazy,
            slot: params.ticks_slot,
        };
        if self.insert(node) {
            Ok(())
        } else {
            Err(SchedError::TickerFailure)
        }
    }

    fn update(&mut self, id: TickerId, params: TickerUpdate) -> Result<(), SchedError> {
        let at = self.position(id).ok_or(SchedError::TickerFailure)?;
        let mut node = self.nodes.remove(at);
        node.expire_at = ticks_add(node.expire_at, params.ticks_drift_plus);
        node.expire_at = ticks_diff(node.expire_at, params.ticks_drift_minus);
        node.slot = (node.slot + params.ticks_slot_plus).saturating_sub(params.ticks_slot_minus);
        self.insert(node);
        Ok(())
    }

    fn stop(&mut self, id: TickerId) -> Result<(), SchedError> {
        let at = self.position(id).ok_or(SchedError::TickerFailure)?;
        self.nodes.remove(at);
        Ok(())
    }

    fn next_slot_get(&mut self, cursor: &mut SlotCursor) -> SlotPoll {
        if self.failing {
            return SlotPoll::Failed;
        }
        if self.busy > 0 {
            self.busy -= 1;
            return SlotPoll::Busy;
        }

        let continued = cursor.id != TICKER_NULL && cursor.ticks_current == self.ticks_current;
        if continued && self.fire_during_scan > 0 {
            self.fire_during_scan -= 1;
            self.ticks_current = ticks_add(self.ticks_current, 1);
        }

        let start = if cursor.id != TICKER_NULL && cursor.ticks_current == self.ticks_current {
            self.position(cursor.id).map(|at| at + 1).unwrap_or(self.nodes.len())
        } else {
            cursor.ticks_current = self.ticks_current;
            0
        };

        match self.nodes[start..].iter().find(|n| n.slot != 0) {
            Some(node) => {
                cursor.id = node.id;
                cursor.ticks_to_expire = ticks_diff(node.expire_at, self.ticks_current);
                cursor.ticks_slot = node.slot;
            }
            None => {
                cursor.id = TICKER_NULL;
                cursor.ticks_slot = 0;
            }
        }
        SlotPoll::Ready
    }

    fn job_sched(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(ticker: &mut MockTicker, id: TickerId, first: u32, periodic: u32, slot: u32) {
        let anchor = ticker.ticks_now();
        ticker
            .start(
                id,
                TickerStart {
                    ticks_anchor: anchor,
                    ticks_first: first,
                    ticks_periodic: periodic,
                    lazy: 0,
                    ticks_slot: slot,
                },
            )
            .unwrap();
    }

    #[test]
    fn walk_in_expiry_order() {
        let mut ticker = MockTicker::new(1000);
        start(&mut ticker, 5, 300, 0, 10);
        start(&mut ticker, 3, 100, 0, 10);
        start(&mut ticker, 4, 200, 0, 0);

        let mut cursor = SlotCursor::new();
        assert_eq!(ticker.next_slot_get(&mut cursor), SlotPoll::Ready);
        assert_eq!((cursor.id, cursor.ticks_current, cursor.ticks_to_expire), (3, 1000, 100));
        // 4 reserves no slot
        assert_eq!(ticker.next_slot_get(&mut cursor), SlotPoll::Ready);
        assert_eq!((cursor.id, cursor.ticks_to_expire), (5, 300));
        assert_eq!(ticker.next_slot_get(&mut cursor), SlotPoll::Ready);
        assert_eq!(cursor.id, TICKER_NULL);
    }

    #[test]
    fn periodic_and_lazy_expiries() {
        let mut ticker = MockTicker::new(0);
        start(&mut ticker, 2, 100, 100, 5);
        ticker
            .start(
                3,
                TickerStart {
                    ticks_anchor: 0,
                    ticks_first: 50,
                    ticks_periodic: 0,
                    lazy: 0,
                    ticks_slot: 5,
                },
            )
            .unwrap();

        let fired = ticker.advance(250);
        let ids: std::vec::Vec<_> = fired.iter().map(|e| (e.id, e.ticks_at_expire)).collect();
        assert_eq!(ids, [(3, 50), (2, 100), (2, 200)]);
        assert!(!ticker.is_active(3));
        assert_eq!(ticker.expiry_of(2), Some(300));

        assert_eq!(ticker.stop(2), Ok(()));
        assert_eq!(ticker.stop(2), Err(SchedError::TickerFailure));
    }

    #[test]
    fn stale_walk_restarts() {
        let mut ticker = MockTicker::new(0);
        start(&mut ticker, 2, 100, 0, 5);
        start(&mut ticker, 3, 200, 0, 5);
        ticker.fire_during_scan(1);

        let mut cursor = SlotCursor::new();
        ticker.next_slot_get(&mut cursor);
        assert_eq!((cursor.id, cursor.ticks_current), (2, 0));
        ticker.next_slot_get(&mut cursor);
        assert_eq!((cursor.id, cursor.ticks_current, cursor.ticks_to_expire), (2, 1, 99));
    }
}

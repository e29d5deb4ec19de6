//! Ticker collaborator: identifiers, role lookup and the operations the link layer needs.
//!
//! The ticker is a tick-granularity real-time scheduler owned by the platform. Each radio role
//! holds one ticker node with an expiry, an optional period and a reserved slot duration.
use crate::config::{ADV_ISO_SET_COUNT, ADV_SET_COUNT, CONN_COUNT};
use crate::sched::SchedError;

pub type TickerId = u8;

/// Marks the end of the slot list, or a cursor that starts from its head.
pub const TICKER_NULL: TickerId = 0xFF;

pub const TICKER_ID_PREEMPT: TickerId = 0;
pub const TICKER_ID_SCAN: TickerId = 1;
pub const TICKER_ID_ADV_BASE: TickerId = 2;
pub const TICKER_ID_ADV_AUX_BASE: TickerId = TICKER_ID_ADV_BASE + ADV_SET_COUNT as u8;
pub const TICKER_ID_ADV_SYNC_BASE: TickerId = TICKER_ID_ADV_AUX_BASE + ADV_SET_COUNT as u8;
pub const TICKER_ID_ADV_ISO_BASE: TickerId = TICKER_ID_ADV_SYNC_BASE + ADV_SET_COUNT as u8;
pub const TICKER_ID_CONN_BASE: TickerId = TICKER_ID_ADV_ISO_BASE + ADV_ISO_SET_COUNT as u8;
/// First identifier not owned by the link layer.
pub const TICKER_ID_ULL_END: TickerId = TICKER_ID_CONN_BASE + CONN_COUNT as u8;

/// The role a ticker identifier belongs to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerRole {
    Preempt,
    Scan,
    Adv(u8),
    Aux(u8),
    Sync(u8),
    Iso(u8),
    Conn(u8),
    /// Owned by someone else sharing the ticker, such as a flash driver.
    Foreign(TickerId),
}

impl TickerRole {
    pub const fn of(id: TickerId) -> Self {
        match id {
            TICKER_ID_PREEMPT => TickerRole::Preempt,
            TICKER_ID_SCAN => TickerRole::Scan,
            id if id < TICKER_ID_ADV_AUX_BASE => TickerRole::Adv(id - TICKER_ID_ADV_BASE),
            id if id < TICKER_ID_ADV_SYNC_BASE => TickerRole::Aux(id - TICKER_ID_ADV_AUX_BASE),
            id if id < TICKER_ID_ADV_ISO_BASE => TickerRole::Sync(id - TICKER_ID_ADV_SYNC_BASE),
            id if id < TICKER_ID_CONN_BASE => TickerRole::Iso(id - TICKER_ID_ADV_ISO_BASE),
            id if id < TICKER_ID_ULL_END => TickerRole::Conn(id - TICKER_ID_CONN_BASE),
            id => TickerRole::Foreign(id),
        }
    }

    pub const fn id(self) -> TickerId {
        match self {
            TickerRole::Preempt => TICKER_ID_PREEMPT,
            TickerRole::Scan => TICKER_ID_SCAN,
            TickerRole::Adv(h) => TICKER_ID_ADV_BASE + h,
            TickerRole::Aux(h) => TICKER_ID_ADV_AUX_BASE + h,
            TickerRole::Sync(h) => TICKER_ID_ADV_SYNC_BASE + h,
            TickerRole::Iso(h) => TICKER_ID_ADV_ISO_BASE + h,
            TickerRole::Conn(h) => TICKER_ID_CONN_BASE + h,
            TickerRole::Foreign(id) => id,
        }
    }
}

/// Parameters of a ticker start.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickerStart {
    /// Reference point the first expiry counts from.
    pub ticks_anchor: u32,
    pub ticks_first: u32,
    /// Zero for a one-shot ticker.
    pub ticks_periodic: u32,
    /// Expiries to skip between callbacks.
    pub lazy: u16,
    /// Radio time reserved at each expiry.
    pub ticks_slot: u32,
}

/// Parameters of a ticker update.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickerUpdate {
    pub ticks_drift_plus: u32,
    pub ticks_drift_minus: u32,
    pub ticks_slot_plus: u32,
    pub ticks_slot_minus: u32,
}

/// Position of a walk over the tickers that reserve a slot.
///
/// Start with [`SlotCursor::new`]. Each successful [`Ticker::next_slot_get`] moves to the next
/// ticker in expiry order and sets `ticks_current` to the ticker's reference anchor. A walk whose
/// anchor is stale because tickers expired meanwhile restarts from the head.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCursor {
    /// Current ticker, [`TICKER_NULL`] before the first and after the last.
    pub id: TickerId,
    pub ticks_current: u32,
    /// Expiry of `id` relative to `ticks_current`.
    pub ticks_to_expire: u32,
    pub ticks_slot: u32,
}

impl Default for SlotCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotCursor {
    pub const fn new() -> Self {
        Self {
            id: TICKER_NULL,
            ticks_current: 0,
            ticks_to_expire: 0,
            ticks_slot: 0,
        }
    }
}

/// Completion of a slot query.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPoll {
    Ready,
    /// The ticker job has not processed the request yet; run [`Ticker::job_sched`] and ask again.
    Busy,
    Failed,
}

/// The ticker, as seen by the upper link layer.
pub trait Ticker {
    /// Current tick counter.
    fn ticks_now(&self) -> u32;

    fn start(&mut self, id: TickerId, params: TickerStart) -> Result<(), SchedError>;

    fn update(&mut self, id: TickerId, params: TickerUpdate) -> Result<(), SchedError>;

    fn stop(&mut self, id: TickerId) -> Result<(), SchedError>;

    fn next_slot_get(&mut self, cursor: &mut SlotCursor) -> SlotPoll;

    /// Lets pending ticker job work complete.
    fn job_sched(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ranges() {
        for role in [
            TickerRole::Preempt,
            TickerRole::Scan,
            TickerRole::Adv(1),
            TickerRole::Aux(0),
            TickerRole::Sync(1),
            TickerRole::Iso(0),
            TickerRole::Conn(1),
        ] {
            assert_eq!(TickerRole::of(role.id()), role);
        }
        assert_eq!(TickerRole::of(TICKER_ID_ULL_END), TickerRole::Foreign(TICKER_ID_ULL_END));
        assert_eq!(TickerRole::of(0xF0), TickerRole::Foreign(0xF0));
    }
}

//! Free-slot search over the ticker timeline.
//!
//! New auxiliary, periodic and isochronous events are placed after the events already reserving
//! radio time, walking the tickers in expiry order and taking the first gap that fits (first fit,
//! not best fit).
use crate::config::TICKER_JOB_SPIN_MAX;
use crate::ticker::{SlotCursor, SlotPoll, Ticker, TickerId, TickerRole, TICKER_NULL};
use crate::time::{ticks_add, ticks_diff, ticks_to_us, us_to_ticks, CONN_INT_UNIT_US, EVENT_JITTER_US, TICKER_CNTR_MSBIT};

/// Restarts allowed when tickers expire during a walk.
const SLOT_SCAN_RETRY: u8 = 4;

/// Margin added to a requested slot, covering the jitter of both neighbours.
const SLOT_MARGIN_US: u32 = EVENT_JITTER_US << 3;

/// Ticker scheduling failures.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Tickers kept expiring during the slot walk.
    RetryExhausted,
    /// The ticker job did not complete a request in time.
    TickerBusy,
    /// The ticker rejected an operation.
    TickerFailure,
}

/// How a slot walk treats a ticker.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    /// Its slot must not be overlapped.
    Match,
    /// Its time may be preempted.
    Skip,
    /// Not owned by the link layer, handled per [`ForeignTickers`].
    Foreign,
}

/// Treatment of tickers owned by other ticker users.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForeignTickers {
    /// Walk past them as preemptible time.
    Skip,
    /// End the walk, nothing after them is considered free.
    #[default]
    StopScan,
}

pub trait SlotFilter {
    fn classify(&self, id: TickerId) -> SlotClass;
}

impl<F: Fn(TickerId) -> SlotClass> SlotFilter for F {
    fn classify(&self, id: TickerId) -> SlotClass {
        self(id)
    }
}

/// Roles whose slots auxiliary, periodic and isochronous events avoid.
pub fn aux_sync_iso_conn(id: TickerId) -> SlotClass {
    match TickerRole::of(id) {
        TickerRole::Aux(_) | TickerRole::Sync(_) | TickerRole::Iso(_) | TickerRole::Conn(_) => SlotClass::Match,
        TickerRole::Foreign(_) => SlotClass::Foreign,
        _ => SlotClass::Skip,
    }
}

fn conn_only(id: TickerId) -> SlotClass {
    match TickerRole::of(id) {
        TickerRole::Conn(_) => SlotClass::Match,
        TickerRole::Foreign(_) => SlotClass::Foreign,
        _ => SlotClass::Skip,
    }
}

/// Start of a free slot.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMatch {
    /// The ticker whose slot the free one follows.
    pub after: TickerId,
    /// Ticker reference anchor during the walk.
    pub ticks_current: u32,
    /// Start of the free slot relative to `ticks_current`.
    pub ticks_to_start: u32,
}

impl SlotMatch {
    pub fn ticks_anchor(&self) -> u32 {
        ticks_add(self.ticks_current, self.ticks_to_start)
    }
}

/// Result of a free-slot search.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSlot {
    /// No matching ticker reserves time.
    Empty,
    /// A gap between two matching tickers.
    Gap(SlotMatch),
    /// No gap fits, the slot starts after the last matching ticker.
    AfterLast(SlotMatch),
}

impl FreeSlot {
    /// Anchor for a new event, unless nothing matched.
    pub fn anchor(&self) -> Option<u32> {
        self.placement().map(|m| m.ticks_anchor())
    }

    pub fn placement(&self) -> Option<&SlotMatch> {
        match self {
            FreeSlot::Empty => None,
            FreeSlot::Gap(m) | FreeSlot::AfterLast(m) => Some(m),
        }
    }

    /// The gap, if one was found.
    pub fn gap(&self) -> Option<&SlotMatch> {
        match self {
            FreeSlot::Gap(m) => Some(m),
            _ => None,
        }
    }
}

/// Advances `cursor`, running the ticker job while the ticker reports busy.
fn slot_next<T: Ticker + ?Sized>(ticker: &mut T, cursor: &mut SlotCursor) -> Result<(), SchedError> {
    let mut spins = 0;
    loop {
        match ticker.next_slot_get(cursor) {
            SlotPoll::Ready => return Ok(()),
            SlotPoll::Failed => return Err(SchedError::TickerFailure),
            SlotPoll::Busy => {
                if spins >= TICKER_JOB_SPIN_MAX {
                    warn!("[sched] ticker busy after {} spins", spins);
                    return Err(SchedError::TickerBusy);
                }
                spins += 1;
                ticker.job_sched();
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Prev {
    id: TickerId,
    ticks_to_expire: u32,
    ticks_slot: u32,
}

/// Finds room for a `ticks_slot_abs` long event after the tickers `filter` matches.
///
/// The gap between two matching tickers must exceed the slot plus a jitter margin. A walk that
/// observes the ticker anchor move, because tickers expired meanwhile, starts over up to four
/// times before failing with [`SchedError::RetryExhausted`].
pub fn after_match_slot_get<T: Ticker + ?Sized, F: SlotFilter + ?Sized>(
    ticker: &mut T,
    filter: &F,
    foreign: ForeignTickers,
    ticks_slot_abs: u32,
) -> Result<FreeSlot, SchedError> {
    let ticks_slot_abs = ticks_slot_abs + us_to_ticks(SLOT_MARGIN_US);
    let mut retry = SLOT_SCAN_RETRY;
    let mut cursor = SlotCursor::new();
    let mut anchor_prev = 0;
    let mut prev: Option<Prev> = None;

    loop {
        slot_next(ticker, &mut cursor)?;
        if cursor.id == TICKER_NULL {
            break;
        }

        if prev.is_some() && cursor.ticks_current != anchor_prev {
            if retry == 0 {
                warn!("[sched] anchor keeps moving, giving up");
                return Err(SchedError::RetryExhausted);
            }
            retry -= 1;
            trace!("[sched] anchor moved, restarting ({} left)", retry);
            prev = None;
            cursor = SlotCursor::new();
            continue;
        }
        anchor_prev = cursor.ticks_current;

        match filter.classify(cursor.id) {
            SlotClass::Skip => continue,
            SlotClass::Foreign => match foreign {
                ForeignTickers::Skip => continue,
                ForeignTickers::StopScan => break,
            },
            SlotClass::Match => {}
        }

        if let Some(p) = prev {
            if ticks_diff(cursor.ticks_to_expire, p.ticks_to_expire) > p.ticks_slot + ticks_slot_abs {
                return Ok(FreeSlot::Gap(SlotMatch {
                    after: p.id,
                    ticks_current: anchor_prev,
                    ticks_to_start: ticks_add(p.ticks_to_expire, p.ticks_slot),
                }));
            }
        }
        prev = Some(Prev {
            id: cursor.id,
            ticks_to_expire: cursor.ticks_to_expire,
            ticks_slot: cursor.ticks_slot,
        });
    }

    Ok(match prev {
        Some(p) => FreeSlot::AfterLast(SlotMatch {
            after: p.id,
            ticks_current: anchor_prev,
            ticks_to_start: ticks_add(p.ticks_to_expire, p.ticks_slot),
        }),
        None => FreeSlot::Empty,
    })
}

/// Anchor for a new auxiliary, periodic or isochronous event of `ticks_slot_abs`, placed clear
/// of the other events of those roles and of connections. `None` when none is running.
pub fn adv_aux_sync_free_anchor_get<T: Ticker + ?Sized>(
    ticker: &mut T,
    foreign: ForeignTickers,
    ticks_slot_abs: u32,
) -> Result<Option<u32>, SchedError> {
    let free = after_match_slot_get(ticker, &aux_sync_iso_conn, foreign, ticks_slot_abs)?;
    debug!("[sched] free anchor {:?}", free.anchor());
    Ok(free.anchor())
}

/// Window offset in microseconds, relative to `ticks_anchor`, that places a new connection
/// event after the running ones. Offsets that are not negative are reduced into one connection
/// interval. `None` when no connection is running.
pub fn after_cen_offset_get<T: Ticker + ?Sized>(
    ticker: &mut T,
    conn_interval: u16,
    ticks_slot: u32,
    ticks_anchor: u32,
) -> Result<Option<i32>, SchedError> {
    let free = after_match_slot_get(ticker, &conn_only, ForeignTickers::StopScan, ticks_slot)?;
    let Some(m) = free.placement() else {
        return Ok(None);
    };

    let mut offset_us = ticks_to_us(m.ticks_to_start) as i32 + SLOT_MARGIN_US as i32;
    if m.ticks_current != ticks_anchor {
        let diff = ticks_diff(m.ticks_current, ticks_anchor);
        if diff & (1 << TICKER_CNTR_MSBIT) == 0 {
            offset_us += ticks_to_us(diff) as i32;
        } else {
            offset_us -= ticks_to_us(ticks_diff(ticks_anchor, m.ticks_current)) as i32;
        }
    }

    let interval_us = conn_interval as i32 * CONN_INT_UNIT_US as i32;
    if offset_us >= 0 && interval_us > 0 {
        while offset_us > interval_us {
            offset_us -= interval_us;
        }
    }
    Ok(Some(offset_us))
}

/// Next expiry of ticker `id`: the reference anchor and the expiry relative to it.
pub fn ticker_expiry_get<T: Ticker + ?Sized>(ticker: &mut T, id: TickerId) -> Result<Option<(u32, u32)>, SchedError> {
    let mut retry = SLOT_SCAN_RETRY;
    let mut cursor = SlotCursor::new();
    let mut anchor_prev = None;
    loop {
        slot_next(ticker, &mut cursor)?;
        if cursor.id == TICKER_NULL {
            return Ok(None);
        }
        if let Some(anchor) = anchor_prev {
            if anchor != cursor.ticks_current {
                if retry == 0 {
                    return Err(SchedError::RetryExhausted);
                }
                retry -= 1;
                anchor_prev = None;
                cursor = SlotCursor::new();
                continue;
            }
        }
        if cursor.id == id {
            return Ok(Some((cursor.ticks_current, cursor.ticks_to_expire)));
        }
        anchor_prev = Some(cursor.ticks_current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_ticker::MockTicker;
    use crate::ticker::{TickerStart, TICKER_ID_ADV_AUX_BASE, TICKER_ID_ADV_BASE, TICKER_ID_ADV_SYNC_BASE, TICKER_ID_CONN_BASE};

    fn reserve(ticker: &mut MockTicker, id: TickerId, first: u32, slot: u32) {
        let anchor = ticker.ticks_now();
        ticker
            .start(
                id,
                TickerStart {
                    ticks_anchor: anchor,
                    ticks_first: first,
                    ticks_slot: slot,
                    ..Default::default()
                },
            )
            .unwrap();
    }

    fn two_events() -> MockTicker {
        let mut ticker = MockTicker::new(0);
        reserve(&mut ticker, TICKER_ID_ADV_AUX_BASE, 0, 100);
        reserve(&mut ticker, TICKER_ID_ADV_SYNC_BASE, 500, 50);
        ticker
    }

    #[test]
    fn gap_between_events() {
        let mut ticker = two_events();
        let free = after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 200).unwrap();
        let gap = free.gap().unwrap();
        assert_eq!(gap.after, TICKER_ID_ADV_AUX_BASE);
        let anchor = free.anchor().unwrap();
        assert!((100..=300).contains(&anchor));
        assert_eq!(anchor, 100);
    }

    #[test]
    fn slot_larger_than_gap_is_not_found() {
        let mut ticker = two_events();
        let free = after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 450).unwrap();
        assert!(free.gap().is_none());
        assert_eq!(
            free,
            FreeSlot::AfterLast(SlotMatch {
                after: TICKER_ID_ADV_SYNC_BASE,
                ticks_current: 0,
                ticks_to_start: 550
            })
        );
    }

    #[test]
    fn jitter_margin_is_honoured() {
        let mut ticker = two_events();
        // 400 ticks between the events, the margin is 4
        let free = after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 396).unwrap();
        assert!(free.gap().is_none());
        let free = after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 395).unwrap();
        assert!(free.gap().is_some());
    }

    #[test]
    fn empty_and_skipped_roles() {
        let mut ticker = MockTicker::new(0);
        assert_eq!(adv_aux_sync_free_anchor_get(&mut ticker, ForeignTickers::Skip, 10), Ok(None));
        reserve(&mut ticker, TICKER_ID_ADV_BASE, 10, 100);
        assert_eq!(adv_aux_sync_free_anchor_get(&mut ticker, ForeignTickers::Skip, 10), Ok(None));
    }

    #[test]
    fn foreign_ticker_policy() {
        let mut ticker = MockTicker::new(0);
        reserve(&mut ticker, TICKER_ID_ADV_AUX_BASE, 0, 100);
        reserve(&mut ticker, 0xF0, 120, 20);
        reserve(&mut ticker, TICKER_ID_ADV_SYNC_BASE, 500, 50);

        let stop = after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::StopScan, 200).unwrap();
        assert_eq!(stop.gap(), None);
        assert_eq!(stop.anchor(), Some(100));

        let skip = after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 200).unwrap();
        assert_eq!(skip.gap().map(|m| m.ticks_to_start), Some(100));
    }

    #[test]
    fn retries_are_bounded() {
        let mut ticker = two_events();
        ticker.fire_during_scan(4);
        assert!(after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 200).is_ok());

        let mut ticker = two_events();
        ticker.fire_during_scan(5);
        assert_eq!(
            after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 200),
            Err(SchedError::RetryExhausted)
        );
    }

    #[test]
    fn busy_ticker() {
        let mut ticker = two_events();
        ticker.inject_busy(3);
        assert!(after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 200).is_ok());

        ticker.inject_busy(TICKER_JOB_SPIN_MAX + 1);
        assert_eq!(
            after_match_slot_get(&mut ticker, &aux_sync_iso_conn, ForeignTickers::Skip, 200),
            Err(SchedError::TickerBusy)
        );

        ticker.inject_busy(0);
        ticker.set_failing(true);
        assert_eq!(ticker_expiry_get(&mut ticker, TICKER_ID_ADV_SYNC_BASE), Err(SchedError::TickerFailure));
    }

    #[test]
    fn expiry_lookup() {
        let mut ticker = two_events();
        assert_eq!(ticker_expiry_get(&mut ticker, TICKER_ID_ADV_SYNC_BASE), Ok(Some((0, 500))));
        assert_eq!(ticker_expiry_get(&mut ticker, TICKER_ID_CONN_BASE), Ok(None));
    }

    #[test]
    fn central_offset_wraps_into_interval() {
        let mut ticker = MockTicker::new(0);
        // 3277 ticks is about 100 ms
        reserve(&mut ticker, TICKER_ID_CONN_BASE, 3277, 33);
        // 20 ms interval
        let offset = after_cen_offset_get(&mut ticker, 16, 30, 0).unwrap().unwrap();
        let raw = ticks_to_us(3277 + 33) as i32 + SLOT_MARGIN_US as i32;
        assert!(offset > 0 && offset <= 20_000);
        assert_eq!((raw - offset) % 20_000, 0);

        // Relative to a later anchor
        let later = after_cen_offset_get(&mut ticker, 0, 30, 100).unwrap().unwrap();
        assert_eq!(later, raw - ticks_to_us(100) as i32);

        let mut ticker = MockTicker::new(0);
        assert_eq!(after_cen_offset_get(&mut ticker, 16, 30, 0), Ok(None));
    }
}

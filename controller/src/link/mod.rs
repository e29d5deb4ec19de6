//! The advertising roles of the upper link layer.
//!
//! [`LinkLayer`] owns the advertising sets, their auxiliary and periodic trains and the BIGs
//! broadcast from them. Host commands edit the PDU chains; ticker expiries, radio prepares and
//! radio completions come in through [`LinkLayer::ticker_expired`], [`LinkLayer::lll_prepare`]
//! and [`LinkLayer::lll_done`], and the deferred upper layer work runs in [`LinkLayer::ull_run`].
use bt_hci::param::PhyKind;
use heapless::Vec;
use rand_core::RngCore;

use crate::chain::ChainIter;
use crate::chan_sel::ChannelMap;
use crate::config::{ADV_DATA_LEN_MAX, ADV_ISO_SET_COUNT, ADV_SET_COUNT};
use crate::mayfly::{Mayfly, Priority, Work};
use crate::pool::{PduRef, PduStore};
use crate::sched::{ticker_expiry_get, ForeignTickers};
use crate::ticker::{Ticker, TickerId, TickerRole, TickerUpdate};
use crate::time::{pdu_us, ticks_add, ticks_diff, ticks_not_after, ticks_to_us, us_to_ticks, EVENT_MAFS_US};
use crate::Error;

pub mod adv;
pub mod aux;
pub mod iso;
pub mod sync;
pub mod ull;

pub use adv::{AdvParams, AdvSet};
pub use aux::AuxSet;
pub use iso::{big_timing_negotiate, BigParams, BigTiming, IsoSet, Packing};
pub use sync::{CteParams, SyncParams, SyncSet};
use ull::{Teardown, UllHdr};

/// Position of a host data fragment.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOp {
    Intermediate,
    First,
    Last,
    Complete,
    /// Republish the current data with a new Advertising Data ID.
    Unchanged,
}

/// Advertising data of one chain, reassembled from host fragments.
#[derive(Debug, Default)]
pub(crate) struct AdData {
    committed: Vec<u8, ADV_DATA_LEN_MAX>,
    staged: Vec<u8, ADV_DATA_LEN_MAX>,
    staging: bool,
}

impl AdData {
    /// Takes one fragment. Returns true once [`AdData::staged`] holds complete data to publish.
    pub(crate) fn apply(&mut self, op: DataOp, data: &[u8]) -> Result<bool, Error> {
        match op {
            DataOp::First | DataOp::Complete => {
                self.staged.clear();
                self.staging = op == DataOp::First;
            }
            DataOp::Intermediate | DataOp::Last => {
                if !self.staging {
                    return Err(Error::CommandDisallowed);
                }
                if op == DataOp::Last {
                    self.staging = false;
                }
            }
            DataOp::Unchanged => {
                if !data.is_empty() {
                    return Err(Error::InvalidParameter);
                }
                self.staging = false;
                self.staged.clone_from(&self.committed);
                return Ok(true);
            }
        }
        if self.staged.extend_from_slice(data).is_err() {
            self.staged.clear();
            self.staging = false;
            return Err(Error::MemoryCapacityExceeded);
        }
        Ok(!self.staging)
    }

    pub(crate) fn staged(&self) -> &[u8] {
        &self.staged
    }

    /// Marks the staged data as published.
    pub(crate) fn commit(&mut self) {
        self.committed.clone_from(&self.staged);
    }

    pub(crate) fn committed(&self) -> &[u8] {
        &self.committed
    }

    pub(crate) fn is_staging(&self) -> bool {
        self.staging
    }
}

/// A radio event ready to go on air.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prepared {
    pub role: TickerRole,
    /// Head of the chain to transmit, none for BIG events.
    pub head: Option<PduRef>,
    pub event_counter: u16,
    pub chan_idx: u8,
    pub ticks_at_expire: u32,
}

/// Outcome of a radio prepare.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LllEvent {
    Prepared(Prepared),
    /// The role was being disabled, the event was dropped.
    Aborted(TickerRole),
}

pub struct LinkLayer<'d, T: Ticker, R: RngCore> {
    pool: &'d dyn PduStore,
    ticker: T,
    rng: R,
    mayfly: Mayfly,
    adv: [Option<AdvSet>; ADV_SET_COUNT],
    iso: [Option<IsoSet>; ADV_ISO_SET_COUNT],
    chm: ChannelMap,
    foreign: ForeignTickers,
}

impl<'d, T: Ticker, R: RngCore> LinkLayer<'d, T, R> {
    pub fn new(pool: &'d dyn PduStore, ticker: T, rng: R) -> Self {
        Self {
            pool,
            ticker,
            rng,
            mayfly: Mayfly::new(),
            adv: core::array::from_fn(|_| None),
            iso: core::array::from_fn(|_| None),
            chm: ChannelMap::ALL,
            foreign: ForeignTickers::default(),
        }
    }

    /// How free slot searches treat tickers not owned by the link layer.
    pub fn set_foreign_tickers(&mut self, foreign: ForeignTickers) {
        self.foreign = foreign;
    }

    pub fn pool(&self) -> &'d dyn PduStore {
        self.pool
    }

    pub fn ticker(&self) -> &T {
        &self.ticker
    }

    pub fn ticker_mut(&mut self) -> &mut T {
        &mut self.ticker
    }

    pub fn adv_set(&self, handle: u8) -> Option<&AdvSet> {
        self.adv.get(handle as usize)?.as_ref()
    }

    /// The BIG created with `big_handle`.
    pub fn big(&self, big_handle: u8) -> Option<&IsoSet> {
        self.iso.iter().flatten().find(|iso| iso.big_handle() == big_handle)
    }

    /// Data channel map of periodic and isochronous events.
    pub fn chm_get(&self) -> ChannelMap {
        self.chm
    }

    /// Switches every periodic train and BIG to `map`.
    ///
    /// Running periodic trains announce the switch with a Channel Map Update Indication in their
    /// ACAD and move at its instant; stopped ones take the map right away. BIGs move at their own
    /// instant and then update their BIGInfo. Rejected while a previous update is in progress.
    pub fn chm_set(&mut self, map: ChannelMap) -> Result<(), Error> {
        if !map.is_valid() {
            return Err(Error::InvalidParameter);
        }
        let busy = self.adv.iter().flatten().filter_map(|s| s.sync.as_ref()).any(|s| s.chm_pending.is_some())
            || self.iso.iter().flatten().any(|iso| iso.chm_pending.is_some());
        if busy {
            return Err(Error::CommandDisallowed);
        }

        self.chm = map;
        for handle in 0..ADV_SET_COUNT as u8 {
            self.sync_chm_update(handle, map)?;
        }
        for iso in self.iso.iter_mut().flatten() {
            iso.chm_update(map);
        }
        info!("[link] channel map update to {} channels", map.count());
        Ok(())
    }

    /// Ticker callback for the expiry of ticker `id`.
    ///
    /// Takes a reference on the role and queues its radio prepare. Roles whose events carry a
    /// pointer to a later event also queue the upper layer work filling in that pointer.
    /// Expiries of tickers the link layer does not own are ignored.
    pub fn ticker_expired(&mut self, id: u8, ticks_at_expire: u32, lazy: u16) -> Result<(), Error> {
        let role = TickerRole::of(id);
        let Some(hdr) = self.hdr_mut(role) else {
            trace!("[link] expiry of {:?} ignored", role);
            return Ok(());
        };
        hdr.ref_inc();
        let prepare = Work::Prepare {
            role,
            ticks_at_expire,
            lazy,
        };
        if let Err(e) = self.mayfly.enqueue(Priority::Lll, prepare) {
            if let Some(hdr) = self.hdr_mut(role) {
                hdr.ref_dec();
            }
            return Err(e);
        }

        let follow = match role {
            TickerRole::Adv(handle) => self
                .adv_set(handle)
                .and_then(|s| s.aux.as_ref())
                .filter(|aux| aux.started)
                .map(|_| Work::AuxOffsetGet { handle, ticks_at_expire }),
            TickerRole::Aux(handle) => self
                .adv_set(handle)
                .and_then(|s| s.sync.as_ref())
                .filter(|sync| sync.started)
                .map(|_| Work::SyncOffsetGet { handle, ticks_at_expire }),
            TickerRole::Sync(handle) => self
                .adv_set(handle)
                .and_then(|s| s.sync.as_ref())
                .and_then(|sync| sync.big)
                .map(|slot| Work::BigOffsetGet {
                    handle: slot,
                    ticks_at_expire,
                }),
            _ => None,
        };
        if let Some(work) = follow {
            self.mayfly.enqueue(Priority::UllLow, work)?;
        }
        Ok(())
    }

    /// Radio context: prepares the next queued event, `None` when nothing is queued.
    pub fn lll_prepare(&mut self) -> Result<Option<LllEvent>, Error> {
        let Some(work) = self.mayfly.dequeue(Priority::Lll) else {
            return Ok(None);
        };
        let Work::Prepare {
            role,
            ticks_at_expire,
            lazy,
        } = work
        else {
            return Err(Error::Unspecified);
        };
        let disabling = self.hdr_mut(role).ok_or(Error::Unspecified)?.is_disabling();
        if disabling {
            debug!("[link] {:?} disabling, prepare aborted", role);
            self.lll_done(role)?;
            return Ok(Some(LllEvent::Aborted(role)));
        }

        let prepared = match role {
            TickerRole::Adv(handle) => self.adv_prepare(handle)?,
            TickerRole::Aux(handle) => self.aux_prepare(handle, lazy)?,
            TickerRole::Sync(handle) => self.sync_prepare(handle, lazy)?,
            TickerRole::Iso(slot) => self.iso_prepare(slot, lazy)?,
            _ => return Err(Error::Unspecified),
        };
        Ok(Some(LllEvent::Prepared(Prepared {
            role,
            ticks_at_expire,
            ..prepared
        })))
    }

    /// Radio context: the event of `role` is over. Releasing the last reference of a role being
    /// disabled queues its teardown.
    pub fn lll_done(&mut self, role: TickerRole) -> Result<(), Error> {
        let hdr = self.hdr_mut(role).ok_or(Error::Unspecified)?;
        if let Some(teardown) = hdr.ref_dec() {
            self.mayfly.enqueue(Priority::UllHigh, Work::Disabled { teardown })?;
        }
        Ok(())
    }

    /// Runs the queued upper layer work, high priority first. Returns the number of items run.
    pub fn ull_run(&mut self) -> usize {
        let mut count = 0;
        while let Some(work) = self
            .mayfly
            .dequeue(Priority::UllHigh)
            .or_else(|| self.mayfly.dequeue(Priority::UllLow))
        {
            if let Err(e) = self.ull_work(work) {
                warn!("[link] {:?} failed: {:?}", work, e);
            }
            count += 1;
        }
        count
    }

    fn ull_work(&mut self, work: Work) -> Result<(), Error> {
        match work {
            Work::AuxOffsetGet { handle, ticks_at_expire } => self.aux_offset_fill(handle, ticks_at_expire),
            Work::SyncOffsetGet { handle, ticks_at_expire } => self.sync_info_fill(handle, ticks_at_expire),
            Work::BigOffsetGet { handle, ticks_at_expire } => self.big_offset_fill(handle, ticks_at_expire),
            Work::SyncChmComplete { handle } => self.sync_chm_complete(handle),
            Work::IsoChmComplete { handle } => self.iso_chm_complete(handle),
            Work::Disabled { teardown } => self.teardown_run(teardown),
            Work::Prepare { .. } => Err(Error::Unspecified),
        }
    }

    /// Runs `teardown` now, or hands it to the role's header to run after its last event.
    fn disable(&mut self, role: TickerRole, teardown: Teardown) -> Result<(), Error> {
        let hdr = self.hdr_mut(role).ok_or(Error::Unspecified)?;
        match hdr.disable(teardown) {
            Some(teardown) => self.teardown_run(teardown),
            None => {
                debug!("[link] {:?} deferred, {} events in flight", teardown, hdr.refs());
                Ok(())
            }
        }
    }

    fn teardown_run(&mut self, teardown: Teardown) -> Result<(), Error> {
        debug!("[link] teardown {:?}", teardown);
        match teardown {
            Teardown::AdvStop(_) => Ok(()),
            Teardown::AuxStop(handle) => {
                if let Some(aux) = self.adv_mut(handle)?.aux.as_mut() {
                    aux.event_counter = 0;
                }
                Ok(())
            }
            Teardown::SyncStop(handle) => self.sync_stopped(handle),
            Teardown::BigTerminate(slot) => self.big_release(slot),
        }
    }

    fn hdr_mut(&mut self, role: TickerRole) -> Option<&mut UllHdr> {
        match role {
            TickerRole::Adv(h) => self.adv.get_mut(h as usize)?.as_mut().map(|s| &mut s.hdr),
            TickerRole::Aux(h) => self.adv.get_mut(h as usize)?.as_mut()?.aux.as_mut().map(|a| &mut a.hdr),
            TickerRole::Sync(h) => self.adv.get_mut(h as usize)?.as_mut()?.sync.as_mut().map(|s| &mut s.hdr),
            TickerRole::Iso(slot) => self.iso.get_mut(slot as usize)?.as_mut().map(|iso| &mut iso.hdr),
            _ => None,
        }
    }

    fn adv_mut(&mut self, handle: u8) -> Result<&mut AdvSet, Error> {
        set_mut(&mut self.adv, handle)
    }
}

fn set_mut(adv: &mut [Option<AdvSet>], handle: u8) -> Result<&mut AdvSet, Error> {
    adv.get_mut(handle as usize)
        .and_then(Option::as_mut)
        .ok_or(Error::UnknownAdvIdentifier)
}

/// Air time of the chain starting at `head`, the gaps between its PDUs included.
fn chain_air_us(pool: &dyn PduStore, head: PduRef, phy: PhyKind) -> Result<u32, Error> {
    let mut us = 0;
    for r in ChainIter::new(pool, head) {
        if us != 0 {
            us += EVENT_MAFS_US;
        }
        us += pdu_us(pool.load(r)?.len(), phy);
    }
    Ok(us)
}

/// Resizes a ticker slot to `us` of radio time, updating ticker `id` when it runs.
fn slot_update<T: Ticker>(ticker: &mut T, id: Option<TickerId>, ticks_slot: u32, us: u32) -> Result<u32, Error> {
    let slot = us_to_ticks(us);
    if let Some(id) = id.filter(|_| slot != ticks_slot) {
        ticker.update(
            id,
            TickerUpdate {
                ticks_slot_plus: slot.saturating_sub(ticks_slot),
                ticks_slot_minus: ticks_slot.saturating_sub(slot),
                ..Default::default()
            },
        )?;
    }
    Ok(slot)
}

/// Microseconds from `ticks_at_expire` to the next expiry of ticker `id`.
fn expiry_offset_us<T: Ticker>(ticker: &mut T, id: TickerId, ticks_at_expire: u32) -> Result<u32, Error> {
    let (ticks_current, ticks_to_expire) = ticker_expiry_get(ticker, id)?.ok_or(Error::Unspecified)?;
    let expire = ticks_add(ticks_current, ticks_to_expire);
    if !ticks_not_after(ticks_at_expire, expire) {
        return Err(Error::Unspecified);
    }
    Ok(ticks_to_us(ticks_diff(expire, ticks_at_expire)))
}

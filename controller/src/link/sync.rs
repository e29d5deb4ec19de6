//! Periodic advertising: the AUX_SYNC_IND train and the SyncInfo that leads to it.
use bt_hci::param::PhyKind;
use embassy_time::Duration;
use heapless::Vec;
use rand_core::RngCore;

use super::adv::pdu_build;
use super::aux::pdu_ref;
use super::ull::{Teardown, UllHdr};
use super::{chain_air_us, expiry_offset_us, set_mut, slot_update, AdData, DataOp, LinkLayer, Prepared};
use crate::chain::{edit_head, write_chain, ChainFields};
use crate::chan_sel::{access_addr_get, chan_id, chan_sel_2, crc_init_get, ChannelMap};
use crate::codec::{Encode, FixedSize};
use crate::hdr::{HdrData, PduKind};
use crate::mayfly::{Priority, Work};
use crate::pdu::acad::{self, ChmUpdateInd, AD_TYPE_CHM_UPD_IND, CHM_UPD_INSTANT_OFFSET};
use crate::pdu::{Adi, AdvMode, CteInfo, ExtHdrField, ExtHeader, FieldValue, HdrFields, SyncInfo, PDU_AC_ACAD_SIZE_MAX};
use crate::pool::{DoubleBuffer, PduRef, PduStore};
use crate::sched::adv_aux_sync_free_anchor_get;
use crate::ticker::{Ticker, TickerRole, TickerStart};
use crate::time::{duration_to_ticks, ticks_add, us_to_ticks, EVENT_OVERHEAD_START_US, PERIODIC_INT_UNIT_US};
use crate::Error;

pub(crate) type Acad = Vec<u8, PDU_AC_ACAD_SIZE_MAX>;

const SYNC_INTERVAL_MIN: Duration = Duration::from_micros(7_500);
const SYNC_INTERVAL_MAX: Duration = Duration::from_micros(81_918_750);

/// Parameters of a periodic advertising train.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncParams {
    pub interval: Duration,
    pub include_tx_power: bool,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            include_tx_power: false,
        }
    }
}

impl SyncParams {
    fn validate(&self) -> Result<(), Error> {
        if self.interval < SYNC_INTERVAL_MIN || self.interval > SYNC_INTERVAL_MAX {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }

    /// Interval in 1.25 ms units.
    fn interval_units(&self) -> u16 {
        (self.interval.as_micros() / PERIODIC_INT_UNIT_US as u64) as u16
    }
}

/// Constant Tone Extension transmitted with periodic advertising.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CteParams {
    /// Length in 8 us units, 2 to 20.
    pub len: u8,
    /// 0: AoA, 1: AoD 1 us slots, 2: AoD 2 us slots.
    pub ty: u8,
    /// Number of PDUs of each event carrying the CTE, 1 to 16.
    pub count: u8,
}

impl CteParams {
    fn validate(&self) -> Result<(), Error> {
        if !(2..=20).contains(&self.len) || self.ty > 2 || !(1..=16).contains(&self.count) {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

/// The periodic advertising train of a set.
#[derive(Debug)]
pub struct SyncSet {
    pub(crate) params: SyncParams,
    pub(crate) buf: DoubleBuffer,
    pub(crate) hdr: UllHdr,
    pub(crate) enabled: bool,
    pub(crate) started: bool,
    pub(crate) adi_enabled: bool,
    pub(crate) adi: Adi,
    pub(crate) access_addr: u32,
    pub(crate) crc_init: [u8; 3],
    pub(crate) chm: ChannelMap,
    /// Map and instant of an announced channel map update.
    pub(crate) chm_pending: Option<(ChannelMap, u16)>,
    pub(crate) event_counter: u16,
    pub(crate) cte: Option<CteParams>,
    pub(crate) cte_enabled: bool,
    pub(crate) data: AdData,
    /// Slot of the BIG broadcast from this train.
    pub(crate) big: Option<u8>,
    pub(crate) ticks_slot: u32,
    phy: PhyKind,
}

impl SyncSet {
    pub fn params(&self) -> &SyncParams {
        &self.params
    }

    /// Latest published AUX_SYNC_IND.
    pub fn head(&self) -> Option<PduRef> {
        self.buf.peek()
    }

    pub fn current(&self) -> Option<PduRef> {
        self.buf.current()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn access_addr(&self) -> u32 {
        self.access_addr
    }

    pub fn crc_init(&self) -> [u8; 3] {
        self.crc_init
    }

    pub fn chm(&self) -> ChannelMap {
        self.chm
    }

    pub fn chm_pending(&self) -> Option<(ChannelMap, u16)> {
        self.chm_pending
    }

    /// Counter of the next periodic event.
    pub fn event_counter(&self) -> u16 {
        self.event_counter
    }

    pub fn adi(&self) -> Option<Adi> {
        self.adi_enabled.then_some(self.adi)
    }

    pub fn is_disabling(&self) -> bool {
        self.hdr.is_disabling()
    }

    fn chain_fields(&self, adi: Adi) -> ChainFields {
        let mut fields = ChainFields::new(self.phy);
        fields.adi = self.adi_enabled.then_some(adi);
        if let Some(cte) = self.cte.filter(|_| self.cte_enabled) {
            fields.cte = Some(CteInfo {
                time: cte.len,
                ty: cte.ty,
            });
            fields.cte_count = cte.count;
        }
        fields
    }

    /// Rewrites the chain with the published data and the header edited per `add`, `rem` and
    /// `data`.
    fn rewrite(
        &mut self,
        pool: &dyn PduStore,
        add: HdrFields,
        rem: HdrFields,
        data: &HdrData<'_>,
    ) -> Result<(), Error> {
        let fields = self.chain_fields(self.adi);
        write_chain(
            pool,
            &mut self.buf,
            PduKind::AuxSyncInd,
            add,
            rem,
            data,
            self.data.committed(),
            &fields,
        )?;
        Ok(())
    }

    /// Replaces the ACAD with `f` applied to the published one.
    pub(crate) fn acad_rewrite(
        &mut self,
        pool: &dyn PduStore,
        f: impl FnOnce(&[u8]) -> Result<Acad, Error>,
    ) -> Result<(), Error> {
        let prev = pool.load(pdu_ref(&self.buf)?)?;
        let acad = f(prev.acad()?)?;
        self.rewrite(
            pool,
            HdrFields::ACAD,
            HdrFields::empty(),
            &HdrData::new().acad(&acad),
        )
    }

    fn sync_info(&self) -> SyncInfo {
        SyncInfo {
            interval: self.params.interval_units(),
            chm: self.chm.bytes(),
            aa: self.access_addr.to_le_bytes(),
            crc_init: self.crc_init,
            evt_cntr: self.event_counter,
            ..Default::default()
        }
    }
}

impl<'d, T: Ticker, R: RngCore> LinkLayer<'d, T, R> {
    /// Sets the periodic advertising parameters of set `handle`.
    ///
    /// The first call creates the train: an AUX_SYNC_IND, a fresh access address and CRC seed,
    /// and a SyncInfo in the set's AUX_ADV_IND.
    pub fn adv_sync_param_set(&mut self, handle: u8, params: SyncParams) -> Result<(), Error> {
        params.validate()?;
        let pool = self.pool;
        let set = self.adv_mut(handle)?;
        let props = set.params.props;
        if props.connectable_adv() || props.scannable_adv() || props.anonymous_adv() {
            return Err(Error::InvalidParameter);
        }
        if let Some(sync) = set.sync.as_mut() {
            if sync.enabled {
                return Err(Error::CommandDisallowed);
            }
            let (add, rem) = tx_power_toggle(params.include_tx_power);
            let tx_power = FieldValue::TxPower(set.params.tx_power);
            sync.params = params;
            return sync.rewrite(pool, add, rem, &HdrData::new().with(tx_power));
        }

        self.aux_ensure(handle)?;
        let access_addr = access_addr_get(&mut self.rng)?;
        let crc_init = crc_init_get(&mut self.rng);
        let chm = self.chm;
        let set = set_mut(&mut self.adv, handle)?;

        let mut header = ExtHeader::default();
        if params.include_tx_power {
            header.set(FieldValue::TxPower(set.params.tx_power));
        }
        let pdu = pdu_build(AdvMode::NonConn, &header, false, false)?;
        let mut buf = DoubleBuffer::new();
        let head = buf.init(pool, &pdu)?;
        let ticks_slot = us_to_ticks(chain_air_us(pool, head, set.params.secondary_phy)?);
        let mut sync = SyncSet {
            params,
            buf,
            hdr: UllHdr::new(),
            enabled: false,
            started: false,
            adi_enabled: false,
            adi: Adi::new(set.params.sid, 0),
            access_addr,
            crc_init,
            chm,
            chm_pending: None,
            event_counter: 0,
            cte: None,
            cte_enabled: false,
            data: AdData::default(),
            big: None,
            ticks_slot,
            phy: set.params.secondary_phy,
        };

        let aux = set.aux.as_mut().ok_or(Error::Unspecified)?;
        let info = HdrData::new().with(FieldValue::SyncInfo(sync.sync_info()));
        let edit = edit_head(
            pool,
            &mut aux.buf,
            PduKind::AuxAdvInd,
            HdrFields::SYNC_INFO,
            HdrFields::empty(),
            &info,
            set.params.secondary_phy,
        );
        if let Err(e) = edit {
            let _ = sync.buf.release_all(pool);
            return Err(e);
        }
        set.sync = Some(sync);
        info!("[sync] set {} periodic train created, aa {:x}", handle, access_addr);
        self.aux_slot_update(handle)
    }

    /// Sets the periodic advertising data of set `handle`, reassembling host fragments.
    ///
    /// While the train is enabled only complete data is accepted. [`DataOp::Unchanged`]
    /// republishes the current data under a new ADI and needs ADI to be enabled.
    pub fn adv_sync_ad_data_set(&mut self, handle: u8, op: DataOp, data: &[u8]) -> Result<(), Error> {
        let pool = self.pool;
        let sync = sync_mut(&mut self.adv, handle)?;
        if sync.enabled && !matches!(op, DataOp::Complete | DataOp::Unchanged) {
            return Err(Error::CommandDisallowed);
        }
        if op == DataOp::Unchanged && !sync.adi_enabled {
            return Err(Error::InvalidParameter);
        }
        if !sync.data.apply(op, data)? {
            return Ok(());
        }

        let adi = sync.adi.next();
        let fields = sync.chain_fields(adi);
        write_chain(
            pool,
            &mut sync.buf,
            PduKind::AuxSyncInd,
            HdrFields::empty(),
            HdrFields::empty(),
            &HdrData::new(),
            sync.data.staged(),
            &fields,
        )?;
        sync.data.commit();
        if sync.adi_enabled {
            sync.adi = adi;
        }
        debug!("[sync] set {} data {} bytes", handle, sync.data.committed().len());
        self.sync_slot_update(handle)
    }

    /// Enables or disables the periodic train of set `handle`, with or without ADI in its PDUs.
    ///
    /// The train starts once the set's extended advertising is enabled too. Disabling is
    /// refused while a BIG is broadcast from the train.
    pub fn adv_sync_enable(&mut self, handle: u8, enable: bool, adi: bool) -> Result<(), Error> {
        let pool = self.pool;
        let set = self.adv_mut(handle)?;
        let adv_running = set.enabled && set.aux.as_ref().is_some_and(|aux| aux.started);
        let sync = set.sync.as_mut().ok_or(Error::CommandDisallowed)?;

        if !enable {
            if sync.big.is_some() {
                return Err(Error::CommandDisallowed);
            }
            if !sync.enabled {
                return Ok(());
            }
            sync.enabled = false;
            if sync.started {
                sync.started = false;
                if let Err(e) = self.ticker.stop(TickerRole::Sync(handle).id()) {
                    warn!("[sync] set {} ticker stop failed: {:?}", handle, e);
                }
                self.disable(TickerRole::Sync(handle), Teardown::SyncStop(handle))?;
            }
            info!("[sync] set {} disabled", handle);
            return Ok(());
        }

        if sync.hdr.is_disabling() {
            return Err(Error::CommandDisallowed);
        }
        if sync.adi_enabled != adi {
            let was = sync.adi_enabled;
            sync.adi_enabled = adi;
            if let Err(e) = sync.rewrite(pool, HdrFields::empty(), HdrFields::empty(), &HdrData::new()) {
                sync.adi_enabled = was;
                return Err(e);
            }
        }
        if sync.enabled {
            return Ok(());
        }
        sync.enabled = true;
        if adv_running {
            if let Err(e) = self.sync_start(handle) {
                sync_mut(&mut self.adv, handle)?.enabled = false;
                return Err(e);
            }
        }
        info!("[sync] set {} enabled", handle);
        Ok(())
    }

    /// Sets the CTE of the periodic train of set `handle`. Refused while the CTE is enabled.
    pub fn adv_sync_cte_params_set(&mut self, handle: u8, params: CteParams) -> Result<(), Error> {
        params.validate()?;
        let sync = sync_mut(&mut self.adv, handle)?;
        if sync.cte_enabled {
            return Err(Error::CommandDisallowed);
        }
        sync.cte = Some(params);
        Ok(())
    }

    /// Adds the CTE to, or removes it from, the periodic train of set `handle`. Events with a
    /// CTE carry at least as many PDUs as the CTE count, padded with empty AUX_CHAIN_INDs.
    pub fn adv_sync_cte_enable(&mut self, handle: u8, enable: bool) -> Result<(), Error> {
        let pool = self.pool;
        let sync = sync_mut(&mut self.adv, handle)?;
        if sync.cte.is_none() {
            return Err(Error::CommandDisallowed);
        }
        if sync.cte_enabled == enable {
            return Ok(());
        }
        sync.cte_enabled = enable;
        if let Err(e) = sync.rewrite(pool, HdrFields::empty(), HdrFields::empty(), &HdrData::new()) {
            sync.cte_enabled = !enable;
            return Err(e);
        }
        self.sync_slot_update(handle)
    }

    /// Starts the periodic ticker of set `handle` in a free slot, or right away when no other
    /// auxiliary, periodic or isochronous event runs.
    pub(crate) fn sync_start(&mut self, handle: u8) -> Result<(), Error> {
        let foreign = self.foreign;
        let sync = sync_mut(&mut self.adv, handle)?;
        let ticks_slot = sync.ticks_slot;
        let ticks_periodic = duration_to_ticks(sync.params.interval);

        let anchor = match adv_aux_sync_free_anchor_get(&mut self.ticker, foreign, ticks_slot)? {
            Some(anchor) => anchor,
            None => ticks_add(self.ticker.ticks_now(), us_to_ticks(EVENT_OVERHEAD_START_US)),
        };
        self.ticker.start(
            TickerRole::Sync(handle).id(),
            TickerStart {
                ticks_anchor: anchor,
                ticks_first: 0,
                ticks_periodic,
                lazy: 0,
                ticks_slot,
            },
        )?;
        sync_mut(&mut self.adv, handle)?.started = true;
        debug!("[sync] set {} started at {}", handle, anchor);
        Ok(())
    }

    pub(crate) fn sync_slot_update(&mut self, handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let sync = sync_mut(&mut self.adv, handle)?;
        let us = chain_air_us(pool, pdu_ref(&sync.buf)?, sync.phy)?;
        let id = TickerRole::Sync(handle).id();
        sync.ticks_slot = slot_update(&mut self.ticker, sync.started.then_some(id), sync.ticks_slot, us)?;
        Ok(())
    }

    pub(crate) fn sync_prepare(&mut self, handle: u8, lazy: u16) -> Result<Prepared, Error> {
        let pool = self.pool;
        let sync = sync_mut(&mut self.adv, handle)?;
        let event_counter = sync.event_counter.wrapping_add(lazy);
        sync.event_counter = event_counter.wrapping_add(1);

        let mut chm_switched = false;
        if let Some((map, instant)) = sync.chm_pending {
            if instant_reached(event_counter, instant) {
                sync.chm = map;
                sync.chm_pending = None;
                chm_switched = true;
            }
        }
        let (head, _) = sync.buf.latest_get(pool)?;
        let chan_idx = chan_sel_2(event_counter, chan_id(sync.access_addr), &sync.chm);
        if chm_switched {
            self.mayfly.enqueue(Priority::UllHigh, Work::SyncChmComplete { handle })?;
        }
        Ok(Prepared {
            role: TickerRole::Sync(handle),
            head,
            event_counter,
            chan_idx,
            ticks_at_expire: 0,
        })
    }

    /// Refreshes the SyncInfo of the AUX_ADV_IND on air: offset from the auxiliary event that
    /// expired at `ticks_at_expire` to the next periodic event, and that event's counter.
    pub(crate) fn sync_info_fill(&mut self, handle: u8, ticks_at_expire: u32) -> Result<(), Error> {
        let pool = self.pool;
        let offset_us = expiry_offset_us(&mut self.ticker, TickerRole::Sync(handle).id(), ticks_at_expire)?;
        let set = set_mut(&mut self.adv, handle)?;
        let sync = set.sync.as_ref().ok_or(Error::Unspecified)?;
        let mut info = sync.sync_info();
        info.set_offset_us(offset_us);

        let aux = set.aux.as_ref().ok_or(Error::Unspecified)?;
        let head = aux.buf.current().ok_or(Error::Unspecified)?;
        let mut pdu = pool.load(head)?;
        pdu.field_patch(ExtHdrField::SyncInfo, |value| *value = FieldValue::SyncInfo(info))?;
        pool.store(head, &pdu)?;
        trace!("[sync] set {} offset {} us counter {}", handle, offset_us, info.evt_cntr);
        Ok(())
    }

    /// Announces `map` on the running periodic train of set `handle`. A stopped train takes
    /// the map right away.
    pub(crate) fn sync_chm_update(&mut self, handle: u8, map: ChannelMap) -> Result<(), Error> {
        let pool = self.pool;
        let Some(sync) = self
            .adv
            .get_mut(handle as usize)
            .and_then(Option::as_mut)
            .and_then(|set| set.sync.as_mut())
        else {
            return Ok(());
        };
        if !sync.started {
            sync.chm = map;
            return Ok(());
        }

        let ind = ChmUpdateInd {
            chm: map.bytes(),
            instant: sync.event_counter.wrapping_add(CHM_UPD_INSTANT_OFFSET),
        };
        let mut bytes = [0; ChmUpdateInd::SIZE];
        ind.encode(&mut bytes)?;
        sync.acad_rewrite(pool, |prev| {
            let mut acad: Acad = acad::without(prev, AD_TYPE_CHM_UPD_IND)?;
            acad::append(&mut acad, AD_TYPE_CHM_UPD_IND, &bytes)?;
            Ok(acad)
        })?;
        sync.chm_pending = Some((map, ind.instant));
        debug!("[sync] set {} channel map update at {}", handle, ind.instant);
        self.sync_slot_update(handle)
    }

    /// The periodic train of set `handle` switched maps: drop the indication from the ACAD and
    /// carry the new map in SyncInfo.
    pub(crate) fn sync_chm_complete(&mut self, handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let set = set_mut(&mut self.adv, handle)?;
        let sync = set.sync.as_mut().ok_or(Error::Unspecified)?;
        sync.acad_rewrite(pool, |prev| acad::without(prev, AD_TYPE_CHM_UPD_IND))?;
        let info = sync.sync_info();

        let aux = set.aux.as_mut().ok_or(Error::Unspecified)?;
        let prev = pool.load(pdu_ref(&aux.buf)?)?;
        let mut refreshed = prev.ext_header()?.sync_info().ok_or(Error::Unspecified)?;
        refreshed.chm = info.chm;
        edit_head(
            pool,
            &mut aux.buf,
            PduKind::AuxAdvInd,
            HdrFields::SYNC_INFO,
            HdrFields::empty(),
            &HdrData::new().with(FieldValue::SyncInfo(refreshed)),
            set.params.secondary_phy,
        )?;
        debug!("[sync] set {} channel map switched", handle);
        self.sync_slot_update(handle)
    }

    /// Teardown of a stopped train: an update that can no longer reach its instant applies now.
    pub(crate) fn sync_stopped(&mut self, handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let sync = sync_mut(&mut self.adv, handle)?;
        let Some((map, _)) = sync.chm_pending.take() else {
            return Ok(());
        };
        sync.chm = map;
        sync.acad_rewrite(pool, |prev| acad::without(prev, AD_TYPE_CHM_UPD_IND))
    }
}

fn sync_mut(adv: &mut [Option<super::AdvSet>], handle: u8) -> Result<&mut SyncSet, Error> {
    set_mut(adv, handle)?.sync.as_mut().ok_or(Error::CommandDisallowed)
}

fn tx_power_toggle(include: bool) -> (HdrFields, HdrFields) {
    if include {
        (HdrFields::TX_POWER, HdrFields::empty())
    } else {
        (HdrFields::empty(), HdrFields::TX_POWER)
    }
}

/// True once `counter` has reached `instant`, modulo the 16-bit event counter.
pub(crate) fn instant_reached(counter: u16, instant: u16) -> bool {
    counter.wrapping_sub(instant) < 0x8000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_wraps() {
        assert!(instant_reached(6, 6));
        assert!(instant_reached(7, 6));
        assert!(!instant_reached(5, 6));
        assert!(instant_reached(2, 0xFFFE));
        assert!(!instant_reached(0xFFFE, 2));
    }

    #[test]
    fn params_ranges() {
        let fast = SyncParams {
            interval: Duration::from_millis(5),
            ..Default::default()
        };
        assert_eq!(fast.validate(), Err(Error::InvalidParameter));
        assert_eq!(SyncParams::default().interval_units(), 80);

        assert!(CteParams { len: 2, ty: 0, count: 1 }.validate().is_ok());
        assert_eq!(CteParams { len: 1, ty: 0, count: 1 }.validate(), Err(Error::InvalidParameter));
        assert_eq!(CteParams { len: 20, ty: 3, count: 1 }.validate(), Err(Error::InvalidParameter));
        assert_eq!(CteParams { len: 20, ty: 2, count: 17 }.validate(), Err(Error::InvalidParameter));
    }
}

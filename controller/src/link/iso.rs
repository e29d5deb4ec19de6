//! Broadcast isochronous groups and the BIGInfo announcing them.
use bt_hci::param::PhyKind;
use rand_core::RngCore;

use super::sync::{instant_reached, Acad};
use super::ull::{Teardown, UllHdr};
use super::{expiry_offset_us, set_mut, LinkLayer, Prepared};
use crate::chan_sel::{access_addr_get, chan_id, chan_sel_2, ChannelMap};
use crate::codec::{Encode, Type};
use crate::config::ADV_ISO_STREAM_COUNT;
use crate::mayfly::{Priority, Work};
use crate::pdu::acad::{self, BigEncryption, BigInfo, AD_TYPE_BIGINFO, BIGINFO_ENC_SIZE, CHM_UPD_INSTANT_OFFSET};
use crate::sched::adv_aux_sync_free_anchor_get;
use crate::ticker::{Ticker, TickerRole, TickerStart};
use crate::time::{
    pdu_us, phy_code, ticks_add, us_to_ticks, EVENT_IFS_US, EVENT_MSS_US, EVENT_OVERHEAD_END_US,
    EVENT_OVERHEAD_START_US, PERIODIC_INT_UNIT_US,
};
use crate::Error;

pub const LL_BIS_OCTETS_TX_MAX: u32 = 251;
pub const PDU_BIG_BN_MAX: u32 = 7;
pub const PDU_BIG_NSE_MAX: u32 = 31;

/// Payload of the BIG control PDU used to time the control subevent.
const PDU_BIG_CTRL_SIZE: usize = 8;
/// Message integrity check appended to encrypted BIS PDUs.
const PDU_MIC_SIZE: u32 = 4;

const BIG_HANDLE_MAX: u8 = 0xEF;
const NUM_BIS_MAX: u8 = 0x1F;
const SDU_INTERVAL_US_MIN: u32 = 0xFF;
const SDU_INTERVAL_US_MAX: u32 = 0xF_FFFF;
const MAX_SDU_MAX: u16 = 0x0FFF;
const MAX_LATENCY_MS_MIN: u16 = 0x0005;
const MAX_LATENCY_MS_MAX: u16 = 0x0FA0;
const RTN_MAX: u8 = 0x1E;
const ISO_INTERVAL_MIN: u32 = 4;
const ISO_INTERVAL_MAX: u32 = 0x0C80;

/// Arrangement of the subevents of the BISes in a BIG event.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Packing {
    /// All subevents of a BIS before the next BIS.
    #[default]
    Sequential,
    /// Subevents of the BISes alternate.
    Interleaved,
}

/// Host parameters of a BIG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigParams {
    pub num_bis: u8,
    pub sdu_interval_us: u32,
    pub max_sdu: u16,
    pub max_latency_ms: u16,
    pub rtn: u8,
    pub phy: PhyKind,
    pub packing: Packing,
    pub framing: bool,
    /// Broadcast code of an encrypted BIG.
    pub broadcast_code: Option<[u8; 16]>,
}

impl Default for BigParams {
    fn default() -> Self {
        Self {
            num_bis: 1,
            sdu_interval_us: 10_000,
            max_sdu: 100,
            max_latency_ms: 10,
            rtn: 0,
            phy: PhyKind::Le1M,
            packing: Packing::Sequential,
            framing: false,
            broadcast_code: None,
        }
    }
}

impl BigParams {
    fn validate(&self) -> Result<(), Error> {
        let valid = (1..=NUM_BIS_MAX).contains(&self.num_bis)
            && (SDU_INTERVAL_US_MIN..=SDU_INTERVAL_US_MAX).contains(&self.sdu_interval_us)
            && (1..=MAX_SDU_MAX).contains(&self.max_sdu)
            && (MAX_LATENCY_MS_MIN..=MAX_LATENCY_MS_MAX).contains(&self.max_latency_ms)
            && self.rtn <= RTN_MAX;
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidParameter)
        }
    }
}

/// Negotiated timing of a BIG.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigTiming {
    /// Burst number: new payloads per BIS per event.
    pub bn: u8,
    /// Payloads per SDU interval group, before the burst number cap.
    pub bn_total: u8,
    /// Immediate repetition count.
    pub irc: u8,
    /// Subevents per BIS per event.
    pub nse: u8,
    /// Pre-transmission offset.
    pub pto: u8,
    /// Pre-transmitted subevents.
    pub ptc: u8,
    pub max_pdu: u8,
    pub iso_interval_us: u32,
    pub sub_interval_us: u32,
    pub bis_spacing_us: u32,
    /// Radio time of one BIG event, overheads included.
    pub event_us: u32,
}

impl BigTiming {
    /// ISO interval in 1.25 ms units.
    pub fn iso_interval(&self) -> u16 {
        (self.iso_interval_us / PERIODIC_INT_UNIT_US) as u16
    }
}

/// Derives the BIG timing for `params`.
///
/// The burst number follows from the SDUs that fit the latency, the ISO interval from the
/// SDU interval. Retransmissions are cut until one event fits the interval, less
/// `slot_overhead_us`; time left over goes to pre-transmissions. Fails with
/// [`Error::InvalidParameter`] when the ISO interval is out of range or a single
/// transmission per payload does not fit.
pub fn big_timing_negotiate(params: &BigParams, slot_overhead_us: u32) -> Result<BigTiming, Error> {
    if params.sdu_interval_us == 0 || params.max_sdu == 0 || params.num_bis == 0 {
        return Err(Error::InvalidParameter);
    }
    let max_pdu = (params.max_sdu as u32).min(LL_BIS_OCTETS_TX_MAX);
    let sdu_per_event = (params.max_latency_ms as u32 * 1000 / params.sdu_interval_us).max(2) - 1;
    let mut bn = params.max_sdu.div_ceil(max_pdu as u16) as u32 * sdu_per_event;
    let bn_total = bn;
    if bn > PDU_BIG_BN_MAX {
        bn = PDU_BIG_BN_MAX;
    }
    let bn_total = if bn_total > PDU_BIG_BN_MAX {
        bn_total.div_ceil(PDU_BIG_BN_MAX) * PDU_BIG_BN_MAX
    } else {
        bn_total
    };

    let iso_units = (params.sdu_interval_us as u64 * bn as u64 * sdu_per_event as u64)
        / (bn_total as u64 * PERIODIC_INT_UNIT_US as u64);
    if !(ISO_INTERVAL_MIN as u64..=ISO_INTERVAL_MAX as u64).contains(&iso_units) {
        return Err(Error::InvalidParameter);
    }
    let iso_interval_us = iso_units as u32 * PERIODIC_INT_UNIT_US;

    let mic = if params.broadcast_code.is_some() { PDU_MIC_SIZE } else { 0 };
    let sub_us = pdu_us((max_pdu + mic) as usize, params.phy) + EVENT_MSS_US;
    let ctrl_us = pdu_us(PDU_BIG_CTRL_SIZE, params.phy) + EVENT_IFS_US;
    let num_bis = params.num_bis as u32;
    let max_us = iso_interval_us.saturating_sub(slot_overhead_us);

    let mut rtn = params.rtn as u32;
    let (irc, nse, event_us) = loop {
        let irc = rtn + 1;
        let nse = bn * irc;
        let event_us = sub_us * nse * num_bis + ctrl_us + EVENT_OVERHEAD_START_US + EVENT_OVERHEAD_END_US;
        if nse <= PDU_BIG_NSE_MAX && event_us <= max_us {
            break (irc, nse, event_us);
        }
        if rtn == 0 {
            return Err(Error::InvalidParameter);
        }
        rtn -= 1;
    };

    let ptc = (((max_us - event_us) / (sub_us * bn * num_bis)) * bn)
        .min(bn)
        .min(PDU_BIG_NSE_MAX - nse);
    let nse = nse + ptc;
    let (sub_interval_us, bis_spacing_us) = match params.packing {
        Packing::Sequential => (sub_us, sub_us * nse),
        Packing::Interleaved => (sub_us * nse, sub_us),
    };

    Ok(BigTiming {
        bn: bn as u8,
        bn_total: bn_total as u8,
        irc: irc as u8,
        nse: nse as u8,
        pto: if ptc > 0 { (bn_total / bn) as u8 } else { 0 },
        ptc: ptc as u8,
        max_pdu: max_pdu as u8,
        iso_interval_us,
        sub_interval_us,
        bis_spacing_us,
        event_us: event_us + sub_us * ptc * num_bis,
    })
}

/// A BIG broadcast from the periodic train of an advertising set.
#[derive(Debug)]
pub struct IsoSet {
    big_handle: u8,
    adv_handle: u8,
    params: BigParams,
    timing: BigTiming,
    pub(crate) info: BigInfo,
    pub(crate) hdr: UllHdr,
    pub(crate) chm: ChannelMap,
    pub(crate) chm_pending: Option<(ChannelMap, u16)>,
    pub(crate) event_counter: u16,
}

impl IsoSet {
    pub fn big_handle(&self) -> u8 {
        self.big_handle
    }

    pub fn adv_handle(&self) -> u8 {
        self.adv_handle
    }

    pub fn params(&self) -> &BigParams {
        &self.params
    }

    pub fn timing(&self) -> &BigTiming {
        &self.timing
    }

    /// BIGInfo as last written to the ACAD.
    pub fn big_info(&self) -> &BigInfo {
        &self.info
    }

    pub fn chm(&self) -> ChannelMap {
        self.chm
    }

    pub fn chm_pending(&self) -> Option<(ChannelMap, u16)> {
        self.chm_pending
    }

    pub fn event_counter(&self) -> u16 {
        self.event_counter
    }

    pub fn is_disabling(&self) -> bool {
        self.hdr.is_disabling()
    }

    pub(crate) fn chm_update(&mut self, map: ChannelMap) {
        self.chm_pending = Some((map, self.event_counter.wrapping_add(CHM_UPD_INSTANT_OFFSET)));
    }
}

fn big_info_bytes(info: &BigInfo) -> Result<([u8; BIGINFO_ENC_SIZE], usize), Error> {
    let mut bytes = [0; BIGINFO_ENC_SIZE];
    let size = info.size();
    info.encode(&mut bytes[..size])?;
    Ok((bytes, size))
}

/// `acad` with its BIGInfo replaced by `info`.
fn acad_with_big_info(acad: &[u8], info: &BigInfo) -> Result<Acad, Error> {
    let (bytes, size) = big_info_bytes(info)?;
    let mut out: Acad = acad::without(acad, AD_TYPE_BIGINFO)?;
    acad::append(&mut out, AD_TYPE_BIGINFO, &bytes[..size])?;
    Ok(out)
}

impl<'d, T: Ticker, R: RngCore> LinkLayer<'d, T, R> {
    /// Creates BIG `big_handle` on the periodic train of set `adv_handle`.
    ///
    /// Negotiates the timing, announces the BIG with a BIGInfo in the train's ACAD and starts the
    /// BIG ticker in a free slot. Nothing is left behind when a step fails.
    pub fn big_create(&mut self, big_handle: u8, adv_handle: u8, params: BigParams) -> Result<(), Error> {
        params.validate()?;
        if big_handle > BIG_HANDLE_MAX {
            return Err(Error::InvalidParameter);
        }
        if self.big(big_handle).is_some() {
            return Err(Error::CommandDisallowed);
        }
        let streams: usize = self.iso.iter().flatten().map(|iso| iso.params.num_bis as usize).sum();
        if streams + params.num_bis as usize > ADV_ISO_STREAM_COUNT {
            return Err(Error::MemoryCapacityExceeded);
        }
        let slot = self
            .iso
            .iter()
            .position(Option::is_none)
            .ok_or(Error::MemoryCapacityExceeded)? as u8;
        let set = self.adv_mut(adv_handle)?;
        if set.sync.as_ref().map_or(true, |sync| sync.big.is_some()) {
            return Err(Error::CommandDisallowed);
        }

        let timing = big_timing_negotiate(&params, EVENT_OVERHEAD_START_US)?;
        let seed_access_addr = access_addr_get(&mut self.rng)?;
        let base_crc_init = self.rng.next_u32() as u16;
        let encryption = match params.broadcast_code {
            Some(_) => {
                let mut enc = BigEncryption { giv: [0; 8], gskd: [0; 16] };
                self.rng.fill_bytes(&mut enc.giv);
                self.rng.fill_bytes(&mut enc.gskd);
                Some(enc)
            }
            None => None,
        };
        let info = BigInfo {
            iso_interval: timing.iso_interval(),
            num_bis: params.num_bis,
            nse: timing.nse,
            bn: timing.bn,
            sub_interval: timing.sub_interval_us,
            pto: timing.pto,
            spacing: timing.bis_spacing_us,
            irc: timing.irc,
            max_pdu: timing.max_pdu,
            seed_access_addr,
            sdu_interval: params.sdu_interval_us,
            max_sdu: params.max_sdu,
            base_crc_init,
            chm: self.chm.bytes(),
            phy: phy_code(params.phy),
            framing: params.framing,
            encryption,
            ..Default::default()
        };

        let pool = self.pool;
        let sync = set_mut(&mut self.adv, adv_handle)?
            .sync
            .as_mut()
            .ok_or(Error::Unspecified)?;
        sync.acad_rewrite(pool, |prev| acad_with_big_info(prev, &info))?;
        sync.big = Some(slot);

        if let Err(e) = self.big_ticker_start(slot, &timing) {
            self.big_info_remove(adv_handle)?;
            return Err(e);
        }
        self.iso[slot as usize] = Some(IsoSet {
            big_handle,
            adv_handle,
            params,
            timing,
            info,
            hdr: UllHdr::new(),
            chm: self.chm,
            chm_pending: None,
            event_counter: 0,
        });
        self.sync_slot_update(adv_handle)?;
        info!(
            "[iso] BIG {} on set {}: {} BIS, interval {} us, nse {}",
            big_handle, adv_handle, params.num_bis, timing.iso_interval_us, timing.nse
        );
        Ok(())
    }

    fn big_ticker_start(&mut self, slot: u8, timing: &BigTiming) -> Result<(), Error> {
        let ticks_slot = us_to_ticks(timing.event_us);
        let anchor = match adv_aux_sync_free_anchor_get(&mut self.ticker, self.foreign, ticks_slot)? {
            Some(anchor) => anchor,
            None => ticks_add(self.ticker.ticks_now(), us_to_ticks(EVENT_OVERHEAD_START_US)),
        };
        self.ticker.start(
            TickerRole::Iso(slot).id(),
            TickerStart {
                ticks_anchor: anchor,
                ticks_first: 0,
                ticks_periodic: us_to_ticks(timing.iso_interval_us),
                lazy: 0,
                ticks_slot,
            },
        )?;
        Ok(())
    }

    /// Stops BIG `big_handle`. Its BIGInfo and streams are released once no BIG event is in
    /// flight.
    pub fn big_terminate(&mut self, big_handle: u8) -> Result<(), Error> {
        let slot = self
            .iso
            .iter()
            .position(|iso| iso.as_ref().is_some_and(|iso| iso.big_handle == big_handle))
            .ok_or(Error::UnknownAdvIdentifier)? as u8;
        let iso = self.iso[slot as usize].as_ref().ok_or(Error::Unspecified)?;
        if iso.hdr.is_disabling() {
            return Err(Error::CommandDisallowed);
        }
        if let Err(e) = self.ticker.stop(TickerRole::Iso(slot).id()) {
            warn!("[iso] BIG {} ticker stop failed: {:?}", big_handle, e);
        }
        info!("[iso] BIG {} terminating", big_handle);
        self.disable(TickerRole::Iso(slot), Teardown::BigTerminate(slot))
    }

    /// Teardown of a terminated BIG.
    pub(crate) fn big_release(&mut self, slot: u8) -> Result<(), Error> {
        let iso = self
            .iso
            .get_mut(slot as usize)
            .and_then(Option::take)
            .ok_or(Error::Unspecified)?;
        self.big_info_remove(iso.adv_handle)?;
        self.sync_slot_update(iso.adv_handle)?;
        info!("[iso] BIG {} released", iso.big_handle);
        Ok(())
    }

    fn big_info_remove(&mut self, adv_handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let sync = set_mut(&mut self.adv, adv_handle)?
            .sync
            .as_mut()
            .ok_or(Error::Unspecified)?;
        sync.big = None;
        sync.acad_rewrite(pool, |prev| acad::without(prev, AD_TYPE_BIGINFO))
    }

    pub(crate) fn iso_prepare(&mut self, slot: u8, lazy: u16) -> Result<Prepared, Error> {
        let iso = self
            .iso
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::Unspecified)?;
        let event_counter = iso.event_counter.wrapping_add(lazy);
        iso.event_counter = event_counter.wrapping_add(1);

        let mut chm_switched = false;
        if let Some((map, instant)) = iso.chm_pending {
            if instant_reached(event_counter, instant) {
                iso.chm = map;
                iso.chm_pending = None;
                chm_switched = true;
            }
        }
        let chan_idx = chan_sel_2(event_counter, chan_id(iso.info.seed_access_addr), &iso.chm);
        if chm_switched {
            self.mayfly.enqueue(Priority::UllHigh, Work::IsoChmComplete { handle: slot })?;
        }
        Ok(Prepared {
            role: TickerRole::Iso(slot),
            head: None,
            event_counter,
            chan_idx,
            ticks_at_expire: 0,
        })
    }

    /// Writes the offset from the periodic event that expired at `ticks_at_expire` to the next
    /// BIG event into the BIGInfo on air.
    pub(crate) fn big_offset_fill(&mut self, slot: u8, ticks_at_expire: u32) -> Result<(), Error> {
        let pool = self.pool;
        let offset_us = expiry_offset_us(&mut self.ticker, TickerRole::Iso(slot).id(), ticks_at_expire)?;
        let iso = self
            .iso
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::Unspecified)?;
        iso.info.set_offset_us(offset_us);
        let (offs, offs_units) = (iso.info.offs, iso.info.offs_units);

        let sync = set_mut(&mut self.adv, iso.adv_handle)?
            .sync
            .as_ref()
            .ok_or(Error::Unspecified)?;
        let head = sync.buf.current().ok_or(Error::Unspecified)?;
        let mut pdu = pool.load(head)?;
        let acad = pdu.acad_mut()?;
        let range = acad::find(acad, AD_TYPE_BIGINFO).ok_or(Error::Unspecified)?;
        BigInfo::patch_offset(&mut acad[range.start + 2..range.end], offs, offs_units)?;
        pool.store(head, &pdu)?;
        trace!("[iso] BIG slot {} offset {} us", slot, offset_us);
        Ok(())
    }

    /// The BIG in `slot` switched maps: rewrite its BIGInfo with the new map.
    pub(crate) fn iso_chm_complete(&mut self, slot: u8) -> Result<(), Error> {
        let pool = self.pool;
        let iso = self
            .iso
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::Unspecified)?;
        iso.info.chm = iso.chm.bytes();
        let info = iso.info;
        let adv_handle = iso.adv_handle;

        let sync = set_mut(&mut self.adv, adv_handle)?
            .sync
            .as_mut()
            .ok_or(Error::Unspecified)?;
        sync.acad_rewrite(pool, |prev| acad_with_big_info(prev, &info))?;
        debug!("[iso] BIG slot {} channel map switched", slot);
        self.sync_slot_update(adv_handle)
    }
}

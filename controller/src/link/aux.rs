//! Auxiliary advertising: the AUX_ADV_IND chain on the secondary channels.
use rand_core::RngCore;

use super::adv::pdu_build;
use super::ull::UllHdr;
use super::{chain_air_us, expiry_offset_us, set_mut, slot_update, LinkLayer, Prepared};
use crate::chain::{edit_head, write_chain, ChainFields};
use crate::chan_sel::chan_sel_2;
use crate::hdr::{HdrData, PduKind};
use crate::pdu::{Adi, AuxPtr, ExtHdrField, ExtHeader, FieldValue, HdrFields};
use crate::pool::{DoubleBuffer, PduRef};
use crate::ticker::{Ticker, TickerRole, TickerStart};
use crate::time::{phy_code, us_to_ticks};
use crate::Error;

/// The auxiliary event train of an advertising set.
#[derive(Debug)]
pub struct AuxSet {
    pub(crate) buf: DoubleBuffer,
    pub(crate) hdr: UllHdr,
    pub(crate) started: bool,
    pub(crate) chan_id: u16,
    /// Channel of the next event, announced in the primary AuxPtr.
    pub(crate) chan_idx: u8,
    pub(crate) event_counter: u16,
    pub(crate) ticks_slot: u32,
}

impl AuxSet {
    /// Latest published AUX_ADV_IND.
    pub fn head(&self) -> Option<PduRef> {
        self.buf.peek()
    }

    pub fn current(&self) -> Option<PduRef> {
        self.buf.current()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn chan_idx(&self) -> u8 {
        self.chan_idx
    }

    pub fn event_counter(&self) -> u16 {
        self.event_counter
    }

    pub fn ticks_slot(&self) -> u32 {
        self.ticks_slot
    }
}

impl<'d, T: Ticker, R: RngCore> LinkLayer<'d, T, R> {
    /// Gives set `handle` an AUX_ADV_IND if it has none.
    ///
    /// The advertiser and target addresses move from the primary PDU to the AUX_ADV_IND, and the
    /// primary PDU gets ADI and an AuxPtr. Nothing changes when either edit fails.
    pub(crate) fn aux_ensure(&mut self, handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let chan_id = self.rng.next_u32() as u16;
        let set = set_mut(&mut self.adv, handle)?;
        if set.aux.is_some() {
            return Ok(());
        }

        let params = set.params;
        let mut header = ExtHeader::default();
        if !params.props.anonymous_adv() {
            header.set(FieldValue::AdvA(params.adv_addr));
        }
        if params.props.directed_adv() {
            header.set(FieldValue::TgtA(params.tgt_addr));
        }
        header.set(FieldValue::Adi(set.adi));
        if params.props.include_tx_power() {
            header.set(FieldValue::TxPower(params.tx_power));
        }
        let pdu = pdu_build(params.mode(), &header, params.adv_addr_random, params.tgt_addr_random)?;
        let mut buf = DoubleBuffer::new();
        buf.init(pool, &pdu)?;

        let ptr = AuxPtr {
            phy: phy_code(params.secondary_phy),
            ..Default::default()
        };
        let data = HdrData::new().with(FieldValue::Adi(set.adi)).with(FieldValue::AuxPtr(ptr));
        let primary = edit_head(
            pool,
            &mut set.buf,
            PduKind::ExtInd,
            HdrFields::ADI | HdrFields::AUX_PTR,
            HdrFields::ADV_ADDR | HdrFields::TGT_ADDR,
            &data,
            params.primary_phy,
        );
        if let Err(e) = primary {
            let _ = buf.release_all(pool);
            return Err(e);
        }

        let ticks_slot = us_to_ticks(chain_air_us(pool, pdu_ref(&buf)?, params.secondary_phy)?);
        set.aux = Some(AuxSet {
            buf,
            hdr: UllHdr::new(),
            started: false,
            chan_id,
            chan_idx: 0,
            event_counter: 0,
            ticks_slot,
        });
        debug!("[aux] set {} aux created", handle);
        Ok(())
    }

    /// Publishes the staged advertising data of set `handle` with a new ADI.
    ///
    /// On failure the primary and auxiliary PDUs both keep the previous ADI and data.
    pub(crate) fn aux_data_publish(&mut self, handle: u8) -> Result<(), Error> {
        self.aux_ensure(handle)?;
        let pool = self.pool;
        let set = set_mut(&mut self.adv, handle)?;
        let params = set.params;
        let adi = set.adi.next();
        let aux = set.aux.as_mut().ok_or(Error::Unspecified)?;

        let primary_adi = |adi: Adi| HdrData::new().with(FieldValue::Adi(adi));
        edit_head(
            pool,
            &mut set.buf,
            PduKind::ExtInd,
            HdrFields::ADI,
            HdrFields::empty(),
            &primary_adi(adi),
            params.primary_phy,
        )?;

        let mut fields = ChainFields::new(params.secondary_phy);
        fields.adi = Some(adi);
        fields.chainable = !params.props.connectable_adv();
        let written = write_chain(
            pool,
            &mut aux.buf,
            PduKind::AuxAdvInd,
            HdrFields::empty(),
            HdrFields::empty(),
            &HdrData::new(),
            set.data.staged(),
            &fields,
        );
        if let Err(e) = written {
            // The primary publication is still pending, so this edit is in place.
            if let Err(undo) = edit_head(
                pool,
                &mut set.buf,
                PduKind::ExtInd,
                HdrFields::ADI,
                HdrFields::empty(),
                &primary_adi(set.adi),
                params.primary_phy,
            ) {
                warn!("[aux] set {} primary ADI restore failed: {:?}", handle, undo);
            }
            return Err(e);
        }
        set.adi = adi;
        set.data.commit();
        debug!("[aux] set {} data {} bytes did {}", handle, set.data.committed().len(), adi.did);
        self.aux_slot_update(handle)
    }

    /// Resizes the auxiliary ticker slot to the air time of the published chain.
    pub(crate) fn aux_slot_update(&mut self, handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let set = set_mut(&mut self.adv, handle)?;
        let phy = set.params.secondary_phy;
        let Some(aux) = set.aux.as_mut() else {
            return Ok(());
        };
        let us = chain_air_us(pool, pdu_ref(&aux.buf)?, phy)?;
        let id = TickerRole::Aux(handle).id();
        aux.ticks_slot = slot_update(&mut self.ticker, aux.started.then_some(id), aux.ticks_slot, us)?;
        Ok(())
    }

    pub(crate) fn aux_start(&mut self, handle: u8, ticks_anchor: u32, ticks_periodic: u32) -> Result<(), Error> {
        let aux = set_mut(&mut self.adv, handle)?.aux.as_mut().ok_or(Error::Unspecified)?;
        self.ticker.start(
            TickerRole::Aux(handle).id(),
            TickerStart {
                ticks_anchor,
                ticks_first: 0,
                ticks_periodic,
                lazy: 0,
                ticks_slot: aux.ticks_slot,
            },
        )?;
        aux.started = true;
        Ok(())
    }

    /// Stops the auxiliary ticker if it runs.
    pub(crate) fn aux_stop(&mut self, handle: u8) {
        let Ok(set) = set_mut(&mut self.adv, handle) else {
            return;
        };
        let Some(aux) = set.aux.as_mut().filter(|aux| aux.started) else {
            return;
        };
        aux.started = false;
        if let Err(e) = self.ticker.stop(TickerRole::Aux(handle).id()) {
            warn!("[aux] set {} ticker stop failed: {:?}", handle, e);
        }
    }

    pub(crate) fn aux_prepare(&mut self, handle: u8, lazy: u16) -> Result<Prepared, Error> {
        let pool = self.pool;
        let aux = self.adv_mut(handle)?.aux.as_mut().ok_or(Error::Unspecified)?;
        let (head, _) = aux.buf.latest_get(pool)?;
        let event_counter = aux.event_counter.wrapping_add(lazy);
        aux.event_counter = event_counter.wrapping_add(1);
        Ok(Prepared {
            role: TickerRole::Aux(handle),
            head,
            event_counter,
            chan_idx: aux.chan_idx,
            ticks_at_expire: 0,
        })
    }

    /// Points the primary PDU on air at the next auxiliary event: channel, PHY and offset from
    /// the primary event that expired at `ticks_at_expire`.
    pub(crate) fn aux_offset_fill(&mut self, handle: u8, ticks_at_expire: u32) -> Result<(), Error> {
        let pool = self.pool;
        let chm = self.chm;
        let offset_us = expiry_offset_us(&mut self.ticker, TickerRole::Aux(handle).id(), ticks_at_expire)?;
        let set = set_mut(&mut self.adv, handle)?;
        let phy = phy_code(set.params.secondary_phy);
        let aux = set.aux.as_mut().ok_or(Error::Unspecified)?;
        aux.chan_idx = chan_sel_2(aux.event_counter, aux.chan_id, &chm);
        let chan_idx = aux.chan_idx;

        let head = set.buf.current().ok_or(Error::Unspecified)?;
        let mut pdu = pool.load(head)?;
        pdu.field_patch(ExtHdrField::AuxPtr, |value| {
            if let FieldValue::AuxPtr(ptr) = value {
                ptr.chan_idx = chan_idx;
                ptr.phy = phy;
                ptr.set_offset_us(offset_us);
            }
        })?;
        pool.store(head, &pdu)?;
        trace!("[aux] set {} offset {} us chan {}", handle, offset_us, chan_idx);
        Ok(())
    }
}

pub(crate) fn pdu_ref(buf: &DoubleBuffer) -> Result<PduRef, Error> {
    buf.peek().ok_or(Error::Unspecified)
}

//! Extended advertising sets and their primary channel ADV_EXT_IND.
use bt_hci::param::{AdvEventProps, PhyKind};
use embassy_time::Duration;
use rand_core::RngCore;

use super::aux::AuxSet;
use super::sync::SyncSet;
use super::ull::{Teardown, UllHdr};
use super::{set_mut, AdData, DataOp, LinkLayer, Prepared};
use crate::pdu::{Adi, AdvMode, AdvPdu, ExtHeader, FieldValue};
use crate::pool::{DoubleBuffer, PduRef};
use crate::ticker::{Ticker, TickerRole, TickerStart};
use crate::time::{duration_to_ticks, pdu_us, ticks_add, us_to_ticks, ADV_CHAN_HOP_US, EVENT_MAFS_US, EVENT_OVERHEAD_START_US};
use crate::Error;

/// Primary channel index reported for advertising events.
const ADV_CHAN_FIRST: u8 = 37;

const ADV_INTERVAL_MIN: Duration = Duration::from_millis(20);

const SID_MAX: u8 = 0x0F;

/// Parameters of an extended advertising set.
#[derive(Debug, Clone, Copy)]
pub struct AdvParams {
    pub props: AdvEventProps,
    pub interval: Duration,
    pub sid: u8,
    pub adv_addr: [u8; 6],
    pub adv_addr_random: bool,
    pub tgt_addr: [u8; 6],
    pub tgt_addr_random: bool,
    pub primary_phy: PhyKind,
    pub secondary_phy: PhyKind,
    pub tx_power: i8,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            props: AdvEventProps::new(),
            interval: Duration::from_millis(100),
            sid: 0,
            adv_addr: [0; 6],
            adv_addr_random: false,
            tgt_addr: [0; 6],
            tgt_addr_random: false,
            primary_phy: PhyKind::Le1M,
            secondary_phy: PhyKind::Le1M,
            tx_power: 0,
        }
    }
}

impl AdvParams {
    fn validate(&self) -> Result<(), Error> {
        let props = &self.props;
        let conn = props.connectable_adv();
        let scan = props.scannable_adv();
        if props.legacy_adv() || (conn && scan) || (props.anonymous_adv() && (conn || scan)) {
            return Err(Error::InvalidParameter);
        }
        if self.sid > SID_MAX || self.interval < ADV_INTERVAL_MIN {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }

    pub(crate) fn mode(&self) -> AdvMode {
        if self.props.connectable_adv() {
            AdvMode::Conn
        } else if self.props.scannable_adv() {
            AdvMode::Scan
        } else {
            AdvMode::NonConn
        }
    }

    /// Whether the set needs an AUX_ADV_IND regardless of its data.
    fn needs_aux(&self) -> bool {
        self.props.connectable_adv() || self.props.scannable_adv()
    }
}

/// An extended advertising set.
#[derive(Debug)]
pub struct AdvSet {
    pub(crate) params: AdvParams,
    pub(crate) buf: DoubleBuffer,
    pub(crate) hdr: UllHdr,
    pub(crate) enabled: bool,
    /// ADI of the published advertising data.
    pub(crate) adi: Adi,
    pub(crate) data: AdData,
    pub(crate) aux: Option<AuxSet>,
    pub(crate) sync: Option<SyncSet>,
    pub(crate) ticks_slot: u32,
}

impl AdvSet {
    pub fn params(&self) -> &AdvParams {
        &self.params
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Latest published ADV_EXT_IND.
    pub fn head(&self) -> Option<PduRef> {
        self.buf.peek()
    }

    /// ADV_EXT_IND the radio transmits.
    pub fn current(&self) -> Option<PduRef> {
        self.buf.current()
    }

    pub fn adi(&self) -> Adi {
        self.adi
    }

    pub fn aux(&self) -> Option<&AuxSet> {
        self.aux.as_ref()
    }

    pub fn sync(&self) -> Option<&SyncSet> {
        self.sync.as_ref()
    }

    pub fn is_disabling(&self) -> bool {
        self.hdr.is_disabling()
    }
}

/// Builds a PDU from a complete header.
pub(crate) fn pdu_build(mode: AdvMode, header: &ExtHeader, tx_random: bool, rx_random: bool) -> Result<AdvPdu, Error> {
    let mut pdu = AdvPdu::new();
    let n = header.encode(mode, &mut pdu.buf_mut()[..])?;
    pdu.set_len(n)?;
    pdu.set_tx_addr(tx_random);
    pdu.set_rx_addr(rx_random);
    Ok(pdu)
}

/// Radio time of one primary event: the PDU on each of the three channels.
fn primary_slot_ticks(pdu_len: usize, phy: PhyKind) -> u32 {
    us_to_ticks(3 * pdu_us(pdu_len, phy) + 2 * ADV_CHAN_HOP_US)
}

impl<'d, T: Ticker, R: RngCore> LinkLayer<'d, T, R> {
    /// Creates advertising set `handle` with a primary ADV_EXT_IND. Connectable and scannable
    /// sets get their AUX_ADV_IND right away.
    pub fn adv_set_create(&mut self, handle: u8, params: AdvParams) -> Result<(), Error> {
        params.validate()?;
        let slot = self.adv.get_mut(handle as usize).ok_or(Error::InvalidParameter)?;
        if slot.is_some() {
            return Err(Error::CommandDisallowed);
        }

        let props = &params.props;
        let mut header = ExtHeader::default();
        if !props.anonymous_adv() {
            header.set(FieldValue::AdvA(params.adv_addr));
        }
        if props.directed_adv() {
            header.set(FieldValue::TgtA(params.tgt_addr));
        }
        if props.include_tx_power() {
            header.set(FieldValue::TxPower(params.tx_power));
        }
        let pdu = pdu_build(params.mode(), &header, params.adv_addr_random, params.tgt_addr_random)?;
        let mut buf = DoubleBuffer::new();
        buf.init(self.pool, &pdu)?;

        *slot = Some(AdvSet {
            params,
            buf,
            hdr: UllHdr::new(),
            enabled: false,
            adi: Adi::new(params.sid, 0),
            data: AdData::default(),
            aux: None,
            sync: None,
            ticks_slot: primary_slot_ticks(pdu.len(), params.primary_phy),
        });
        if params.needs_aux() {
            if let Err(e) = self.aux_ensure(handle) {
                self.adv_release(handle)?;
                return Err(e);
            }
        }
        info!("[adv] set {} created", handle);
        Ok(())
    }

    /// Removes a disabled set with no periodic train or BIG running, freeing its PDUs.
    pub fn adv_set_remove(&mut self, handle: u8) -> Result<(), Error> {
        let set = self.adv_mut(handle)?;
        let busy = set.enabled
            || !set.hdr.is_idle()
            || set.aux.as_ref().is_some_and(|aux| !aux.hdr.is_idle())
            || set
                .sync
                .as_ref()
                .is_some_and(|sync| sync.enabled || sync.big.is_some() || !sync.hdr.is_idle());
        if busy {
            return Err(Error::CommandDisallowed);
        }
        self.adv_release(handle)?;
        info!("[adv] set {} removed", handle);
        Ok(())
    }

    fn adv_release(&mut self, handle: u8) -> Result<(), Error> {
        let pool = self.pool;
        let Some(mut set) = self.adv.get_mut(handle as usize).and_then(Option::take) else {
            return Err(Error::UnknownAdvIdentifier);
        };
        set.buf.release_all(pool)?;
        if let Some(aux) = set.aux.as_mut() {
            aux.buf.release_all(pool)?;
        }
        if let Some(sync) = set.sync.as_mut() {
            sync.buf.release_all(pool)?;
        }
        Ok(())
    }

    /// Starts or stops advertising on set `handle`.
    ///
    /// Enabling starts the primary ticker, the auxiliary ticker one MAFS after the primary
    /// event, and a periodic train already enabled by the host. Disabling stops the primary and
    /// auxiliary tickers; a running periodic train is left alone.
    pub fn adv_enable(&mut self, handle: u8, enable: bool) -> Result<(), Error> {
        if enable {
            self.adv_start(handle)
        } else {
            self.adv_stop(handle)
        }
    }

    fn adv_start(&mut self, handle: u8) -> Result<(), Error> {
        let set = set_mut(&mut self.adv, handle)?;
        if set.enabled {
            return Ok(());
        }
        if set.hdr.is_disabling() || set.aux.as_ref().is_some_and(|aux| aux.hdr.is_disabling()) {
            return Err(Error::CommandDisallowed);
        }

        let now = self.ticker.ticks_now();
        let ticks_first = us_to_ticks(EVENT_OVERHEAD_START_US);
        let ticks_periodic = duration_to_ticks(set.params.interval);
        self.ticker.start(
            TickerRole::Adv(handle).id(),
            TickerStart {
                ticks_anchor: now,
                ticks_first,
                ticks_periodic,
                lazy: 0,
                ticks_slot: set.ticks_slot,
            },
        )?;

        if set.aux.is_some() {
            let aux_first = ticks_add(ticks_first, ticks_add(set.ticks_slot, us_to_ticks(EVENT_MAFS_US)));
            if let Err(e) = self.aux_start(handle, ticks_add(now, aux_first), ticks_periodic) {
                let _ = self.ticker.stop(TickerRole::Adv(handle).id());
                return Err(e);
            }
        }

        let set = self.adv_mut(handle)?;
        let sync_pending = set.sync.as_ref().is_some_and(|sync| sync.enabled && !sync.started);
        if sync_pending {
            if let Err(e) = self.sync_start(handle) {
                let _ = self.ticker.stop(TickerRole::Adv(handle).id());
                self.aux_stop(handle);
                return Err(e);
            }
        }

        self.adv_mut(handle)?.enabled = true;
        info!("[adv] set {} enabled", handle);
        Ok(())
    }

    fn adv_stop(&mut self, handle: u8) -> Result<(), Error> {
        let set = self.adv_mut(handle)?;
        if !set.enabled {
            return Ok(());
        }
        set.enabled = false;
        let has_aux = set.aux.is_some();
        if let Err(e) = self.ticker.stop(TickerRole::Adv(handle).id()) {
            warn!("[adv] set {} ticker stop failed: {:?}", handle, e);
        }
        self.disable(TickerRole::Adv(handle), Teardown::AdvStop(handle))?;
        if has_aux {
            self.aux_stop(handle);
            self.disable(TickerRole::Aux(handle), Teardown::AuxStop(handle))?;
        }
        info!("[adv] set {} disabled", handle);
        Ok(())
    }

    /// Sets the advertising data of set `handle`, reassembling host fragments.
    ///
    /// The data goes out in the AUX_ADV_IND and, for non-connectable sets, AUX_CHAIN_IND PDUs.
    /// Every publication gets a new ADI, mirrored in the primary PDU.
    pub fn adv_ad_data_set(&mut self, handle: u8, op: DataOp, data: &[u8]) -> Result<(), Error> {
        let set = self.adv_mut(handle)?;
        if set.params.props.scannable_adv() {
            return Err(Error::InvalidParameter);
        }
        if set.enabled && !matches!(op, DataOp::Complete | DataOp::Unchanged) {
            return Err(Error::CommandDisallowed);
        }
        if op == DataOp::Unchanged && set.aux.is_none() {
            return Err(Error::InvalidParameter);
        }
        if !set.data.apply(op, data)? {
            return Ok(());
        }
        self.aux_data_publish(handle)
    }

    pub(crate) fn adv_prepare(&mut self, handle: u8) -> Result<Prepared, Error> {
        let pool = self.pool;
        let set = self.adv_mut(handle)?;
        let (head, _) = set.buf.latest_get(pool)?;
        Ok(Prepared {
            role: TickerRole::Adv(handle),
            head,
            event_counter: 0,
            chan_idx: ADV_CHAN_FIRST,
            ticks_at_expire: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_validation() {
        assert!(AdvParams::default().validate().is_ok());

        let legacy = AdvParams {
            props: AdvEventProps::new().set_legacy_adv(true),
            ..Default::default()
        };
        assert_eq!(legacy.validate(), Err(Error::InvalidParameter));

        let conn_scan = AdvParams {
            props: AdvEventProps::new().set_connectable_adv(true).set_scannable_adv(true),
            ..Default::default()
        };
        assert_eq!(conn_scan.validate(), Err(Error::InvalidParameter));

        let anon_conn = AdvParams {
            props: AdvEventProps::new().set_connectable_adv(true).set_anonymous_adv(true),
            ..Default::default()
        };
        assert_eq!(anon_conn.validate(), Err(Error::InvalidParameter));

        let fast = AdvParams {
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        assert_eq!(fast.validate(), Err(Error::InvalidParameter));

        let sid = AdvParams {
            sid: 16,
            ..Default::default()
        };
        assert_eq!(sid.validate(), Err(Error::InvalidParameter));
    }

    #[test]
    fn mode_follows_properties() {
        let conn = AdvParams {
            props: AdvEventProps::new().set_connectable_adv(true),
            ..Default::default()
        };
        assert_eq!(conn.mode(), AdvMode::Conn);
        assert!(conn.needs_aux());
        assert_eq!(AdvParams::default().mode(), AdvMode::NonConn);
        assert!(!AdvParams::default().needs_aux());
    }
}

//! PDU chains: linking, duplication, teardown and the fragmenting chain writer.
//!
//! A chain is a head PDU followed by AUX_CHAIN_IND PDUs linked through the pool. The head sits in
//! a [`DoubleBuffer`]; an edit either writes a fresh head (the radio still reads the old chain) or
//! rewrites a pending head in place. Every tail node written by an edit is allocated before any
//! published byte changes, so a failed edit leaves the published chain untouched.
use bt_hci::param::PhyKind;
use heapless::Vec;

use crate::config::PDU_POOL_SIZE;
use crate::hdr::{compose, Composed, HdrData, HdrOutcome, PduKind};
use crate::pdu::{Adi, AdvPdu, CteInfo, FieldValue, HdrFields};
use crate::pool::{DoubleBuffer, PduRef, PduStore};
use crate::time::{pdu_us, phy_code, EVENT_MAFS_US};
use crate::Error;

/// Iterator over the PDUs of a chain, head first.
///
/// Stops early on a stale link. Use [`chain_len`] to detect one.
pub struct ChainIter<'a> {
    pool: &'a dyn PduStore,
    next: Option<PduRef>,
    left: usize,
}

impl<'a> ChainIter<'a> {
    pub fn new(pool: &'a dyn PduStore, head: PduRef) -> Self {
        Self {
            pool,
            next: Some(head),
            left: pool.capacity(),
        }
    }
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = PduRef;

    fn next(&mut self) -> Option<PduRef> {
        let current = self.next.take()?;
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        self.next = self.pool.next(current).ok().flatten();
        Some(current)
    }
}

/// Number of PDUs in the chain starting at `head`.
pub fn chain_len(pool: &dyn PduStore, head: PduRef) -> Result<usize, Error> {
    Ok(chain_last_with_len(pool, head)?.1)
}

/// Last PDU of the chain starting at `head`.
pub fn chain_last(pool: &dyn PduStore, head: PduRef) -> Result<PduRef, Error> {
    Ok(chain_last_with_len(pool, head)?.0)
}

fn chain_last_with_len(pool: &dyn PduStore, head: PduRef) -> Result<(PduRef, usize), Error> {
    let mut current = head;
    let mut len = 1;
    while let Some(next) = pool.next(current)? {
        // More links than buffers means a cycle.
        if len >= pool.capacity() {
            return Err(Error::Unspecified);
        }
        current = next;
        len += 1;
    }
    Ok((current, len))
}

/// Returns every PDU of the chain to the pool.
pub fn release_chain(pool: &dyn PduStore, head: PduRef) -> Result<(), Error> {
    let mut current = Some(head);
    let mut left = pool.capacity();
    while let Some(r) = current {
        if left == 0 {
            return Err(Error::Unspecified);
        }
        left -= 1;
        current = pool.next(r)?;
        pool.free(r)?;
    }
    Ok(())
}

/// Releases everything after `head`, leaving it the only PDU of its chain.
pub fn release_tail(pool: &dyn PduStore, head: PduRef) -> Result<(), Error> {
    if let Some(tail) = pool.next(head)? {
        pool.set_next(head, None)?;
        release_chain(pool, tail)?;
    }
    Ok(())
}

/// Copies the chain starting at `head` into newly allocated PDUs.
///
/// All or nothing: with fewer free buffers than chain links this fails with
/// [`Error::MemoryCapacityExceeded`] and nothing is allocated.
pub fn duplicate_chain(pool: &dyn PduStore, head: PduRef) -> Result<PduRef, Error> {
    let len = chain_len(pool, head)?;
    if pool.available() < len {
        warn!("[chain][dup] {} PDUs needed, {} free", len, pool.available());
        return Err(Error::MemoryCapacityExceeded);
    }

    let mut new_head = None;
    match duplicate_into(pool, head, &mut new_head) {
        Ok(()) => new_head.ok_or(Error::Unspecified),
        Err(e) => {
            if let Some(h) = new_head {
                let _ = release_chain(pool, h);
            }
            Err(e)
        }
    }
}

fn duplicate_into(pool: &dyn PduStore, head: PduRef, new_head: &mut Option<PduRef>) -> Result<(), Error> {
    let mut tail: Option<PduRef> = None;
    for src in ChainIter::new(pool, head) {
        let dst = pool.alloc().ok_or(Error::MemoryCapacityExceeded)?;
        match tail {
            Some(t) => {
                if let Err(e) = pool.set_next(t, Some(dst)) {
                    let _ = pool.free(dst);
                    return Err(e);
                }
            }
            None => *new_head = Some(dst),
        }
        tail = Some(dst);
        pool.store(dst, &pool.load(src)?)?;
    }
    Ok(())
}

/// An edit of the chain held in a [`DoubleBuffer`].
///
/// Obtained with [`ChainEdit::begin`] and finished with exactly one of [`ChainEdit::commit`] or
/// [`ChainEdit::abort`].
#[must_use]
#[derive(Debug)]
pub struct ChainEdit {
    head: PduRef,
    prev: PduRef,
    idx: u8,
}

impl ChainEdit {
    pub fn begin(buf: &mut DoubleBuffer, pool: &dyn PduStore) -> Result<Self, Error> {
        let prev = buf.peek().ok_or(Error::Unspecified)?;
        let (head, idx) = buf.alloc(pool)?;
        let edit = Self { head, prev, idx };
        if !edit.is_in_place() {
            // leftovers of an aborted edit
            release_tail(pool, head)?;
        }
        Ok(edit)
    }

    /// The PDU being written.
    pub fn head(&self) -> PduRef {
        self.head
    }

    /// The most recently published head, the edit's starting point.
    pub fn prev(&self) -> PduRef {
        self.prev
    }

    /// True when the edit rewrites a publication the radio has not picked up yet.
    pub fn is_in_place(&self) -> bool {
        self.head == self.prev
    }

    /// Gives a fresh head the unchanged tail of the previous chain.
    pub fn keep_tail(&self, pool: &dyn PduStore) -> Result<(), Error> {
        if self.is_in_place() {
            return Ok(());
        }
        if let Some(tail) = pool.next(self.prev)? {
            let dup = duplicate_chain(pool, tail)?;
            pool.set_next(self.head, Some(dup))?;
        }
        Ok(())
    }

    pub fn commit(self, buf: &mut DoubleBuffer) {
        buf.enqueue(self.idx);
    }

    /// Gives up the edit. A retracted in place publication is published again as it stands.
    pub fn abort(self, buf: &mut DoubleBuffer, pool: &dyn PduStore) {
        if self.is_in_place() {
            buf.enqueue(self.idx);
        } else {
            let _ = release_tail(pool, self.head);
        }
    }
}

/// Runs `f` inside a chain edit, committing on success.
pub fn with_edit<T>(
    buf: &mut DoubleBuffer,
    pool: &dyn PduStore,
    f: impl FnOnce(&ChainEdit) -> Result<T, Error>,
) -> Result<T, Error> {
    let edit = ChainEdit::begin(buf, pool)?;
    match f(&edit) {
        Ok(value) => {
            edit.commit(buf);
            Ok(value)
        }
        Err(e) => {
            edit.abort(buf, pool);
            Err(e)
        }
    }
}

/// Edits the head PDU only, carrying over the tail of the chain.
///
/// When the head points into a chain, its AuxPtr offset follows the new head length.
pub fn edit_head(
    pool: &dyn PduStore,
    buf: &mut DoubleBuffer,
    kind: PduKind,
    add: HdrFields,
    rem: HdrFields,
    data: &HdrData<'_>,
    phy: PhyKind,
) -> Result<HdrOutcome, Error> {
    with_edit(buf, pool, |edit| {
        let prev = pool.load(edit.prev())?;
        let mut head = compose(kind, &prev, add, rem, data)?;
        if kind != PduKind::ExtInd && pool.next(edit.prev())?.is_some() {
            point_to_next(&mut head, phy);
        }
        let mut pdu = AdvPdu::new();
        let outcome = head.write(&prev, &mut pdu)?;
        edit.keep_tail(pool)?;
        pool.store(edit.head(), &pdu)?;
        Ok(outcome)
    })
}

/// Fields repeated on the PDUs of a chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainFields {
    pub adi: Option<Adi>,
    /// CTEInfo carried by the first `cte_count` PDUs. Empty PDUs pad the chain to that length.
    pub cte: Option<CteInfo>,
    pub cte_count: u8,
    pub phy: PhyKind,
    /// Whether the data may spill into AUX_CHAIN_IND PDUs.
    pub chainable: bool,
}

impl ChainFields {
    pub fn new(phy: PhyKind) -> Self {
        Self {
            adi: None,
            cte: None,
            cte_count: 0,
            phy,
            chainable: true,
        }
    }

    fn cte_pdus(&self) -> usize {
        if self.cte.is_some() {
            self.cte_count as usize
        } else {
            0
        }
    }
}

/// Maximum number of tail PDUs written by one edit.
const CHAIN_TAIL_MAX: usize = PDU_POOL_SIZE;

#[derive(Debug, Clone, Copy)]
struct TailPdu {
    ad_len: usize,
    cte: bool,
    more: bool,
}

/// Rewrites a whole chain: the head with `add`/`rem` applied, advertising data `ad` split over the
/// head and as many AUX_CHAIN_IND PDUs as needed, ADI and CTEInfo per `fields`.
///
/// Fails with [`Error::PacketTooLong`] when the data does not fit and the chain may not grow, and
/// with [`Error::MemoryCapacityExceeded`] when the pool cannot hold the new tail.
#[allow(clippy::too_many_arguments)]
pub fn write_chain(
    pool: &dyn PduStore,
    buf: &mut DoubleBuffer,
    kind: PduKind,
    add: HdrFields,
    rem: HdrFields,
    data: &HdrData<'_>,
    ad: &[u8],
    fields: &ChainFields,
) -> Result<HdrOutcome, Error> {
    with_edit(buf, pool, |edit| {
        let prev = pool.load(edit.prev())?;
        let mut add = add | HdrFields::AD_DATA;
        let mut rem = rem.difference(HdrFields::AD_DATA);
        let mut data = data.ad_data(ad);
        toggle(&mut add, &mut rem, &mut data, HdrFields::ADI, fields.adi.map(FieldValue::Adi));
        let cte = fields.cte.filter(|_| fields.cte_pdus() > 0);
        toggle(&mut add, &mut rem, &mut data, HdrFields::CTE_INFO, cte.map(FieldValue::CteInfo));

        let single = compose(
            kind,
            &prev,
            add.difference(HdrFields::AUX_PTR),
            rem | HdrFields::AUX_PTR,
            &data,
        )?;
        let fits = single.check().is_ok() && fields.cte_pdus() <= 1;
        let mut head = if fits {
            single
        } else {
            if !fields.chainable {
                return Err(Error::PacketTooLong);
            }
            let mut head = compose(
                kind,
                &prev,
                add | HdrFields::AUX_PTR,
                rem.difference(HdrFields::AUX_PTR),
                &data.ad_data(&[]),
            )?;
            head.set_ad(&ad[..ad.len().min(head.ad_room())]);
            head
        };
        head.check()?;

        let plan = plan_tail(ad.len() - head.ad().len(), fields)?;
        if pool.available() < plan.len() {
            warn!("[chain][write] {} PDUs needed, {} free", plan.len(), pool.available());
            return Err(Error::MemoryCapacityExceeded);
        }
        let tail = write_tail(pool, &prev, &plan, &ad[head.ad().len()..], fields)?;

        if tail.is_some() {
            point_to_next(&mut head, fields.phy);
        }
        let mut pdu = AdvPdu::new();
        let outcome = head.write(&prev, &mut pdu).and_then(|outcome| {
            release_tail(pool, edit.head())?;
            pool.store(edit.head(), &pdu)?;
            pool.set_next(edit.head(), tail)?;
            Ok(outcome)
        });
        if outcome.is_err() {
            if let Some(t) = tail {
                let _ = release_chain(pool, t);
            }
        }
        outcome
    })
}

fn toggle<'a>(
    add: &mut HdrFields,
    rem: &mut HdrFields,
    data: &mut HdrData<'a>,
    flag: HdrFields,
    value: Option<FieldValue>,
) {
    match value {
        Some(value) => {
            *add |= flag;
            *rem = rem.difference(flag);
            *data = data.with(value);
        }
        None => {
            *add = add.difference(flag);
            *rem |= flag;
        }
    }
}

fn tail_compose<'a>(
    empty: &'a AdvPdu,
    fields: &ChainFields,
    cte: bool,
    more: bool,
    ad: &'a [u8],
) -> Result<Composed<'a>, Error> {
    let mut add = HdrFields::AD_DATA;
    let mut data = HdrData::new().ad_data(ad);
    if let Some(adi) = fields.adi {
        add |= HdrFields::ADI;
        data = data.with(FieldValue::Adi(adi));
    }
    if let (true, Some(info)) = (cte, fields.cte) {
        add |= HdrFields::CTE_INFO;
        data = data.with(FieldValue::CteInfo(info));
    }
    if more {
        add |= HdrFields::AUX_PTR;
    }
    compose(PduKind::AuxChainInd, empty, add, HdrFields::empty(), &data)
}

fn plan_tail(mut remaining: usize, fields: &ChainFields) -> Result<Vec<TailPdu, CHAIN_TAIL_MAX>, Error> {
    let empty = AdvPdu::new();
    let cte_pdus = fields.cte_pdus();
    let mut plan = Vec::new();
    let mut pos = 1;
    while remaining > 0 || pos < cte_pdus {
        let cte = pos < cte_pdus;
        let room_last = tail_compose(&empty, fields, cte, false, &[])?.ad_room();
        let more = remaining > room_last || pos + 1 < cte_pdus;
        let room = if more {
            tail_compose(&empty, fields, cte, true, &[])?.ad_room()
        } else {
            room_last
        };
        let ad_len = remaining.min(room);
        plan.push(TailPdu { ad_len, cte, more })
            .map_err(|_| Error::MemoryCapacityExceeded)?;
        remaining -= ad_len;
        pos += 1;
    }
    Ok(plan)
}

fn write_tail(
    pool: &dyn PduStore,
    prev: &AdvPdu,
    plan: &[TailPdu],
    ad: &[u8],
    fields: &ChainFields,
) -> Result<Option<PduRef>, Error> {
    let mut nodes: Vec<PduRef, CHAIN_TAIL_MAX> = Vec::new();
    for _ in plan {
        match pool.alloc() {
            Some(r) => {
                // Capacity matches the plan's.
                let _ = nodes.push(r);
            }
            None => {
                for r in nodes {
                    let _ = pool.free(r);
                }
                return Err(Error::MemoryCapacityExceeded);
            }
        }
    }

    let result = fill_tail(pool, prev, plan, ad, fields, &nodes);
    if result.is_err() {
        for r in nodes.iter() {
            let _ = pool.free(*r);
        }
    }
    result.map(|()| nodes.first().copied())
}

fn fill_tail(
    pool: &dyn PduStore,
    prev: &AdvPdu,
    plan: &[TailPdu],
    ad: &[u8],
    fields: &ChainFields,
    nodes: &[PduRef],
) -> Result<(), Error> {
    let empty = AdvPdu::new();
    let mut offset = 0;
    for (i, (node, r)) in plan.iter().zip(nodes.iter()).enumerate() {
        let mut composed = tail_compose(&empty, fields, node.cte, node.more, &ad[offset..offset + node.ad_len])?;
        offset += node.ad_len;
        if node.more {
            point_to_next(&mut composed, fields.phy);
        }
        let mut pdu = AdvPdu::new();
        composed.write(prev, &mut pdu)?;
        pool.store(*r, &pdu)?;
        pool.set_next(*r, nodes.get(i + 1).copied())?;
    }
    Ok(())
}

/// Fills the AuxPtr of a chain PDU to point at the PDU that follows it.
fn point_to_next(composed: &mut Composed<'_>, phy: PhyKind) {
    let mut ptr = composed.header.aux_ptr().unwrap_or_default();
    ptr.phy = phy_code(phy);
    ptr.set_offset_us(pdu_us(composed.len(), phy) + EVENT_MAFS_US);
    composed.header.set(FieldValue::AuxPtr(ptr));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PduPool;

    fn published(pool: &dyn PduStore, buf: &mut DoubleBuffer) -> PduRef {
        buf.latest_get(pool).unwrap().0.unwrap()
    }

    fn chain_pdus(pool: &dyn PduStore, head: PduRef) -> std::vec::Vec<AdvPdu> {
        ChainIter::new(pool, head).map(|r| pool.load(r).unwrap()).collect()
    }

    fn sync_buffer(pool: &dyn PduStore) -> DoubleBuffer {
        let mut buf = DoubleBuffer::new();
        let mut pdu = AdvPdu::new();
        pdu.set_len(1).unwrap();
        buf.init(pool, &pdu).unwrap();
        buf
    }

    fn filled(byte: u8, len: usize) -> AdvPdu {
        let mut pdu = AdvPdu::new();
        pdu.buf_mut()[..len].fill(byte);
        pdu.set_len(len).unwrap();
        pdu
    }

    #[test]
    fn duplicate_is_all_or_nothing() {
        let pool = PduPool::<5>::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        pool.store(a, &filled(0xA1, 10)).unwrap();
        pool.store(b, &filled(0xB2, 20)).unwrap();
        pool.store(c, &filled(0xC3, 30)).unwrap();
        pool.set_next(a, Some(b)).unwrap();
        pool.set_next(b, Some(c)).unwrap();

        // Two free, three needed
        assert_eq!(duplicate_chain(&pool, a), Err(Error::MemoryCapacityExceeded));
        assert_eq!(pool.available(), 2);
        assert_eq!(chain_pdus(&pool, a).len(), 3);

        let dup = duplicate_chain(&pool, b).unwrap();
        assert_eq!(pool.available(), 0);
        assert_eq!(chain_pdus(&pool, dup), chain_pdus(&pool, b));
        assert_eq!(chain_pdus(&pool, dup)[1], filled(0xC3, 30));
        let source: std::vec::Vec<PduRef> = ChainIter::new(&pool, b).collect();
        for r in ChainIter::new(&pool, dup) {
            assert!(!source.contains(&r));
        }

        release_chain(&pool, dup).unwrap();
        assert_eq!(pool.available(), 2);
        assert_eq!(chain_pdus(&pool, a)[1..], [filled(0xB2, 20), filled(0xC3, 30)]);
    }

    #[test]
    fn cycles_are_detected() {
        let pool = PduPool::<3>::new();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.set_next(a, Some(b)).unwrap();
        pool.set_next(b, Some(a)).unwrap();
        assert_eq!(chain_len(&pool, a), Err(Error::Unspecified));
    }

    #[test]
    fn short_data_stays_in_one_pdu() {
        let pool = PduPool::<8>::new();
        let mut buf = sync_buffer(&pool);
        let mut fields = ChainFields::new(PhyKind::Le1M);
        fields.adi = Some(Adi::new(1, 0x10));

        let out = write_chain(
            &pool,
            &mut buf,
            PduKind::AuxSyncInd,
            HdrFields::empty(),
            HdrFields::empty(),
            &HdrData::new(),
            b"HELLO",
            &fields,
        )
        .unwrap();
        assert_eq!(out.fields, HdrFields::ADI | HdrFields::AD_DATA);

        let head = published(&pool, &mut buf);
        let pdus = chain_pdus(&pool, head);
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].ad_data().unwrap(), b"HELLO");
        assert_eq!(pool.available(), 7);
    }

    #[test]
    fn long_data_is_fragmented() {
        let pool = PduPool::<8>::new();
        let mut buf = sync_buffer(&pool);
        let mut fields = ChainFields::new(PhyKind::Le2M);
        fields.adi = Some(Adi::new(1, 0x10));
        let ad: std::vec::Vec<u8> = (0..600u32).map(|i| i as u8).collect();

        write_chain(
            &pool,
            &mut buf,
            PduKind::AuxSyncInd,
            HdrFields::empty(),
            HdrFields::empty(),
            &HdrData::new(),
            &ad,
            &fields,
        )
        .unwrap();

        let pdus = chain_pdus(&pool, published(&pool, &mut buf));
        assert_eq!(pdus.len(), 3);
        let mut joined = std::vec::Vec::new();
        for (i, pdu) in pdus.iter().enumerate() {
            let hdr = pdu.ext_header().unwrap();
            assert_eq!(hdr.adi(), Some(Adi::new(1, 0x10)));
            let ptr = hdr.aux_ptr();
            if i + 1 < pdus.len() {
                let ptr = ptr.unwrap();
                assert_eq!(ptr.phy, 1);
                assert_eq!(ptr.offset_us() / 30, (pdu_us(pdu.len(), PhyKind::Le2M) + EVENT_MAFS_US) / 30);
                assert_eq!(pdu.len(), 255);
            } else {
                assert!(ptr.is_none());
            }
            joined.extend_from_slice(pdu.ad_data().unwrap());
        }
        assert_eq!(joined, ad);
    }

    #[test]
    fn cte_count_pads_the_chain() {
        let pool = PduPool::<8>::new();
        let mut buf = sync_buffer(&pool);
        let mut fields = ChainFields::new(PhyKind::Le1M);
        fields.cte = Some(CteInfo { time: 20, ty: 0 });
        fields.cte_count = 3;

        write_chain(
            &pool,
            &mut buf,
            PduKind::AuxSyncInd,
            HdrFields::empty(),
            HdrFields::empty(),
            &HdrData::new(),
            b"x",
            &fields,
        )
        .unwrap();

        let pdus = chain_pdus(&pool, published(&pool, &mut buf));
        assert_eq!(pdus.len(), 3);
        for pdu in &pdus {
            assert_eq!(pdu.ext_header().unwrap().cte_info(), Some(CteInfo { time: 20, ty: 0 }));
        }
        assert_eq!(pdus[0].ad_data().unwrap(), b"x");
        assert!(pdus[2].ad_data().unwrap().is_empty());
    }

    #[test]
    fn failed_edit_leaves_published_chain() {
        let pool = PduPool::<4>::new();
        let mut buf = sync_buffer(&pool);
        let fields = ChainFields::new(PhyKind::Le1M);
        let ad = [0x42u8; 400];
        write_chain(&pool, &mut buf, PduKind::AuxSyncInd, HdrFields::empty(), HdrFields::empty(), &HdrData::new(), &ad, &fields).unwrap();
        let head = published(&pool, &mut buf);
        let before = chain_pdus(&pool, head);
        assert_eq!(before.len(), 2);

        // A fresh head plus three more tail PDUs do not fit the pool.
        let big = [0x24u8; 900];
        assert_eq!(
            write_chain(&pool, &mut buf, PduKind::AuxSyncInd, HdrFields::empty(), HdrFields::empty(), &HdrData::new(), &big, &fields),
            Err(Error::MemoryCapacityExceeded)
        );
        assert!(!buf.is_pending());
        assert_eq!(chain_pdus(&pool, buf.current().unwrap()), before);

        let mut fields = fields;
        fields.chainable = false;
        assert_eq!(
            write_chain(&pool, &mut buf, PduKind::AuxSyncInd, HdrFields::empty(), HdrFields::empty(), &HdrData::new(), &ad, &fields),
            Err(Error::PacketTooLong)
        );
    }

    #[test]
    fn head_edit_duplicates_tail_only_for_fresh_head() {
        let pool = PduPool::<8>::new();
        let mut buf = sync_buffer(&pool);
        let fields = ChainFields::new(PhyKind::Le1M);
        let ad = [7u8; 300];
        let data = HdrData::new().with(FieldValue::TxPower(-3));
        write_chain(&pool, &mut buf, PduKind::AuxSyncInd, HdrFields::TX_POWER, HdrFields::empty(), &data, &ad, &fields).unwrap();
        published(&pool, &mut buf);
        assert_eq!(pool.available(), 6);

        // Fresh head: the tail is duplicated, the radio keeps its own copy.
        let data = HdrData::new().with(FieldValue::TxPower(4));
        edit_head(&pool, &mut buf, PduKind::AuxSyncInd, HdrFields::TX_POWER, HdrFields::empty(), &data, PhyKind::Le1M).unwrap();
        assert_eq!(pool.available(), 4);
        let pending = buf.peek().unwrap();
        assert_eq!(chain_len(&pool, pending).unwrap(), 2);
        assert_ne!(pool.next(pending).unwrap(), pool.next(buf.current().unwrap()).unwrap());

        // In place: nothing new is allocated.
        edit_head(&pool, &mut buf, PduKind::AuxSyncInd, HdrFields::empty(), HdrFields::TX_POWER, &HdrData::new(), PhyKind::Le1M).unwrap();
        assert_eq!(pool.available(), 4);
        assert_eq!(buf.peek(), Some(pending));

        let head = published(&pool, &mut buf);
        assert_eq!(pool.available(), 6);
        let pdus = chain_pdus(&pool, head);
        assert_eq!(pdus[0].ext_header().unwrap().tx_power(), None);
        assert!(pdus[0].ext_header().unwrap().aux_ptr().is_some());
        let joined: std::vec::Vec<u8> = pdus.iter().flat_map(|p| p.ad_data().unwrap().to_vec()).collect();
        assert_eq!(joined, ad);
    }
}

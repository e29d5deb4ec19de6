//! Advertising PDU pool and double buffers.
//!
//! The pool is an arena of PDU buffers addressed by generation checked [`PduRef`] handles, so a
//! handle kept past its release is detected instead of aliasing a reused buffer. Each slot also
//! holds the out-of-band link to the next PDU of a chain.
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::pdu::AdvPdu;
use crate::Error;

/// Handle to an allocated PDU buffer.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduRef {
    idx: u8,
    gen: u8,
}

impl PduRef {
    pub fn index(&self) -> usize {
        self.idx as usize
    }
}

/// Storage of advertising PDUs.
///
/// Allocation and release are only called from the upper link layer context. Reads by the radio
/// context go through [`DoubleBuffer`] publication.
pub trait PduStore {
    fn alloc(&self) -> Option<PduRef>;
    fn free(&self, r: PduRef) -> Result<(), Error>;
    fn available(&self) -> usize;
    fn capacity(&self) -> usize;
    /// Copy of the PDU behind `r`.
    fn load(&self, r: PduRef) -> Result<AdvPdu, Error>;
    fn store(&self, r: PduRef, pdu: &AdvPdu) -> Result<(), Error>;
    fn next(&self, r: PduRef) -> Result<Option<PduRef>, Error>;
    fn set_next(&self, r: PduRef, next: Option<PduRef>) -> Result<(), Error>;
}

struct Slot {
    pdu: AdvPdu,
    next: Option<PduRef>,
    gen: u8,
    free: bool,
}

impl Slot {
    const NEW: Slot = Slot::new();

    const fn new() -> Self {
        Self {
            pdu: AdvPdu::new(),
            next: None,
            gen: 0,
            free: true,
        }
    }
}

struct State<const N: usize> {
    slots: [Slot; N],
}

impl<const N: usize> State<N> {
    const fn new() -> Self {
        Self { slots: [Slot::NEW; N] }
    }

    fn alloc(&mut self) -> Option<PduRef> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.free {
                slot.free = false;
                slot.next = None;
                slot.pdu = AdvPdu::new();
                return Some(PduRef {
                    idx: idx as u8,
                    gen: slot.gen,
                });
            }
        }
        None
    }

    fn slot(&mut self, r: PduRef) -> Result<&mut Slot, Error> {
        match self.slots.get_mut(r.index()) {
            Some(slot) if !slot.free && slot.gen == r.gen => Ok(slot),
            _ => {
                warn!("[pool] stale handle {}/{}", r.idx, r.gen);
                Err(Error::Unspecified)
            }
        }
    }

    fn free(&mut self, r: PduRef) -> Result<(), Error> {
        let slot = self.slot(r)?;
        slot.free = true;
        slot.next = None;
        slot.gen = slot.gen.wrapping_add(1);
        Ok(())
    }

    fn available(&self) -> usize {
        self.slots.iter().filter(|s| s.free).count()
    }
}

/// A fixed pool of `N` advertising PDU buffers.
pub struct PduPool<const N: usize> {
    state: Mutex<NoopRawMutex, RefCell<State<N>>>,
}

impl<const N: usize> Default for PduPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PduPool<N> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State::new())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State<N>) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }
}

impl<const N: usize> PduStore for PduPool<N> {
    fn alloc(&self) -> Option<PduRef> {
        self.with(|s| s.alloc())
    }

    fn free(&self, r: PduRef) -> Result<(), Error> {
        self.with(|s| s.free(r))
    }

    fn available(&self) -> usize {
        self.with(|s| s.available())
    }

    fn capacity(&self) -> usize {
        N
    }

    fn load(&self, r: PduRef) -> Result<AdvPdu, Error> {
        self.with(|s| s.slot(r).map(|slot| slot.pdu.clone()))
    }

    fn store(&self, r: PduRef, pdu: &AdvPdu) -> Result<(), Error> {
        self.with(|s| {
            s.slot(r)?.pdu.clone_from(pdu);
            Ok(())
        })
    }

    fn next(&self, r: PduRef) -> Result<Option<PduRef>, Error> {
        self.with(|s| s.slot(r).map(|slot| slot.next))
    }

    fn set_next(&self, r: PduRef, next: Option<PduRef>) -> Result<(), Error> {
        self.with(|s| {
            s.slot(r)?.next = next;
            Ok(())
        })
    }
}

const DOUBLE_BUFFER_SIZE: u8 = 2;

/// Double buffered PDU chain head shared between the upper link layer (producer) and the radio
/// (consumer).
///
/// `first` indexes the buffer the radio transmits, `last` the most recently published one. The
/// two differ while a publication has not been picked up yet.
#[derive(Debug, Default)]
pub struct DoubleBuffer {
    first: u8,
    last: u8,
    pdu: [Option<PduRef>; DOUBLE_BUFFER_SIZE as usize],
}

impl DoubleBuffer {
    pub const fn new() -> Self {
        Self {
            first: 0,
            last: 0,
            pdu: [None, None],
        }
    }

    /// Allocates the initial buffer, visible to the radio right away.
    pub fn init(&mut self, pool: &dyn PduStore, pdu: &AdvPdu) -> Result<PduRef, Error> {
        let r = pool.alloc().ok_or(Error::MemoryCapacityExceeded)?;
        pool.store(r, pdu)?;
        self.first = 0;
        self.last = 0;
        self.pdu = [Some(r), None];
        Ok(r)
    }

    /// The chain head the radio currently transmits.
    pub fn current(&self) -> Option<PduRef> {
        self.pdu[self.first as usize]
    }

    /// The most recently published chain head.
    pub fn peek(&self) -> Option<PduRef> {
        self.pdu[self.last as usize]
    }

    /// True while a publication waits for the radio.
    pub fn is_pending(&self) -> bool {
        self.first != self.last
    }

    /// Returns a buffer to write the next publication into, with the index to pass to
    /// [`DoubleBuffer::enqueue`].
    ///
    /// With nothing pending this is the buffer the radio does not use, allocated if needed. With a
    /// publication pending, the publication is retracted and its buffer handed back: the result
    /// then equals [`DoubleBuffer::peek`] and the edit happens in place.
    pub fn alloc(&mut self, pool: &dyn PduStore) -> Result<(PduRef, u8), Error> {
        let idx = if self.first == self.last {
            (self.last + 1) % DOUBLE_BUFFER_SIZE
        } else {
            let idx = self.last;
            self.last = self.first;
            idx
        };
        if let Some(r) = self.pdu[idx as usize] {
            return Ok((r, idx));
        }
        let r = pool.alloc().ok_or(Error::MemoryCapacityExceeded)?;
        self.pdu[idx as usize] = Some(r);
        Ok((r, idx))
    }

    /// Publishes the buffer at `idx`.
    pub fn enqueue(&mut self, idx: u8) {
        self.last = idx;
    }

    /// Consumer side: switches to the latest publication and releases the chain it supersedes.
    /// Returns the head to transmit and whether it changed.
    pub fn latest_get(&mut self, pool: &dyn PduStore) -> Result<(Option<PduRef>, bool), Error> {
        if self.first == self.last {
            return Ok((self.current(), false));
        }
        let old = self.first;
        self.first = self.last;
        if let Some(r) = self.pdu[old as usize].take() {
            crate::chain::release_chain(pool, r)?;
        }
        Ok((self.current(), true))
    }

    /// Releases both buffers and their chains.
    pub fn release_all(&mut self, pool: &dyn PduStore) -> Result<(), Error> {
        for slot in self.pdu.iter_mut() {
            if let Some(r) = slot.take() {
                crate::chain::release_chain(pool, r)?;
            }
        }
        self.first = 0;
        self.last = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use static_cell::StaticCell;

    use super::*;

    #[test]
    fn alloc_until_exhausted() {
        static POOL: StaticCell<PduPool<4>> = StaticCell::new();
        let pool = POOL.init(PduPool::new());

        let a = [pool.alloc(), pool.alloc(), pool.alloc(), pool.alloc()];
        assert!(a.iter().all(|r| r.is_some()));
        assert!(pool.alloc().is_none());
        assert_eq!(pool.available(), 0);

        pool.free(a[1].unwrap()).unwrap();
        assert_eq!(pool.available(), 1);
        let b = pool.alloc().unwrap();
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let pool = PduPool::<2>::new();
        let r = pool.alloc().unwrap();
        pool.free(r).unwrap();
        let again = pool.alloc().unwrap();
        assert_eq!(again.index(), r.index());
        assert_ne!(again, r);
        assert_eq!(pool.free(r), Err(Error::Unspecified));
        assert!(pool.load(r).is_err());
        assert!(pool.load(again).is_ok());
    }

    #[test]
    fn double_buffer_publish_is_atomic() {
        let pool = PduPool::<4>::new();
        let mut buf = DoubleBuffer::new();
        let mut old = AdvPdu::new();
        old.buf_mut()[1] = 0xAA;
        old.set_len(2).unwrap();
        let first = buf.init(&pool, &old).unwrap();

        let (next, idx) = buf.alloc(&pool).unwrap();
        assert_ne!(next, first);
        let mut new = AdvPdu::new();
        new.buf_mut()[1] = 0xBB;
        new.set_len(2).unwrap();
        pool.store(next, &new).unwrap();

        // Not published yet, the radio still sees the old contents.
        assert_eq!(buf.current(), Some(first));
        assert_eq!(pool.load(buf.current().unwrap()).unwrap(), old);

        buf.enqueue(idx);
        assert!(buf.is_pending());
        assert_eq!(buf.current(), Some(first));
        assert_eq!(buf.peek(), Some(next));

        // A second edit before the radio picked up the first one reuses the pending buffer.
        let (again, idx) = buf.alloc(&pool).unwrap();
        assert_eq!(again, next);
        buf.enqueue(idx);

        let (head, changed) = buf.latest_get(&pool).unwrap();
        assert!(changed);
        assert_eq!(head, Some(next));
        assert_eq!(pool.load(next).unwrap(), new);
        assert!(pool.load(first).is_err());
        assert_eq!(pool.available(), 3);

        let (_, changed) = buf.latest_get(&pool).unwrap();
        assert!(!changed);
    }
}

//! Deferred calls between execution contexts.
//!
//! The radio (LLL) context and the two upper link layer contexts never call into each other
//! directly: work is queued as a [`Work`] item at the priority of the context that runs it, and
//! drained by that context. Queues are fixed size, a full queue rejects the work.
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

use crate::config::MAYFLY_QUEUE_SIZE;
use crate::link::ull::Teardown;
use crate::ticker::TickerRole;
use crate::Error;

/// Execution contexts, highest first.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Radio event preparation.
    Lll,
    /// Upper link layer work triggered by radio events.
    UllHigh,
    /// Upper link layer work triggered by the ticker.
    UllLow,
}

/// A deferred call.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
    /// Prepare the radio event of `role`.
    Prepare {
        role: TickerRole,
        ticks_at_expire: u32,
        lazy: u16,
    },
    /// Fill the primary PDU's AuxPtr with the offset to the auxiliary event.
    AuxOffsetGet { handle: u8, ticks_at_expire: u32 },
    /// Fill SyncInfo with the offset to the periodic event.
    SyncOffsetGet { handle: u8, ticks_at_expire: u32 },
    /// Fill BIGInfo with the offset to the BIG event.
    BigOffsetGet { handle: u8, ticks_at_expire: u32 },
    /// The periodic channel map update instant was reached.
    SyncChmComplete { handle: u8 },
    /// The BIG channel map update instant was reached.
    IsoChmComplete { handle: u8 },
    /// The last in-flight event of a disabled role completed.
    Disabled { teardown: Teardown },
}

pub struct Mayfly {
    lll: Channel<NoopRawMutex, Work, MAYFLY_QUEUE_SIZE>,
    ull_high: Channel<NoopRawMutex, Work, MAYFLY_QUEUE_SIZE>,
    ull_low: Channel<NoopRawMutex, Work, MAYFLY_QUEUE_SIZE>,
}

impl Default for Mayfly {
    fn default() -> Self {
        Self::new()
    }
}

impl Mayfly {
    pub const fn new() -> Self {
        Self {
            lll: Channel::new(),
            ull_high: Channel::new(),
            ull_low: Channel::new(),
        }
    }

    fn queue(&self, prio: Priority) -> &Channel<NoopRawMutex, Work, MAYFLY_QUEUE_SIZE> {
        match prio {
            Priority::Lll => &self.lll,
            Priority::UllHigh => &self.ull_high,
            Priority::UllLow => &self.ull_low,
        }
    }

    pub fn enqueue(&self, prio: Priority, work: Work) -> Result<(), Error> {
        self.queue(prio).try_send(work).map_err(|_| {
            warn!("[mayfly] {:?} queue full", prio);
            Error::MemoryCapacityExceeded
        })
    }

    pub fn dequeue(&self, prio: Priority) -> Option<Work> {
        self.queue(prio).try_receive().ok()
    }
}

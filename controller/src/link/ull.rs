//! Reference counting of in-flight radio events.
//!
//! Every prepared radio event holds a reference on its role until the radio reports it done.
//! Stopping a role stops its ticker right away, but releasing what the radio may still read waits
//! until the last reference is dropped.

/// Deferred work of a stopped role, run once no radio event of the role is in flight.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    AdvStop(u8),
    AuxStop(u8),
    SyncStop(u8),
    /// Release the BIG in this slot.
    BigTerminate(u8),
}

#[derive(Debug, Default)]
pub struct UllHdr {
    refs: u8,
    disabling: Option<Teardown>,
}

impl UllHdr {
    pub const fn new() -> Self {
        Self {
            refs: 0,
            disabling: None,
        }
    }

    /// Radio events in flight.
    pub fn refs(&self) -> u8 {
        self.refs
    }

    pub fn ref_inc(&mut self) -> u8 {
        self.refs = self.refs.saturating_add(1);
        self.refs
    }

    /// Drops a reference. Returns the pending teardown when it was the last one.
    pub fn ref_dec(&mut self) -> Option<Teardown> {
        self.refs = self.refs.saturating_sub(1);
        if self.refs == 0 {
            self.disabling.take()
        } else {
            None
        }
    }

    /// Requests `teardown`. It is handed back to run now when nothing is in flight, otherwise
    /// it is kept until [`UllHdr::ref_dec`] drops the last reference.
    pub fn disable(&mut self, teardown: Teardown) -> Option<Teardown> {
        if self.refs == 0 {
            Some(teardown)
        } else {
            self.disabling = Some(teardown);
            None
        }
    }

    pub fn is_disabling(&self) -> bool {
        self.disabling.is_some()
    }

    /// True when neither events nor a teardown are pending.
    pub fn is_idle(&self) -> bool {
        self.refs == 0 && self.disabling.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_waits_for_last_reference() {
        let mut hdr = UllHdr::new();
        assert_eq!(hdr.disable(Teardown::SyncStop(0)), Some(Teardown::SyncStop(0)));

        hdr.ref_inc();
        hdr.ref_inc();
        assert_eq!(hdr.disable(Teardown::BigTerminate(1)), None);
        assert!(hdr.is_disabling());
        assert_eq!(hdr.ref_dec(), None);
        assert_eq!(hdr.ref_dec(), Some(Teardown::BigTerminate(1)));
        assert!(hdr.is_idle());
        assert_eq!(hdr.ref_dec(), None);
    }
}

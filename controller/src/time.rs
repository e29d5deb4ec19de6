//! Ticker time base and radio event timing.
//!
//! The ticker runs off a 32768 Hz sleep clock with a 24-bit counter, all tick arithmetic wraps
//! within [`TICKER_CNTR_MASK`].

use bt_hci::param::PhyKind;
use embassy_time::Duration;

/// Ticker counter mask.
pub const TICKER_CNTR_MASK: u32 = 0x00FF_FFFF;

/// Most significant bit of the ticker counter, set in a difference when it went "negative".
pub const TICKER_CNTR_MSBIT: u32 = 23;

const TICKER_HZ: u64 = 32_768;

/// Jitter allowance around an event, the free slot search reserves 8 times this margin.
pub const EVENT_JITTER_US: u32 = 16;
/// Minimum auxiliary frame space between chained PDUs.
pub const EVENT_MAFS_US: u32 = 300;
/// Inter frame space.
pub const EVENT_IFS_US: u32 = 150;
/// Minimum sub-event space of a BIS.
pub const EVENT_MSS_US: u32 = 150;
pub const EVENT_OVERHEAD_START_US: u32 = 300;
pub const EVENT_OVERHEAD_END_US: u32 = 40;

/// Unit of periodic advertising and ISO intervals.
pub const PERIODIC_INT_UNIT_US: u32 = 1250;
/// Unit of connection intervals.
pub const CONN_INT_UNIT_US: u32 = 1250;

/// Gap between the three primary channel PDUs of one advertising event.
pub const ADV_CHAN_HOP_US: u32 = 500;

pub const fn us_to_ticks(us: u32) -> u32 {
    ((us as u64 * TICKER_HZ) / 1_000_000) as u32
}

pub const fn ticks_to_us(ticks: u32) -> u32 {
    ((ticks as u64 * 1_000_000) / TICKER_HZ) as u32
}

/// Ticks between `b` and the later `a`, modulo the counter width.
pub const fn ticks_diff(a: u32, b: u32) -> u32 {
    a.wrapping_sub(b) & TICKER_CNTR_MASK
}

pub const fn ticks_add(a: u32, b: u32) -> u32 {
    a.wrapping_add(b) & TICKER_CNTR_MASK
}

/// True when `a` does not lie after `b` on the wrapping counter.
pub const fn ticks_not_after(a: u32, b: u32) -> bool {
    ticks_diff(b, a) & (1 << TICKER_CNTR_MSBIT) == 0
}

pub fn duration_to_ticks(d: Duration) -> u32 {
    us_to_ticks(d.as_micros() as u32)
}

/// Air time of a PDU carrying `octets` payload bytes, including preamble, access address,
/// header and CRC. Coded PHY is timed with S=8 coding.
pub fn pdu_us(octets: usize, phy: PhyKind) -> u32 {
    let octets = octets as u32;
    match phy {
        PhyKind::Le1M => (1 + 4 + 2 + octets + 3) * 8,
        PhyKind::Le2M => (2 + 4 + 2 + octets + 3) * 4,
        _ => 376 + ((2 + octets + 3) * 8 + 3) * 8,
    }
}

/// The 3-bit PHY code used in AuxPtr, SyncInfo and BIGInfo.
pub fn phy_code(phy: PhyKind) -> u8 {
    match phy {
        PhyKind::Le1M => 0,
        PhyKind::Le2M => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_conversions() {
        assert_eq!(us_to_ticks(EVENT_JITTER_US << 3), 4);
        assert_eq!(us_to_ticks(1_000_000), 32_768);
        assert_eq!(ticks_to_us(32_768), 1_000_000);
        assert_eq!(ticks_to_us(1), 30);
    }

    #[test]
    fn wrapping_arithmetic() {
        assert_eq!(ticks_diff(5, TICKER_CNTR_MASK), 6);
        assert_eq!(ticks_add(TICKER_CNTR_MASK, 2), 1);
        assert!(ticks_not_after(10, 20));
        assert!(ticks_not_after(20, 20));
        assert!(!ticks_not_after(21, 20));
        assert!(ticks_not_after(TICKER_CNTR_MASK, 3));
    }

    #[test]
    fn air_time() {
        assert_eq!(pdu_us(0, PhyKind::Le1M), 80);
        assert_eq!(pdu_us(251, PhyKind::Le1M), 2088);
        assert_eq!(pdu_us(251, PhyKind::Le2M), 1048);
        assert_eq!(pdu_us(0, PhyKind::LeCoded), 376 + 43 * 8);
    }
}

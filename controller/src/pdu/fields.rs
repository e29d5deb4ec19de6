//! Fixed size extended header fields.
use crate::codec::{place, take, Decode, Encode, Error, FixedSize};

pub const OFFS_UNIT_30_US: u32 = 30;
pub const OFFS_UNIT_300_US: u32 = 300;
/// Offset adjustment applied to SyncInfo offsets that do not fit the 300 us unit range.
pub const OFFS_ADJUST_US: u32 = 2_457_600;

/// Advertising Data Info.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Adi {
    /// Advertising data id, 12 bits.
    pub did: u16,
    /// Advertising set id, 4 bits.
    pub sid: u8,
}

impl Adi {
    pub const fn new(sid: u8, did: u16) -> Self {
        Self {
            did: did & 0x0FFF,
            sid: sid & 0x0F,
        }
    }

    /// The ADI announcing changed data for the same set.
    pub const fn next(self) -> Self {
        Self::new(self.sid, self.did.wrapping_add(1))
    }
}

impl FixedSize for Adi {
    const SIZE: usize = 2;
}

impl Encode for Adi {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let v = (self.did & 0x0FFF) | ((self.sid as u16 & 0x0F) << 12);
        v.encode(dest)
    }
}

impl Decode<'_> for Adi {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let v = u16::decode(src)?;
        Ok(Self::new((v >> 12) as u8, v))
    }
}

/// Auxiliary Pointer: channel, time and PHY of the next PDU in the train.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuxPtr {
    pub chan_idx: u8,
    /// Clock accuracy, set for 0-50 ppm.
    pub ca: bool,
    /// Offset counted in 300 us rather than 30 us units.
    pub offs_units: bool,
    pub offs: u16,
    pub phy: u8,
}

impl AuxPtr {
    /// Stores an offset in microseconds, switching to 300 us units when 13 bits of 30 us units
    /// do not suffice.
    pub fn set_offset_us(&mut self, us: u32) {
        let offs = us / OFFS_UNIT_30_US;
        if offs >> 13 != 0 {
            self.offs = ((us / OFFS_UNIT_300_US) & 0x1FFF) as u16;
            self.offs_units = true;
        } else {
            self.offs = offs as u16;
            self.offs_units = false;
        }
    }

    pub fn offset_us(&self) -> u32 {
        let unit = if self.offs_units { OFFS_UNIT_300_US } else { OFFS_UNIT_30_US };
        self.offs as u32 * unit
    }
}

impl FixedSize for AuxPtr {
    const SIZE: usize = 3;
}

impl Encode for AuxPtr {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let dest = place(dest, Self::SIZE)?;
        dest[0] = (self.chan_idx & 0x3F) | ((self.ca as u8) << 6) | ((self.offs_units as u8) << 7);
        let v = (self.offs & 0x1FFF) | ((self.phy as u16 & 0x07) << 13);
        v.encode(&mut dest[1..])
    }
}

impl Decode<'_> for AuxPtr {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let b: [u8; 3] = take(src)?;
        let v = u16::from_le_bytes([b[1], b[2]]);
        Ok(Self {
            chan_idx: b[0] & 0x3F,
            ca: b[0] & 0x40 != 0,
            offs_units: b[0] & 0x80 != 0,
            offs: v & 0x1FFF,
            phy: (v >> 13) as u8,
        })
    }
}

/// Constant Tone Extension info.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CteInfo {
    /// CTE length in 8 us units.
    pub time: u8,
    pub ty: u8,
}

impl FixedSize for CteInfo {
    const SIZE: usize = 1;
}

impl Encode for CteInfo {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        ((self.time & 0x1F) | ((self.ty & 0x03) << 6)).encode(dest)
    }
}

impl Decode<'_> for CteInfo {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let b = u8::decode(src)?;
        Ok(Self {
            time: b & 0x1F,
            ty: b >> 6,
        })
    }
}

/// Periodic advertising synchronization info carried by AUX_ADV_IND.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncInfo {
    pub offs: u16,
    pub offs_units: bool,
    pub offs_adjust: bool,
    /// Periodic interval in 1.25 ms units.
    pub interval: u16,
    /// Data channel map, 37 bits.
    pub chm: [u8; 5],
    /// Sleep clock accuracy, 3 bits.
    pub sca: u8,
    pub aa: [u8; 4],
    pub crc_init: [u8; 3],
    pub evt_cntr: u16,
}

impl SyncInfo {
    pub fn set_offset_us(&mut self, mut us: u32) {
        self.offs_adjust = false;
        if us >= OFFS_ADJUST_US {
            us -= OFFS_ADJUST_US;
            self.offs_adjust = true;
        }
        let offs = us / OFFS_UNIT_30_US;
        if offs >> 13 != 0 {
            self.offs = ((us / OFFS_UNIT_300_US) & 0x1FFF) as u16;
            self.offs_units = true;
        } else {
            self.offs = offs as u16;
            self.offs_units = false;
        }
    }

    pub fn offset_us(&self) -> u32 {
        let unit = if self.offs_units { OFFS_UNIT_300_US } else { OFFS_UNIT_30_US };
        let adjust = if self.offs_adjust { OFFS_ADJUST_US } else { 0 };
        self.offs as u32 * unit + adjust
    }
}

impl FixedSize for SyncInfo {
    const SIZE: usize = 18;
}

impl Encode for SyncInfo {
    fn encode(&self, dest: &mut [u8]) -> Result<(), Error> {
        let dest = place(dest, Self::SIZE)?;
        let offs = (self.offs & 0x1FFF) | ((self.offs_units as u16) << 13) | ((self.offs_adjust as u16) << 14);
        offs.encode(&mut dest[0..2])?;
        self.interval.encode(&mut dest[2..4])?;
        dest[4..9].copy_from_slice(&self.chm);
        dest[8] = (self.chm[4] & 0x1F) | ((self.sca & 0x07) << 5);
        dest[9..13].copy_from_slice(&self.aa);
        dest[13..16].copy_from_slice(&self.crc_init);
        self.evt_cntr.encode(&mut dest[16..18])
    }
}

impl Decode<'_> for SyncInfo {
    fn decode(src: &[u8]) -> Result<Self, Error> {
        let b: [u8; 18] = take(src)?;
        let offs = u16::from_le_bytes([b[0], b[1]]);
        let mut chm: [u8; 5] = take(&b[4..9])?;
        chm[4] &= 0x1F;
        Ok(Self {
            offs: offs & 0x1FFF,
            offs_units: offs & (1 << 13) != 0,
            offs_adjust: offs & (1 << 14) != 0,
            interval: u16::from_le_bytes([b[2], b[3]]),
            chm,
            sca: b[8] >> 5,
            aa: take(&b[9..13])?,
            crc_init: take(&b[13..16])?,
            evt_cntr: u16::from_le_bytes([b[16], b[17]]),
        })
    }
}

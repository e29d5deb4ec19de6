//! AD structures carried in the ACAD of periodic advertising.
use core::ops::Range;

use heapless::Vec;

use crate::codec::{self, place, take, Decode, Encode, FixedSize, Type};
use crate::Error;

/// Channel Map Update Indication.
pub const AD_TYPE_CHM_UPD_IND: u8 = 0x28;
pub const AD_TYPE_BIGINFO: u8 = 0x2C;

/// Instant offset, in periodic events, of a channel map update.
pub const CHM_UPD_INSTANT_OFFSET: u16 = 6;

/// Byte range of the first AD structure of `ad_type`, length and type octets included.
///
/// Walking stops at a zero length octet (padding) or a structure running past the end.
pub fn find(acad: &[u8], ad_type: u8) -> Option<Range<usize>> {
    let mut pos = 0;
    while pos < acad.len() {
        let len = acad[pos] as usize;
        if len == 0 || pos + 1 + len > acad.len() {
            return None;
        }
        if acad[pos + 1] == ad_type {
            return Some(pos..pos + 1 + len);
        }
        pos += 1 + len;
    }
    None
}

/// Copy of `acad` with every structure of `ad_type` removed.
pub fn without<const N: usize>(acad: &[u8], ad_type: u8) -> Result<Vec<u8, N>, Error> {
    let mut out = Vec::new();
    let mut rest = acad;
    while let Some(range) = find(rest, ad_type) {
        out.extend_from_slice(&rest[..range.start])
            .map_err(|_| Error::PacketTooLong)?;
        rest = &rest[range.end..];
    }
    out.extend_from_slice(rest).map_err(|_| Error::PacketTooLong)?;
    Ok(out)
}

/// Appends an AD structure, [`Error::PacketTooLong`] when it does not fit.
pub fn append<const N: usize>(acad: &mut Vec<u8, N>, ad_type: u8, data: &[u8]) -> Result<(), Error> {
    if acad.len() + 2 + data.len() > N || data.len() >= u8::MAX as usize {
        return Err(Error::PacketTooLong);
    }
    acad.push(1 + data.len() as u8).map_err(|_| Error::PacketTooLong)?;
    acad.push(ad_type).map_err(|_| Error::PacketTooLong)?;
    acad.extend_from_slice(data).map_err(|_| Error::PacketTooLong)
}

/// Contents of a Channel Map Update Indication.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChmUpdateInd {
    pub chm: [u8; 5],
    pub instant: u16,
}

impl FixedSize for ChmUpdateInd {
    const SIZE: usize = 7;
}

impl Encode for ChmUpdateInd {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        let dest = place(dest, Self::SIZE)?;
        dest[..5].copy_from_slice(&self.chm);
        self.instant.encode(&mut dest[5..])
    }
}

impl Decode<'_> for ChmUpdateInd {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        let b: [u8; 7] = take(src)?;
        Ok(Self {
            chm: take(&b[..5])?,
            instant: u16::from_le_bytes([b[5], b[6]]),
        })
    }
}

pub const BIGINFO_SIZE: usize = 33;
pub const BIGINFO_ENC_SIZE: usize = 57;

/// Group initialization vector and session key diversifier of an encrypted BIG.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BigEncryption {
    pub giv: [u8; 8],
    pub gskd: [u8; 16],
}

/// BIGInfo, the AD structure describing a BIG to synchronizing receivers.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BigInfo {
    /// Offset to the next BIG anchor, 14 bits.
    pub offs: u16,
    pub offs_units: bool,
    /// ISO interval in 1.25 ms units, 12 bits.
    pub iso_interval: u16,
    pub num_bis: u8,
    pub nse: u8,
    pub bn: u8,
    /// Sub-event interval in us, 20 bits.
    pub sub_interval: u32,
    pub pto: u8,
    /// BIS spacing in us, 20 bits.
    pub spacing: u32,
    pub irc: u8,
    pub max_pdu: u8,
    pub seed_access_addr: u32,
    pub sdu_interval: u32,
    pub max_sdu: u16,
    pub base_crc_init: u16,
    pub chm: [u8; 5],
    pub phy: u8,
    /// bisPayloadCounter of the next BIG event, 39 bits.
    pub payload_count: u64,
    pub framing: bool,
    pub encryption: Option<BigEncryption>,
}

fn put_le(dest: &mut [u8], v: u64) {
    for (i, b) in dest.iter_mut().enumerate() {
        *b = (v >> (8 * i)) as u8;
    }
}

fn get_le(src: &[u8]) -> u64 {
    src.iter().enumerate().fold(0, |acc, (i, b)| acc | (*b as u64) << (8 * i))
}

impl BigInfo {
    pub fn set_offset_us(&mut self, us: u32) {
        let offs = us / super::fields::OFFS_UNIT_30_US;
        if offs >> 14 != 0 {
            self.offs = ((us / super::fields::OFFS_UNIT_300_US) & 0x3FFF) as u16;
            self.offs_units = true;
        } else {
            self.offs = offs as u16;
            self.offs_units = false;
        }
    }

    /// Rewrites only the leading offset word of an encoded BIGInfo.
    pub(crate) fn patch_offset(dest: &mut [u8], offs: u16, offs_units: bool) -> Result<(), codec::Error> {
        let word = u32::decode(dest)?;
        let word = (word & !0x7FFF) | (offs as u32 & 0x3FFF) | ((offs_units as u32) << 14);
        word.encode(dest)
    }
}

impl Type for BigInfo {
    fn size(&self) -> usize {
        if self.encryption.is_some() {
            BIGINFO_ENC_SIZE
        } else {
            BIGINFO_SIZE
        }
    }
}

impl Encode for BigInfo {
    fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        let d = place(dest, self.size())?;
        let w0 = (self.offs as u32 & 0x3FFF)
            | ((self.offs_units as u32) << 14)
            | ((self.iso_interval as u32 & 0x0FFF) << 15)
            | ((self.num_bis as u32 & 0x1F) << 27);
        w0.encode(&mut d[0..4])?;
        d[4] = (self.nse & 0x1F) | ((self.bn & 0x07) << 5);
        put_le(&mut d[5..8], (self.sub_interval & 0x0F_FFFF) as u64 | ((self.pto as u64 & 0x0F) << 20));
        put_le(&mut d[8..11], (self.spacing & 0x0F_FFFF) as u64 | ((self.irc as u64 & 0x0F) << 20));
        d[11] = self.max_pdu;
        d[12] = 0;
        self.seed_access_addr.encode(&mut d[13..17])?;
        let w3 = (self.sdu_interval & 0x0F_FFFF) | ((self.max_sdu as u32 & 0x0FFF) << 20);
        w3.encode(&mut d[17..21])?;
        self.base_crc_init.encode(&mut d[21..23])?;
        put_le(&mut d[23..28], (get_le(&self.chm) & 0x1F_FFFF_FFFF) | ((self.phy as u64 & 0x07) << 37));
        put_le(&mut d[28..33], (self.payload_count & 0x7F_FFFF_FFFF) | ((self.framing as u64) << 39));
        if let Some(enc) = &self.encryption {
            d[33..41].copy_from_slice(&enc.giv);
            d[41..57].copy_from_slice(&enc.gskd);
        }
        Ok(())
    }
}

impl Decode<'_> for BigInfo {
    fn decode(src: &[u8]) -> Result<Self, codec::Error> {
        let encryption = match src.len() {
            BIGINFO_SIZE => None,
            BIGINFO_ENC_SIZE => Some(BigEncryption {
                giv: take(&src[33..41])?,
                gskd: take(&src[41..57])?,
            }),
            _ => return Err(codec::Error::InvalidValue),
        };
        let w0 = u32::decode(src)?;
        let w1 = get_le(&src[5..8]);
        let w2 = get_le(&src[8..11]);
        let w3 = u32::decode(&src[17..21])?;
        let chm = get_le(&src[23..28]);
        let pc = get_le(&src[28..33]);
        let mut chm_bytes = [0u8; 5];
        put_le(&mut chm_bytes, chm & 0x1F_FFFF_FFFF);
        Ok(Self {
            offs: (w0 & 0x3FFF) as u16,
            offs_units: w0 & (1 << 14) != 0,
            iso_interval: ((w0 >> 15) & 0x0FFF) as u16,
            num_bis: (w0 >> 27) as u8,
            nse: src[4] & 0x1F,
            bn: src[4] >> 5,
            sub_interval: (w1 & 0x0F_FFFF) as u32,
            pto: (w1 >> 20) as u8,
            spacing: (w2 & 0x0F_FFFF) as u32,
            irc: (w2 >> 20) as u8,
            max_pdu: src[11],
            seed_access_addr: u32::decode(&src[13..17])?,
            sdu_interval: w3 & 0x0F_FFFF,
            max_sdu: (w3 >> 20) as u16,
            base_crc_init: u16::decode(&src[21..23])?,
            chm: chm_bytes,
            phy: ((chm >> 37) & 0x07) as u8,
            payload_count: pc & 0x7F_FFFF_FFFF,
            framing: pc & (1 << 39) != 0,
            encryption,
        })
    }
}

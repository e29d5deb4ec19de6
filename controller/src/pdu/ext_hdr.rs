//! Common extended advertising payload header.
//!
//! The optional fields are described by one ordered table, [`ExtHdrField::ORDER`]. Decoding,
//! encoding, length and offset computations all walk that table, so the canonical wire order
//! exists in exactly one place.
use core::ops::{BitOr, BitOrAssign};

use heapless::Vec;

use super::fields::{Adi, AuxPtr, CteInfo, SyncInfo};
use super::{AdvMode, PDU_AC_ACAD_SIZE_MAX, PDU_AC_EXT_HEADER_SIZE_MAX};
use crate::codec::{self, Decode, Encode};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::Error;

/// Set of extended header fields, plus the trailing ACAD and advertising data.
///
/// The low seven bits are the wire flags.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdrFields(u16);

impl HdrFields {
    pub const ADV_ADDR: Self = Self(1 << 0);
    pub const TGT_ADDR: Self = Self(1 << 1);
    pub const CTE_INFO: Self = Self(1 << 2);
    pub const ADI: Self = Self(1 << 3);
    pub const AUX_PTR: Self = Self(1 << 4);
    pub const SYNC_INFO: Self = Self(1 << 5);
    pub const TX_POWER: Self = Self(1 << 6);
    pub const ACAD: Self = Self(1 << 8);
    pub const AD_DATA: Self = Self(1 << 9);

    const WIRE_MASK: u16 = 0x7F;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub(crate) const fn wire(self) -> u8 {
        (self.0 & Self::WIRE_MASK) as u8
    }

    pub(crate) const fn from_wire(flags: u8) -> Self {
        Self(flags as u16 & Self::WIRE_MASK)
    }
}

impl BitOr for HdrFields {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for HdrFields {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Optional fixed size fields of the extended header.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtHdrField {
    AdvA,
    TgtA,
    CteInfo,
    Adi,
    AuxPtr,
    SyncInfo,
    TxPower,
}

impl ExtHdrField {
    /// Wire order of the optional fields. ACAD follows the last of them, advertising data follows
    /// the header.
    pub const ORDER: [ExtHdrField; 7] = [
        ExtHdrField::AdvA,
        ExtHdrField::TgtA,
        ExtHdrField::CteInfo,
        ExtHdrField::Adi,
        ExtHdrField::AuxPtr,
        ExtHdrField::SyncInfo,
        ExtHdrField::TxPower,
    ];

    pub const fn flag(self) -> HdrFields {
        match self {
            ExtHdrField::AdvA => HdrFields::ADV_ADDR,
            ExtHdrField::TgtA => HdrFields::TGT_ADDR,
            ExtHdrField::CteInfo => HdrFields::CTE_INFO,
            ExtHdrField::Adi => HdrFields::ADI,
            ExtHdrField::AuxPtr => HdrFields::AUX_PTR,
            ExtHdrField::SyncInfo => HdrFields::SYNC_INFO,
            ExtHdrField::TxPower => HdrFields::TX_POWER,
        }
    }

    pub const fn size(self) -> usize {
        match self {
            ExtHdrField::AdvA | ExtHdrField::TgtA => 6,
            ExtHdrField::CteInfo => 1,
            ExtHdrField::Adi => 2,
            ExtHdrField::AuxPtr => 3,
            ExtHdrField::SyncInfo => 18,
            ExtHdrField::TxPower => 1,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Contents of one optional field.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    AdvA([u8; 6]),
    TgtA([u8; 6]),
    CteInfo(CteInfo),
    Adi(Adi),
    AuxPtr(AuxPtr),
    SyncInfo(SyncInfo),
    TxPower(i8),
}

impl FieldValue {
    pub const fn field(&self) -> ExtHdrField {
        match self {
            FieldValue::AdvA(_) => ExtHdrField::AdvA,
            FieldValue::TgtA(_) => ExtHdrField::TgtA,
            FieldValue::CteInfo(_) => ExtHdrField::CteInfo,
            FieldValue::Adi(_) => ExtHdrField::Adi,
            FieldValue::AuxPtr(_) => ExtHdrField::AuxPtr,
            FieldValue::SyncInfo(_) => ExtHdrField::SyncInfo,
            FieldValue::TxPower(_) => ExtHdrField::TxPower,
        }
    }

    /// Zero filled contents for a field added without a value. AuxPtr and SyncInfo get their
    /// real contents once the ticker has placed the event they point at.
    pub fn placeholder(field: ExtHdrField) -> Self {
        match field {
            ExtHdrField::AdvA => FieldValue::AdvA([0; 6]),
            ExtHdrField::TgtA => FieldValue::TgtA([0; 6]),
            ExtHdrField::CteInfo => FieldValue::CteInfo(CteInfo::default()),
            ExtHdrField::Adi => FieldValue::Adi(Adi::default()),
            ExtHdrField::AuxPtr => FieldValue::AuxPtr(AuxPtr::default()),
            ExtHdrField::SyncInfo => FieldValue::SyncInfo(SyncInfo::default()),
            ExtHdrField::TxPower => FieldValue::TxPower(0),
        }
    }

    fn decode(field: ExtHdrField, src: &[u8]) -> Result<Self, codec::Error> {
        Ok(match field {
            ExtHdrField::AdvA => FieldValue::AdvA(Decode::decode(src)?),
            ExtHdrField::TgtA => FieldValue::TgtA(Decode::decode(src)?),
            ExtHdrField::CteInfo => FieldValue::CteInfo(Decode::decode(src)?),
            ExtHdrField::Adi => FieldValue::Adi(Decode::decode(src)?),
            ExtHdrField::AuxPtr => FieldValue::AuxPtr(Decode::decode(src)?),
            ExtHdrField::SyncInfo => FieldValue::SyncInfo(Decode::decode(src)?),
            ExtHdrField::TxPower => FieldValue::TxPower(Decode::decode(src)?),
        })
    }

    pub(crate) fn encode(&self, dest: &mut [u8]) -> Result<(), codec::Error> {
        match self {
            FieldValue::AdvA(a) | FieldValue::TgtA(a) => a.encode(dest),
            FieldValue::CteInfo(v) => v.encode(dest),
            FieldValue::Adi(v) => v.encode(dest),
            FieldValue::AuxPtr(v) => v.encode(dest),
            FieldValue::SyncInfo(v) => v.encode(dest),
            FieldValue::TxPower(v) => v.encode(dest),
        }
    }
}

/// Decoded extended header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtHeader {
    values: [Option<FieldValue>; 7],
    acad: Vec<u8, PDU_AC_ACAD_SIZE_MAX>,
}

macro_rules! typed_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<$ty> {
            match self.get(ExtHdrField::$variant) {
                Some(FieldValue::$variant(v)) => Some(*v),
                _ => None,
            }
        }
    };
}

impl ExtHeader {
    pub fn get(&self, field: ExtHdrField) -> Option<&FieldValue> {
        self.values[field.index()].as_ref()
    }

    pub fn set(&mut self, value: FieldValue) {
        self.values[value.field().index()] = Some(value);
    }

    pub fn clear(&mut self, field: ExtHdrField) {
        self.values[field.index()] = None;
    }

    typed_getter!(adv_addr, AdvA, [u8; 6]);
    typed_getter!(tgt_addr, TgtA, [u8; 6]);
    typed_getter!(cte_info, CteInfo, CteInfo);
    typed_getter!(adi, Adi, Adi);
    typed_getter!(aux_ptr, AuxPtr, AuxPtr);
    typed_getter!(sync_info, SyncInfo, SyncInfo);
    typed_getter!(tx_power, TxPower, i8);

    pub fn acad(&self) -> &[u8] {
        &self.acad
    }

    pub fn set_acad(&mut self, acad: &[u8]) -> Result<(), Error> {
        self.acad = Vec::from_slice(acad).map_err(|_| Error::PacketTooLong)?;
        Ok(())
    }

    /// Fields present, ACAD included when it is not empty.
    pub fn fields(&self) -> HdrFields {
        let mut fields = HdrFields::empty();
        for field in ExtHdrField::ORDER {
            if self.get(field).is_some() {
                fields |= field.flag();
            }
        }
        if !self.acad.is_empty() {
            fields |= HdrFields::ACAD;
        }
        fields
    }

    fn fields_len(&self) -> usize {
        ExtHdrField::ORDER
            .iter()
            .filter(|f| self.get(**f).is_some())
            .map(|f| f.size())
            .sum()
    }

    /// Extended header length as carried in the 6-bit length field: flags byte, fields and ACAD.
    /// Zero when there is nothing to carry, in which case the flags byte is omitted too.
    pub fn len(&self) -> usize {
        let body = self.fields_len() + self.acad.len();
        if body == 0 {
            0
        } else {
            1 + body
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload offset of `field`, if present.
    pub fn offset_of(&self, field: ExtHdrField) -> Option<usize> {
        self.get(field)?;
        let mut offset = 2;
        for f in ExtHdrField::ORDER {
            if f == field {
                return Some(offset);
            }
            if self.get(f).is_some() {
                offset += f.size();
            }
        }
        None
    }

    /// Payload offset of the ACAD bytes.
    pub fn acad_offset(&self) -> usize {
        2 + self.fields_len()
    }

    /// Decodes the header at the start of a PDU payload.
    ///
    /// A header claiming more bytes than the payload holds, or flags whose fields do not fit the
    /// claimed length, are reported as [`Error::Unspecified`].
    pub fn decode(payload: &[u8]) -> Result<(Self, AdvMode), Error> {
        let Some(&b0) = payload.first() else {
            return Err(Error::Unspecified);
        };
        let len = (b0 & 0x3F) as usize;
        let mode = AdvMode::from_bits(b0 >> 6).ok_or(Error::Unspecified)?;
        let mut hdr = ExtHeader::default();
        if len == 0 {
            return Ok((hdr, mode));
        }
        let src = payload.get(1..1 + len).ok_or(Error::Unspecified)?;
        let flags = HdrFields::from_wire(src[0]);
        let mut cursor = ReadCursor::new(&src[1..]);
        for field in ExtHdrField::ORDER {
            if flags.contains(field.flag()) {
                let bytes = cursor.slice(field.size()).map_err(|_| Error::Unspecified)?;
                hdr.values[field.index()] = Some(FieldValue::decode(field, bytes)?);
            }
        }
        hdr.set_acad(cursor.rest())?;
        Ok((hdr, mode))
    }

    /// Writes the length/mode byte and the header, returning the number of payload bytes used.
    pub fn encode(&self, mode: AdvMode, dest: &mut [u8]) -> Result<usize, Error> {
        let len = self.len();
        if len > PDU_AC_EXT_HEADER_SIZE_MAX {
            return Err(Error::PacketTooLong);
        }
        let dest = dest.get_mut(..1 + len).ok_or(Error::PacketTooLong)?;
        dest[0] = (len as u8 & 0x3F) | ((mode as u8) << 6);
        if len == 0 {
            return Ok(1);
        }
        dest[1] = self.fields().wire();
        let mut cursor = WriteCursor::new(&mut dest[2..]);
        for field in ExtHdrField::ORDER {
            if let Some(value) = self.get(field) {
                value.encode(cursor.take(field.size())?)?;
            }
        }
        cursor.append(&self.acad)?;
        Ok(1 + len)
    }
}

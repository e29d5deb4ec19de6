//! Extended advertising PDUs.
//!
//! Every PDU built here is of type `ADV_EXT_IND` (also used for `AUX_ADV_IND`, `AUX_SYNC_IND` and
//! `AUX_CHAIN_IND`): a one byte header, a length octet and a payload made of the common extended
//! header followed by advertising data.
use core::fmt;

pub mod acad;
pub mod ext_hdr;
pub mod fields;

pub use ext_hdr::{ExtHdrField, ExtHeader, FieldValue, HdrFields};
pub use fields::{Adi, AuxPtr, CteInfo, SyncInfo};

use crate::fmt::Bytes;
use crate::Error;

pub const PDU_ADV_TYPE_EXT_IND: u8 = 0x07;

/// Maximum payload of an advertising channel PDU.
pub const PDU_AC_PAYLOAD_SIZE_MAX: usize = 255;
/// Maximum extended header length, the length field is 6 bits wide.
pub const PDU_AC_EXT_HEADER_SIZE_MAX: usize = 63;
/// ACAD can use whatever the flags byte leaves of the extended header.
pub const PDU_AC_ACAD_SIZE_MAX: usize = PDU_AC_EXT_HEADER_SIZE_MAX - 1;

/// Advertising mode of the common extended header.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AdvMode {
    #[default]
    NonConn = 0,
    Conn = 1,
    Scan = 2,
}

impl AdvMode {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(AdvMode::NonConn),
            1 => Some(AdvMode::Conn),
            2 => Some(AdvMode::Scan),
            _ => None,
        }
    }
}

/// One advertising channel PDU buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct AdvPdu {
    header: u8,
    len: u8,
    payload: [u8; PDU_AC_PAYLOAD_SIZE_MAX],
}

impl Default for AdvPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AdvPdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvPdu")
            .field("type", &self.pdu_type())
            .field("len", &self.len)
            .field("payload", &Bytes(self.payload()))
            .finish()
    }
}

impl AdvPdu {
    /// An `ADV_EXT_IND` with an empty extended header and no data.
    pub const fn new() -> Self {
        Self {
            header: PDU_ADV_TYPE_EXT_IND,
            len: 1,
            payload: [0; PDU_AC_PAYLOAD_SIZE_MAX],
        }
    }

    pub fn pdu_type(&self) -> u8 {
        self.header & 0x0F
    }

    pub fn tx_addr(&self) -> bool {
        self.header & 0x40 != 0
    }

    pub fn set_tx_addr(&mut self, random: bool) {
        self.header = (self.header & !0x40) | ((random as u8) << 6);
    }

    pub fn rx_addr(&self) -> bool {
        self.header & 0x80 != 0
    }

    pub fn set_rx_addr(&mut self, random: bool) {
        self.header = (self.header & !0x80) | ((random as u8) << 7);
    }

    /// Copies the PDU type and address type bits of another PDU.
    pub(crate) fn copy_header_from(&mut self, other: &AdvPdu) {
        self.header = other.header;
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    pub(crate) fn buf_mut(&mut self) -> &mut [u8; PDU_AC_PAYLOAD_SIZE_MAX] {
        &mut self.payload
    }

    pub(crate) fn set_len(&mut self, len: usize) -> Result<(), Error> {
        if len > PDU_AC_PAYLOAD_SIZE_MAX {
            return Err(Error::PacketTooLong);
        }
        self.len = len as u8;
        Ok(())
    }

    pub fn adv_mode(&self) -> Result<AdvMode, Error> {
        let b0 = self.payload().first().ok_or(Error::Unspecified)?;
        AdvMode::from_bits(b0 >> 6).ok_or(Error::Unspecified)
    }

    /// Extended header length octet, zero for an empty PDU.
    pub fn ext_hdr_len(&self) -> usize {
        self.payload().first().map(|b| (b & 0x3F) as usize).unwrap_or(0)
    }

    pub fn ext_header(&self) -> Result<ExtHeader, Error> {
        ExtHeader::decode(self.payload()).map(|(hdr, _)| hdr)
    }

    /// Present header fields, with [`HdrFields::AD_DATA`] added when the PDU carries data.
    pub fn fields(&self) -> Result<HdrFields, Error> {
        let mut fields = self.ext_header()?.fields();
        if !self.ad_data()?.is_empty() {
            fields |= HdrFields::AD_DATA;
        }
        Ok(fields)
    }

    pub fn ad_data(&self) -> Result<&[u8], Error> {
        let start = 1 + self.ext_hdr_len();
        self.payload().get(start..).ok_or(Error::Unspecified)
    }

    pub fn acad(&self) -> Result<&[u8], Error> {
        let hdr = self.ext_header()?;
        let start = hdr.acad_offset();
        self.payload()
            .get(start..start + hdr.acad().len())
            .ok_or(Error::Unspecified)
    }

    /// Mutable view of the ACAD bytes, for in place patches that keep its length.
    pub fn acad_mut(&mut self) -> Result<&mut [u8], Error> {
        let hdr = self.ext_header()?;
        let start = hdr.acad_offset();
        let end = start + hdr.acad().len();
        self.payload[..self.len as usize]
            .get_mut(start..end)
            .ok_or(Error::Unspecified)
    }

    /// Rewrites one present field in place, leaving every other byte untouched.
    pub fn field_patch(&mut self, field: ExtHdrField, f: impl FnOnce(&mut FieldValue)) -> Result<(), Error> {
        let hdr = self.ext_header()?;
        let offset = hdr.offset_of(field).ok_or(Error::Unspecified)?;
        let mut value = *hdr.get(field).ok_or(Error::Unspecified)?;
        f(&mut value);
        if value.field() != field {
            return Err(Error::Unspecified);
        }
        value.encode(&mut self.payload[offset..offset + field.size()])?;
        Ok(())
    }
}

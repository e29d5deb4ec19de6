//! Chain header set/clear engine.
//!
//! An edit starts from the previous PDU of a chain position and a pair of field sets: fields to
//! add (or overwrite) and fields to remove. Everything else carries over from the previous PDU,
//! ACAD and advertising data included. The new header is composed as a typed [`ExtHeader`] first,
//! so lengths are known and checked before a single byte of the destination is written.
use crate::pdu::{
    AdvMode, AdvPdu, ExtHdrField, ExtHeader, FieldValue, HdrFields, PDU_AC_EXT_HEADER_SIZE_MAX,
    PDU_AC_PAYLOAD_SIZE_MAX,
};
use crate::Error;

/// PDU kinds built by the engine, each with its own set of legal fields.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    ExtInd,
    AuxAdvInd,
    AuxSyncInd,
    AuxChainInd,
}

impl PduKind {
    pub const fn allowed(self) -> HdrFields {
        match self {
            PduKind::ExtInd => HdrFields::ADV_ADDR
                .union(HdrFields::TGT_ADDR)
                .union(HdrFields::ADI)
                .union(HdrFields::AUX_PTR)
                .union(HdrFields::TX_POWER),
            PduKind::AuxAdvInd => HdrFields::ADV_ADDR
                .union(HdrFields::TGT_ADDR)
                .union(HdrFields::ADI)
                .union(HdrFields::AUX_PTR)
                .union(HdrFields::SYNC_INFO)
                .union(HdrFields::TX_POWER)
                .union(HdrFields::ACAD)
                .union(HdrFields::AD_DATA),
            PduKind::AuxSyncInd => HdrFields::CTE_INFO
                .union(HdrFields::ADI)
                .union(HdrFields::AUX_PTR)
                .union(HdrFields::TX_POWER)
                .union(HdrFields::ACAD)
                .union(HdrFields::AD_DATA),
            PduKind::AuxChainInd => HdrFields::CTE_INFO
                .union(HdrFields::ADI)
                .union(HdrFields::AUX_PTR)
                .union(HdrFields::TX_POWER)
                .union(HdrFields::AD_DATA),
        }
    }
}

/// Contents for the fields of an edit.
///
/// A field in the add set takes its value from here, falls back to the previous PDU and finally
/// to a zero filled placeholder. ACAD and advertising data replace the previous bytes when given.
#[derive(Debug, Clone, Copy, Default)]
pub struct HdrData<'a> {
    values: [Option<FieldValue>; 7],
    acad: Option<&'a [u8]>,
    ad_data: Option<&'a [u8]>,
}

impl<'a> HdrData<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, value: FieldValue) -> Self {
        self.values[value.field().index()] = Some(value);
        self
    }

    pub fn acad(mut self, acad: &'a [u8]) -> Self {
        self.acad = Some(acad);
        self
    }

    pub fn ad_data(mut self, ad: &'a [u8]) -> Self {
        self.ad_data = Some(ad);
        self
    }

    pub fn value(&self, field: ExtHdrField) -> Option<FieldValue> {
        self.values[field.index()]
    }
}

/// What an edit produced, for callers that patch the new PDU afterwards.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdrOutcome {
    /// Fields of the new PDU, ACAD and AD_DATA included when not empty.
    pub fields: HdrFields,
    pub ext_hdr_len: usize,
    pub len: usize,
    pub ad_len: usize,
    pub acad_prev_len: usize,
    pub aux_ptr_offset: Option<usize>,
    pub sync_info_offset: Option<usize>,
}

/// A composed but not yet written PDU.
#[derive(Debug, Clone)]
pub struct Composed<'a> {
    pub header: ExtHeader,
    pub mode: AdvMode,
    ad: &'a [u8],
    acad_prev_len: usize,
}

impl<'a> Composed<'a> {
    pub fn ext_hdr_len(&self) -> usize {
        self.header.len()
    }

    /// Payload length once written.
    pub fn len(&self) -> usize {
        1 + self.ext_hdr_len() + self.ad.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 1
    }

    pub fn ad(&self) -> &'a [u8] {
        self.ad
    }

    pub fn set_ad(&mut self, ad: &'a [u8]) {
        self.ad = ad;
    }

    /// Advertising data bytes that still fit after the header.
    pub fn ad_room(&self) -> usize {
        PDU_AC_PAYLOAD_SIZE_MAX.saturating_sub(1 + self.ext_hdr_len())
    }

    pub fn check(&self) -> Result<(), Error> {
        if self.ext_hdr_len() > PDU_AC_EXT_HEADER_SIZE_MAX || self.len() > PDU_AC_PAYLOAD_SIZE_MAX {
            return Err(Error::PacketTooLong);
        }
        Ok(())
    }

    /// Writes the PDU, taking type and address bits from `prev`.
    pub fn write(&self, prev: &AdvPdu, pdu: &mut AdvPdu) -> Result<HdrOutcome, Error> {
        self.check()?;
        pdu.copy_header_from(prev);
        let buf = pdu.buf_mut();
        let n = self.header.encode(self.mode, &mut buf[..])?;
        buf[n..n + self.ad.len()].copy_from_slice(self.ad);
        pdu.set_len(n + self.ad.len())?;

        let mut fields = self.header.fields();
        if !self.ad.is_empty() {
            fields |= HdrFields::AD_DATA;
        }
        Ok(HdrOutcome {
            fields,
            ext_hdr_len: self.ext_hdr_len(),
            len: n + self.ad.len(),
            ad_len: self.ad.len(),
            acad_prev_len: self.acad_prev_len,
            aux_ptr_offset: self.header.offset_of(ExtHdrField::AuxPtr),
            sync_info_offset: self.header.offset_of(ExtHdrField::SyncInfo),
        })
    }
}

/// Composes the header that results from applying `add` and `rem` to `prev`.
///
/// A field may not be both added and removed, and added fields must be legal for `kind`.
pub fn compose<'a>(
    kind: PduKind,
    prev: &'a AdvPdu,
    add: HdrFields,
    rem: HdrFields,
    data: &HdrData<'a>,
) -> Result<Composed<'a>, Error> {
    if add.intersects(rem) || !kind.allowed().contains(add) {
        return Err(Error::InvalidParameter);
    }
    let (prev_hdr, mode) = ExtHeader::decode(prev.payload())?;
    let prev_ad = prev.ad_data()?;

    let mut header = ExtHeader::default();
    for field in ExtHdrField::ORDER {
        let flag = field.flag();
        let value = if add.contains(flag) {
            data.value(field)
                .or_else(|| prev_hdr.get(field).copied())
                .or_else(|| Some(FieldValue::placeholder(field)))
        } else if rem.contains(flag) {
            None
        } else {
            prev_hdr.get(field).copied()
        };
        if let Some(value) = value {
            header.set(value);
        }
    }

    let acad = if add.contains(HdrFields::ACAD) {
        data.acad.unwrap_or(prev_hdr.acad())
    } else if rem.contains(HdrFields::ACAD) {
        &[]
    } else {
        prev_hdr.acad()
    };
    header.set_acad(acad)?;

    let ad = if add.contains(HdrFields::AD_DATA) {
        data.ad_data.unwrap_or(prev_ad)
    } else if rem.contains(HdrFields::AD_DATA) {
        &[]
    } else {
        prev_ad
    };

    Ok(Composed {
        header,
        mode,
        ad,
        acad_prev_len: prev_hdr.acad().len(),
    })
}

/// Builds `pdu` from `prev` with the fields in `add` set and those in `rem` cleared.
///
/// Returns [`Error::InvalidParameter`] for an illegal field combination, [`Error::PacketTooLong`]
/// when the result does not fit a PDU and [`Error::Unspecified`] when `prev` does not parse.
pub fn hdr_set_clear<'a>(
    kind: PduKind,
    prev: &'a AdvPdu,
    pdu: &mut AdvPdu,
    add: HdrFields,
    rem: HdrFields,
    data: &HdrData<'a>,
) -> Result<HdrOutcome, Error> {
    let composed = compose(kind, prev, add, rem, data)?;
    let outcome = composed.write(prev, pdu)?;
    trace!(
        "[hdr] {:x} -> {:x} len {}",
        add.bits(),
        outcome.fields.bits(),
        outcome.len
    );
    Ok(outcome)
}

use crate::codec;
use crate::sched::SchedError;

/// Errors returned by the upper link layer.
///
/// Every kind maps onto an HCI status code through [`Error::status`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Illegal field combination for a PDU type, or a parameter out of protocol range.
    InvalidParameter,
    /// The PDU pool or another fixed resource pool is exhausted.
    MemoryCapacityExceeded,
    /// The encoded PDU would exceed its maximum size. Fragmentable data should be chained.
    PacketTooLong,
    /// The operation is not valid in the current state.
    CommandDisallowed,
    /// Internal inconsistency, such as a PDU whose header walks past its own length.
    Unspecified,
    /// No advertising set or BIG with that handle.
    UnknownAdvIdentifier,
    Scheduling(SchedError),
    Codec(codec::Error),
}

impl Error {
    /// HCI status code reported for this error.
    pub fn status(&self) -> u8 {
        match self {
            Error::InvalidParameter => 0x12,
            Error::MemoryCapacityExceeded => 0x07,
            Error::PacketTooLong => 0x45,
            Error::CommandDisallowed => 0x0C,
            Error::UnknownAdvIdentifier => 0x42,
            Error::Unspecified | Error::Scheduling(_) | Error::Codec(_) => 0x1F,
        }
    }
}

impl From<SchedError> for Error {
    fn from(error: SchedError) -> Self {
        Self::Scheduling(error)
    }
}

impl From<codec::Error> for Error {
    fn from(error: codec::Error) -> Self {
        Self::Codec(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(Error::InvalidParameter.status(), 0x12);
        assert_eq!(Error::MemoryCapacityExceeded.status(), 0x07);
        assert_eq!(Error::PacketTooLong.status(), 0x45);
        assert_eq!(Error::CommandDisallowed.status(), 0x0C);
        assert_eq!(Error::Scheduling(SchedError::RetryExhausted).status(), 0x1F);
        assert_eq!(Error::from(codec::Error::InsufficientSpace), Error::Codec(codec::Error::InsufficientSpace));
    }
}

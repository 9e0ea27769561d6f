use thiserror::Error;

pub use crate::RecordResult;

/// Errors that can occur while registering objects or moving records between flash and memory.
/// Marked as non-exhaustive to allow for future additions without breaking the API. Record level
/// data faults (no data, checksum mismatch) are not errors, they are reported as [`RecordResult`].
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// Sector size, sector count and payload size must be non-zero and the region must fit
    /// into the 32 bit flash address space.
    #[error("invalid region")]
    InvalidRegion,

    /// The region can't hold a single record of `payload_size + RECORD_OVERHEAD` bytes.
    #[error("region too small")]
    RegionTooSmall,

    /// The address range of the region aliases an already registered region.
    #[error("region overlaps a registered region")]
    RegionOverlap,

    /// All 65535 handle indices are in use.
    #[error("registry full")]
    RegistryFull,

    /// Growing the registry failed.
    #[error("out of memory")]
    OutOfMemory,

    /// The handle doesn't resolve to a registered object. Either it was forged, tampered with or
    /// belongs to a different registry.
    #[error("invalid handle")]
    InvalidHandle,

    /// The payload exceeds the `payload_size` of the region.
    #[error("value too long")]
    ValueTooLong,

    /// The object's next id reached [`crate::UNSET_ID`].
    #[error("id space exhausted")]
    IdSpaceExhausted,

    /// The internal error value is returned from the provided flash transport
    #[error("internal flash error")]
    FlashError,

    /// Programming succeeded on the bus but the read-compare afterwards did not match.
    #[error("write verification failed")]
    WriteVerifyFailed,
}

#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
mod internal;
pub mod platform;
mod raw;
mod region;
mod registry;

/// Object names are stored in a 16 byte field. At most 14 characters are kept so the field always
/// ends in at least two null bytes.
pub const OBJECT_NAME_CAPACITY: usize = 16;
const MAX_OBJECT_NAME_LENGTH: usize = OBJECT_NAME_CAPACITY - 2;

/// A fixed width, always null terminated display label of a registered object.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ObjectName([u8; OBJECT_NAME_CAPACITY]);

impl ObjectName {
    /// Copies `src` up to the first null byte, truncated to 14 bytes.
    ///
    /// Usage: `ObjectName::from_slice(b"telemetry")`
    pub const fn from_slice(src: &[u8]) -> Self {
        let mut dst = [0u8; OBJECT_NAME_CAPACITY];
        let mut i = 0;
        while i < MAX_OBJECT_NAME_LENGTH && i < src.len() && src[i] != b'\0' {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Usage: `let name = const { ObjectName::from_str("telemetry") };`
    pub const fn from_str(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }

    pub const fn as_bytes(&self) -> &[u8; OBJECT_NAME_CAPACITY] {
        &self.0
    }

    /// Length of the name without the terminator.
    pub fn len(&self) -> usize {
        self.0.iter().position(|&b| b == b'\0').unwrap_or(OBJECT_NAME_CAPACITY)
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == b'\0'
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName(b\"")?;
        for &byte in &self.0[..self.len()] {
            write!(f, "{}", core::ascii::escape_default(byte))?;
        }
        write!(f, "\")")
    }
}

impl AsRef<[u8]> for ObjectName {
    fn as_ref(&self) -> &[u8] {
        &self.0[..self.len()]
    }
}

extern crate alloc;

use crate::error::Error;
use crate::platform::Platform;
use crate::registry::Registry;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::trace;

pub use platform::NorFlashTransport;
pub use raw::{RECORD_OVERHEAD, Record, RecordResult, UNSET_ID};
pub use region::{LayoutKind, RegionDescriptor};
pub use registry::{Handle, ObjectNode};

/// Cyclic record store on raw flash. Owns the flash transport and the registry of objects, each
/// object being a region of erase sectors used as a wrap-around log of checksummed records.
///
/// All operations are blocking and bracket their flash access with the transport's lock. The store
/// is not meant to be shared between execution contexts without external serialization.
pub struct CycleFlash<T: Platform> {
    pub(crate) hal: T,
    pub(crate) registry: Registry,
    pub(crate) faulted: bool,
}

impl<T: Platform> CycleFlash<T> {
    pub fn new(hal: T) -> CycleFlash<T> {
        Self {
            hal,
            registry: Registry::new(),
            faulted: false,
        }
    }

    /// Registers a region and returns the handle used for all further access.
    ///
    /// The region is not checked against the already registered ones. Call [`CycleFlash::overlaps`]
    /// first or use [`CycleFlash::register_exclusive`].
    pub fn register(&mut self, region: RegionDescriptor, name: &str) -> Result<Handle, Error> {
        let handle = self.registry.register(region, name, T::crc16)?;

        #[cfg(feature = "defmt")]
        trace!(
            "register: {:#010x} @{:#08x}..{:#08x}",
            handle.into_raw(),
            region.base_address(),
            region.end_address()
        );

        Ok(handle)
    }

    /// Like [`CycleFlash::register`] but refuses regions aliasing a registered one.
    pub fn register_exclusive(
        &mut self,
        region: RegionDescriptor,
        name: &str,
    ) -> Result<Handle, Error> {
        if self.overlaps(&region) {
            return Err(Error::RegionOverlap);
        }
        self.register(region, name)
    }

    /// `true` if `region` shares at least one byte with any registered region.
    pub fn overlaps(&self, region: &RegionDescriptor) -> bool {
        self.registry.overlaps(region)
    }

    /// Returns the object behind `handle`, or `None` if the handle is forged, tampered with or
    /// stems from another store.
    pub fn resolve(&self, handle: Handle) -> Option<&ObjectNode> {
        self.registry.resolve(handle)
    }

    pub fn resolve_mut(&mut self, handle: Handle) -> Option<&mut ObjectNode> {
        self.registry.resolve_mut(handle)
    }

    pub fn objects(&self) -> impl Iterator<Item = (Handle, &ObjectNode)> {
        self.registry.iter()
    }

    pub fn object_count(&self) -> usize {
        self.registry.len()
    }

    /// Reads the record stored for `id` into `record`, verifying its checksum. A mismatch is
    /// retried once.
    ///
    /// On [`RecordResult::Error`] the id of `record` is reset to [`UNSET_ID`] so stale content is
    /// never mistaken for valid data. Since slots are reused, the record read may belong to a later
    /// cycle than `id`; check [`Record::id`].
    ///
    /// Panics if `id` is [`UNSET_ID`].
    pub fn read(
        &mut self,
        handle: Handle,
        id: u32,
        record: &mut Record,
    ) -> Result<RecordResult, Error> {
        let region = self.region(handle)?;

        self.fault_on_flash_error(|store| store.load_record(&region, id, record))
    }

    /// Writes `payload` as record `id` into its slot, which must be erased, and verifies it with a
    /// read-compare. Doesn't touch the object's counters.
    ///
    /// Panics if `id` is [`UNSET_ID`] or `payload` is empty.
    pub fn append(
        &mut self,
        handle: Handle,
        id: u32,
        payload: &[u8],
    ) -> Result<RecordResult, Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        let region = self.region(handle)?;
        check_payload(&region, id, payload)?;

        self.fault_on_flash_error(|store| store.store_record(&region, id, payload))
    }

    /// Overwrites the record `id` in its own slot.
    ///
    /// The slot has to hold a valid record with that very id, otherwise nothing is written and the
    /// read outcome is returned ([`RecordResult::NoData`] if the slot was reused by another id). No
    /// erase happens, so the new content only verifies if it merely clears bits of the old one.
    ///
    /// Panics if `id` is [`UNSET_ID`] or `payload` is empty.
    pub fn update(
        &mut self,
        handle: Handle,
        id: u32,
        payload: &[u8],
    ) -> Result<RecordResult, Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        let region = self.region(handle)?;
        check_payload(&region, id, payload)?;

        self.fault_on_flash_error(|store| store.overwrite_record(&region, id, payload))
    }

    /// Appends `payload` at the object's next id and advances it. Returns the id written.
    ///
    /// Once the region wrapped, every sector beginning inside the target slot is erased first.
    pub fn push(&mut self, handle: Handle, payload: &[u8]) -> Result<u32, Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        self.fault_on_flash_error(|store| store.push_record(handle, payload))
    }

    /// Restores the object's next id by scanning all slots for the newest valid record. Returns the
    /// restored id, `None` if the region holds no valid record.
    pub fn recover(&mut self, handle: Handle) -> Result<Option<u32>, Error> {
        self.fault_on_flash_error(|store| store.recover_object(handle))
    }

    /// Erases every sector of the region and resets the object's counters.
    pub fn erase_region(&mut self, handle: Handle) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }

        self.fault_on_flash_error(|store| store.erase_object(handle))
    }

    pub fn hal(&self) -> &T {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut T {
        &mut self.hal
    }

    pub fn into_inner(self) -> T {
        self.hal
    }

    fn region(&self, handle: Handle) -> Result<RegionDescriptor, Error> {
        self.registry
            .resolve(handle)
            .map(|object| *object.region())
            .ok_or(Error::InvalidHandle)
    }

    fn fault_on_flash_error<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, Error>,
    ) -> Result<R, Error> {
        match f(self) {
            Err(Error::FlashError) => {
                self.faulted = true;
                Err(Error::FlashError)
            }
            other => other,
        }
    }
}

pub(crate) fn check_payload(region: &RegionDescriptor, id: u32, payload: &[u8]) -> Result<(), Error> {
    assert!(id != UNSET_ID, "the unset id can't be written");
    assert!(!payload.is_empty(), "records carry at least one byte");

    if payload.len() > region.payload_size() as usize {
        return Err(Error::ValueTooLong);
    }

    Ok(())
}

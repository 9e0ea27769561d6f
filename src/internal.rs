use crate::error::Error;
use crate::platform::{FlashTransport, Platform, with_bus_locked};
use crate::raw::{
    RECORD_CHECKSUM_SIZE, RECORD_HEADER_SIZE, Record, RecordHeader, RecordResult, UNSET_ID,
    write_span,
};
use crate::region::RegionDescriptor;
use crate::registry::Handle;
use crate::{CycleFlash, check_payload};
use core::ops::Range;
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

/// A checksum mismatch is read a second time before it is reported.
pub(crate) const READ_ATTEMPTS: usize = 2;

impl<T> CycleFlash<T>
where
    T: Platform,
{
    pub(crate) fn load_record(
        &mut self,
        region: &RegionDescriptor,
        id: u32,
        record: &mut Record,
    ) -> Result<RecordResult, Error> {
        let address = region.address_for_id(id);

        #[cfg(feature = "defmt")]
        trace!("load_record: @{:#08x} id {}", address, id);

        let mut result = RecordResult::NoData;
        for _ in 0..READ_ATTEMPTS {
            let well_formed = with_bus_locked(&mut self.hal, |hal| {
                read_block(hal, address, region.payload_size(), &mut *record)
            })
            .map_err(|_| Error::FlashError)?;

            if record.id == UNSET_ID {
                result = RecordResult::NoData;
                break;
            }

            if well_formed && record.crc == record.calculate_crc16(T::crc16) {
                result = RecordResult::Succeeded;
                break;
            }

            #[cfg(feature = "defmt")]
            warn!("load_record: @{:#08x} checksum mismatch", address);

            record.id = UNSET_ID;
            result = RecordResult::Error;
        }

        Ok(result)
    }

    pub(crate) fn store_record(
        &mut self,
        region: &RegionDescriptor,
        id: u32,
        payload: &[u8],
    ) -> Result<RecordResult, Error> {
        let address = region.address_for_id(id);
        let raw = Record::seal(id, payload, T::crc16).to_bytes();

        #[cfg(feature = "defmt")]
        trace!("store_record: @{:#08x} id {} [{}]", address, id, raw.len());

        with_bus_locked(&mut self.hal, |hal| write_span(hal, address, &raw))
            .map_err(|_| Error::FlashError)?;

        let verified = with_bus_locked(&mut self.hal, |hal| hal.read_compare(address, &raw))
            .map_err(|_| Error::FlashError)?;

        if verified {
            Ok(RecordResult::Succeeded)
        } else {
            #[cfg(feature = "defmt")]
            warn!("store_record: @{:#08x} verification failed", address);

            Ok(RecordResult::Error)
        }
    }

    pub(crate) fn overwrite_record(
        &mut self,
        region: &RegionDescriptor,
        id: u32,
        payload: &[u8],
    ) -> Result<RecordResult, Error> {
        let mut current = Record::default();
        match self.load_record(region, id, &mut current)? {
            RecordResult::Succeeded if current.id == id => self.store_record(region, id, payload),
            RecordResult::Succeeded => Ok(RecordResult::NoData),
            other => Ok(other),
        }
    }

    pub(crate) fn push_record(&mut self, handle: Handle, payload: &[u8]) -> Result<u32, Error> {
        let object = self.registry.resolve(handle).ok_or(Error::InvalidHandle)?;
        let region = *object.region();
        let id = object.id().unwrap_or(0);

        if id == UNSET_ID {
            return Err(Error::IdSpaceExhausted);
        }
        check_payload(&region, id, payload)?;

        if id >= region.slot_count()? {
            let start = region.address_for_id(id);
            for sector in region.sectors_starting_in(start..start + region.slot_size()) {
                self.erase_range(sector)?;
            }
        }

        if self.store_record(&region, id, payload)? != RecordResult::Succeeded {
            return Err(Error::WriteVerifyFailed);
        }

        let object = self
            .registry
            .resolve_mut(handle)
            .ok_or(Error::InvalidHandle)?;
        object.set_id(Some(id + 1));
        object.refresh_valid_count();

        Ok(id)
    }

    pub(crate) fn recover_object(&mut self, handle: Handle) -> Result<Option<u32>, Error> {
        let object = self.registry.resolve(handle).ok_or(Error::InvalidHandle)?;
        let region = *object.region();

        let mut record = Record::default();
        let mut newest = None;
        for slot in 0..region.slot_count()? {
            let result = self.load_record(&region, slot, &mut record)?;

            // a record found in a slot it doesn't map to is garbage that happens to checksum
            if result == RecordResult::Succeeded && region.slot_of(record.id) == slot {
                newest = newest.max(Some(record.id));
            }
        }

        let next_id = newest.map(|id| id + 1);

        #[cfg(feature = "defmt")]
        trace!("recover_object: {:#010x} next id {}", handle.into_raw(), next_id);

        let object = self
            .registry
            .resolve_mut(handle)
            .ok_or(Error::InvalidHandle)?;
        object.set_id(next_id);
        object.refresh_valid_count();

        Ok(next_id)
    }

    pub(crate) fn erase_object(&mut self, handle: Handle) -> Result<(), Error> {
        let object = self.registry.resolve(handle).ok_or(Error::InvalidHandle)?;
        let region = *object.region();

        self.erase_range(region.base_address()..region.end_address())?;

        let object = self
            .registry
            .resolve_mut(handle)
            .ok_or(Error::InvalidHandle)?;
        object.set_id(None);
        object.set_valid_count(None);

        Ok(())
    }

    fn erase_range(&mut self, range: Range<u32>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_range: {:#08x}..{:#08x}", range.start, range.end);

        with_bus_locked(&mut self.hal, |hal| hal.erase(range.start, range.end))
            .map_err(|_| Error::FlashError)
    }
}

/// Reads the fields of one record in on-flash order. Returns `false` if the length field is out of
/// range for the region, in which case neither payload nor checksum are read.
fn read_block<T: FlashTransport>(
    hal: &mut T,
    address: u32,
    payload_size: u16,
    record: &mut Record,
) -> Result<bool, T::Error> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    hal.read(address, &mut header)?;
    let header = RecordHeader::from_bytes(header);

    record.id = header.id;
    record.data.clear();

    if header.id == UNSET_ID {
        return Ok(true);
    }
    if header.len == 0 || header.len > payload_size {
        return Ok(false);
    }

    let mut offset = address + RECORD_HEADER_SIZE as u32;
    record.data.resize(header.len as usize, 0);
    hal.read(offset, &mut record.data)?;
    offset += header.len as u32;

    let mut crc = [0u8; RECORD_CHECKSUM_SIZE];
    hal.read(offset, &mut crc)?;
    record.crc = u16::from_le_bytes(crc);

    Ok(true)
}

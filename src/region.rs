//! Geometry of a registered region and the arithmetic that maps ever increasing logical ids onto
//! the fixed set of record slots the region holds.

use crate::error::Error;
use crate::raw::{RECORD_OVERHEAD, UNSET_ID};
use core::ops::Range;

/// Caller defined tag describing how the payload of the region's records is interpreted.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LayoutKind(pub u8);

/// A contiguous range of erase sectors holding fixed size record slots.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegionDescriptor {
    base_address: u32,
    sector_size: u32,
    sector_count: u32,
    payload_size: u16,
    layout_kind: LayoutKind,
}

impl RegionDescriptor {
    pub const fn new(base_address: u32, sector_size: u32, sector_count: u32, payload_size: u16) -> Self {
        Self {
            base_address,
            sector_size,
            sector_count,
            payload_size,
            layout_kind: LayoutKind(0),
        }
    }

    pub const fn with_layout_kind(mut self, layout_kind: LayoutKind) -> Self {
        self.layout_kind = layout_kind;
        self
    }

    pub const fn base_address(&self) -> u32 {
        self.base_address
    }

    pub const fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub const fn sector_count(&self) -> u32 {
        self.sector_count
    }

    pub const fn payload_size(&self) -> u16 {
        self.payload_size
    }

    pub const fn layout_kind(&self) -> LayoutKind {
        self.layout_kind
    }

    pub const fn capacity(&self) -> u32 {
        self.sector_size.saturating_mul(self.sector_count)
    }

    /// First address past the region.
    pub const fn end_address(&self) -> u32 {
        self.base_address.saturating_add(self.capacity())
    }

    /// Bytes occupied by one record slot.
    pub const fn slot_size(&self) -> u32 {
        self.payload_size as u32 + RECORD_OVERHEAD as u32
    }

    /// Number of record slots in the cyclic buffer.
    pub fn slot_count(&self) -> Result<u32, Error> {
        match self.capacity() / self.slot_size() {
            0 => Err(Error::RegionTooSmall),
            slots => Ok(slots),
        }
    }

    pub(crate) fn validate(&self) -> Result<u32, Error> {
        if self.sector_size == 0 || self.sector_count == 0 || self.payload_size == 0 {
            return Err(Error::InvalidRegion);
        }

        let capacity = self.sector_size as u64 * self.sector_count as u64;
        if self.base_address as u64 + capacity > u32::MAX as u64 {
            return Err(Error::InvalidRegion);
        }

        self.slot_count()
    }

    fn slots(&self) -> u32 {
        let slots = self.capacity() / self.slot_size();
        assert!(slots > 0, "region can't hold a single record");
        slots
    }

    /// Index of the slot that stores `id`.
    ///
    /// Ids are split into the completed cycle and the position within it, counting `id + 1` records
    /// written up to and including `id`. Every `slot_count` ids map onto the same slot again.
    ///
    /// Panics if `id` is [`UNSET_ID`] or the region can't hold a single slot, which registration
    /// rules out (see [`crate::CycleFlash::register`]).
    pub fn slot_of(&self, id: u32) -> u32 {
        assert!(id != UNSET_ID, "the unset id has no slot");

        let slots = self.slots();
        let written = id + 1;
        let cycle = written / slots;
        let position = written % slots;

        if cycle < 1 || (cycle == 1 && position == 0) {
            id
        } else if position != 0 {
            id - cycle * slots
        } else {
            id - (cycle - 1) * slots
        }
    }

    /// Absolute flash address of the slot that stores `id`.
    ///
    /// Panics under the same conditions as [`RegionDescriptor::slot_of`].
    pub fn address_for_id(&self, id: u32) -> u32 {
        self.base_address + self.slot_of(id) * self.slot_size()
    }

    /// Number of ids that are still readable when `next_id` is the next id to be written.
    /// `None` if no id was assigned yet.
    ///
    /// Panics if an id is given and the region can't hold a single slot.
    ///
    /// Once the buffer wrapped, a single sector region holds the ids of the current cycle only,
    /// since wrapping erased the whole sector. A multi sector region loses one sector worth of slots
    /// plus the one straddling the sector boundary ahead of the write position.
    pub fn valid_count(&self, next_id: Option<u32>) -> Option<u32> {
        let next_id = next_id?;
        let slots = self.slots();
        let cycle = next_id / slots;
        let position = next_id % slots;

        let count = if cycle < 1 || (cycle == 1 && position == 0) {
            next_id
        } else if self.sector_count > 1 {
            slots
                .saturating_sub(self.sector_size / self.slot_size())
                .saturating_sub(1)
        } else if position == 0 {
            slots
        } else {
            position
        };

        Some(count)
    }

    /// `true` if the two regions share at least one byte.
    pub fn overlaps(&self, other: &RegionDescriptor) -> bool {
        let (head_1, tail_1) = (self.base_address, self.end_address());
        let (head_2, tail_2) = (other.base_address, other.end_address());

        head_1 < tail_2 && head_2 < tail_1
    }

    /// Sectors whose first byte lies within `slot`. Writing a slot is the first touch of those
    /// sectors in the current cycle.
    pub(crate) fn sectors_starting_in(&self, slot: Range<u32>) -> impl Iterator<Item = Range<u32>> {
        let base_address = self.base_address;
        let sector_size = self.sector_size;
        let first = (slot.start - base_address).div_ceil(sector_size);

        (first..self.sector_count)
            .map(move |sector| base_address + sector * sector_size)
            .take_while(move |&start| start < slot.end)
            .map(move |start| start..start + sector_size)
    }
}

use crate::platform::{FlashTransport, FnCrc16, HALF_WORD_SIZE, WORD_SIZE, align_floor};
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter};
use core::mem::size_of;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Id value of erased flash. Never a valid logical record id.
pub const UNSET_ID: u32 = u32::MAX;

pub(crate) const RECORD_HEADER_SIZE: usize = size_of::<u32>() + size_of::<u16>();
pub(crate) const RECORD_CHECKSUM_SIZE: usize = size_of::<u16>();

/// Bytes every record occupies in addition to its payload: id, length and checksum.
pub const RECORD_OVERHEAD: usize = RECORD_HEADER_SIZE + RECORD_CHECKSUM_SIZE;

const _: () = assert!(RECORD_OVERHEAD == 8, "record layout is id:4, length:2, checksum:2");

/// Outcome of a record level operation.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordResult {
    /// The slot holds no record, the id read back as [`UNSET_ID`].
    NoData,
    /// The checksum matched (read) or the read-compare after programming matched (write).
    Succeeded,
    /// Checksum mismatch after all read attempts, or the written bytes didn't verify.
    Error,
}

/// One record block. On flash it is stored as `id`, `length`, `data`, `checksum` in this order,
/// little endian, without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    pub(crate) id: u32,
    pub(crate) data: Vec<u8>,
    pub(crate) crc: u16,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            id: UNSET_ID,
            data: Vec::new(),
            crc: u16::MAX,
        }
    }
}

impl Record {
    pub(crate) fn seal(id: u32, data: &[u8], crc16: FnCrc16) -> Self {
        let mut record = Self {
            id,
            data: data.to_vec(),
            crc: 0,
        };
        record.crc = record.calculate_crc16(crc16);
        record
    }

    /// The logical id stored in the record. After a failed read this is [`UNSET_ID`].
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> u16 {
        self.data.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The checksum as stored on flash.
    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// A record is valid if it carries a real id and the stored checksum matches the content.
    pub fn is_valid(&self, crc16: FnCrc16) -> bool {
        self.id != UNSET_ID && self.crc == self.calculate_crc16(crc16)
    }

    pub(crate) fn calculate_crc16(&self, crc16: FnCrc16) -> u16 {
        Self::calculate_crc16_ref(crc16, self.id, &self.data)
    }

    /// Checksum over `id`, `length` and `data`, chained in on-flash order.
    pub(crate) fn calculate_crc16_ref(crc16: FnCrc16, id: u32, data: &[u8]) -> u16 {
        let mut result = 0;
        result = crc16(result, &id.to_le_bytes());
        result = crc16(result, &(data.len() as u16).to_le_bytes());
        crc16(result, data)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_OVERHEAD + self.data.len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.len().to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.crc.to_le_bytes());
        buf
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let id = self.id;
        let len = self.data.len();
        let crc = self.crc;
        if id == UNSET_ID {
            f.write_fmt(format_args!("Record {{ id: unset }}"))
        } else {
            f.write_fmt(format_args!(
                "Record {{ id: {id}, len: {len}, crc: 0x{crc:0>4x}, data: {:?} }}",
                self.data
            ))
        }
    }
}

pub(crate) struct RecordHeader {
    pub(crate) id: u32,
    pub(crate) len: u16,
}

impl RecordHeader {
    pub(crate) fn from_bytes(raw: [u8; RECORD_HEADER_SIZE]) -> Self {
        let [a, b, c, d, e, f] = raw;
        Self {
            id: u32::from_le_bytes([a, b, c, d]),
            len: u16::from_le_bytes([e, f]),
        }
    }
}

/// Programs `bytes` at `offset` with the widest aligned transfer available at each step: whole
/// words while the offset is word aligned, otherwise a single half word or a single byte until the
/// offset is aligned again. The caller holds the bus lock.
pub(crate) fn write_span<T: FlashTransport>(
    hal: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_span @{:#08x}: [{}]", offset, bytes.len());

    let mut offset = offset;
    let mut remaining = bytes;
    while !remaining.is_empty() {
        let written = if offset.is_multiple_of(WORD_SIZE as u32) && remaining.len() >= WORD_SIZE {
            let len = align_floor(remaining.len(), WORD_SIZE);
            hal.write_word(offset, &remaining[..len])?;
            len
        } else if offset.is_multiple_of(HALF_WORD_SIZE as u32) && remaining.len() >= HALF_WORD_SIZE
        {
            hal.write_half_word(offset, &remaining[..HALF_WORD_SIZE])?;
            HALF_WORD_SIZE
        } else {
            hal.write_byte(offset, remaining[0])?;
            1
        };

        offset += written as u32;
        remaining = &remaining[written..];
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const XMODEM: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

    fn xmodem(init: u16, data: &[u8]) -> u16 {
        let mut digest = XMODEM.digest_with_initial(init);
        digest.update(data);
        digest.finalize()
    }

    #[test]
    fn layout() {
        let record = Record::seal(0x04030201, &[0xAA, 0xBB, 0xCC], xmodem);
        let bytes = record.to_bytes();

        assert_eq!(bytes.len(), 3 + RECORD_OVERHEAD);
        assert_eq!(&bytes[..6], &[0x01, 0x02, 0x03, 0x04, 0x03, 0x00]);
        assert_eq!(&bytes[6..9], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(&bytes[9..], &record.crc().to_le_bytes());
    }

    #[test]
    fn checksum_covers_id_length_and_payload() {
        let record = Record::seal(7, b"payload", xmodem);
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(b"payload");

        assert_eq!(record.crc(), XMODEM.checksum(&buf));
        assert!(record.is_valid(xmodem));
    }

    #[test]
    fn single_byte_flip_invalidates() {
        let original = Record::seal(42, &[0u8, 1, 2, 3, 4, 5, 6, 7], xmodem);
        for i in 0..original.data.len() {
            let mut corrupted = original.clone();
            corrupted.data[i] ^= 0x01;
            assert!(!corrupted.is_valid(xmodem), "flip at {i} went unnoticed");
        }
    }

    #[test]
    fn unset_id_is_never_valid() {
        let record = Record::seal(UNSET_ID, b"x", xmodem);
        assert!(!record.is_valid(xmodem));
        assert!(!Record::default().is_valid(xmodem));
    }

    #[test]
    fn header_from_bytes() {
        let header = RecordHeader::from_bytes([0xFF, 0xFF, 0xFF, 0xFF, 0x10, 0x00]);
        assert_eq!(header.id, UNSET_ID);
        assert_eq!(header.len, 16);
    }
}

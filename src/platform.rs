use alloc::vec;
use embedded_storage::nor_flash::{ErrorType, MultiwriteNorFlash, NorFlash};

/// See README.md for an example implementation.
pub trait Platform: Crc + FlashTransport {}

impl<T: Crc + FlashTransport> Platform for T {}

pub type FnCrc16 = fn(init: u16, data: &[u8]) -> u16;

/// 16 bit checksum used for record blocks and handle tags. The reference setup is
/// CRC-16/XMODEM (poly 0x1021, no reflection, no final xor) which allows chaining by passing the
/// previous result as `init`.
pub trait Crc {
    fn crc16(init: u16, data: &[u8]) -> u16;
}

impl<T: Crc> Crc for &mut T {
    fn crc16(init: u16, data: &[u8]) -> u16 {
        T::crc16(init, data)
    }
}

pub const WORD_SIZE: usize = 4;
pub const HALF_WORD_SIZE: usize = 2;

/// Raw access to the flash bus. Offsets are absolute flash addresses.
///
/// Programming primitives only ever receive naturally aligned offsets: `write_word` gets a non-empty
/// multiple of [`WORD_SIZE`] bytes at a 4 byte aligned offset, `write_half_word` exactly
/// [`HALF_WORD_SIZE`] bytes at an even offset. Reads and compares may start anywhere.
///
/// `lock` and `unlock` bracket every read or programming sequence issued by this crate. They are
/// never nested.
pub trait FlashTransport: ErrorType {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error>;

    fn write_word(&mut self, offset: u32, words: &[u8]) -> Result<(), Self::Error>;

    fn write_half_word(&mut self, offset: u32, half_word: &[u8]) -> Result<(), Self::Error>;

    fn write_byte(&mut self, offset: u32, byte: u8) -> Result<(), Self::Error>;

    /// Returns `true` if the flash content at `offset` equals `expected`.
    fn read_compare(&mut self, offset: u32, expected: &[u8]) -> Result<bool, Self::Error>;

    /// Erases `from..to`. Both ends are aligned to the erase size of the device.
    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error>;

    fn lock(&mut self) {}

    fn unlock(&mut self) {}
}

impl<T: FlashTransport> FlashTransport for &mut T {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        T::read(self, offset, bytes)
    }

    fn write_word(&mut self, offset: u32, words: &[u8]) -> Result<(), Self::Error> {
        T::write_word(self, offset, words)
    }

    fn write_half_word(&mut self, offset: u32, half_word: &[u8]) -> Result<(), Self::Error> {
        T::write_half_word(self, offset, half_word)
    }

    fn write_byte(&mut self, offset: u32, byte: u8) -> Result<(), Self::Error> {
        T::write_byte(self, offset, byte)
    }

    fn read_compare(&mut self, offset: u32, expected: &[u8]) -> Result<bool, Self::Error> {
        T::read_compare(self, offset, expected)
    }

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        T::erase(self, from, to)
    }

    fn lock(&mut self) {
        T::lock(self)
    }

    fn unlock(&mut self) {
        T::unlock(self)
    }
}

/// Runs `f` between `lock` and `unlock`. The bus is unlocked even if `f` fails.
pub(crate) fn with_bus_locked<T: FlashTransport, R>(hal: &mut T, f: impl FnOnce(&mut T) -> R) -> R {
    hal.lock();
    let result = f(hal);
    hal.unlock();
    result
}

pub trait AlignedOps: NorFlash {
    fn align_read_floor(size: usize) -> usize {
        align_floor(size, Self::READ_SIZE)
    }

    fn align_read_ceil(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
pub(crate) const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
pub(crate) const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: NorFlash> AlignedOps for T {}

const COMPARE_CHUNK_SIZE: usize = 32;

/// Drives an [`embedded_storage`] NOR flash as a [`FlashTransport`].
///
/// Programming requests narrower than the `WRITE_SIZE` of the device are padded with `0xFF`, which
/// leaves the neighbouring cells untouched. The same write unit is then programmed several times
/// between erases: by consecutive steps of an unaligned record, by neighbouring slots sharing a
/// boundary word, and by in-place updates. Hence the device has to be a [`MultiwriteNorFlash`].
/// Reads are widened to `READ_SIZE`. The bus lock is a
/// critical section so no interrupt handler can access the flash in the middle of a sequence.
pub struct NorFlashTransport<F> {
    inner: F,
    restore_state: Option<critical_section::RestoreState>,
}

impl<F> NorFlashTransport<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            restore_state: None,
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: MultiwriteNorFlash> NorFlashTransport<F> {
    fn write_padded(&mut self, offset: u32, bytes: &[u8]) -> Result<(), F::Error> {
        let offset = offset as usize;
        let start = F::align_write_floor(offset);
        let end = F::align_write_ceil(offset + bytes.len());

        if start == offset && end == offset + bytes.len() {
            return self.inner.write(offset as u32, bytes);
        }

        let mut buf = vec![0xFFu8; end - start];
        let pivot = offset - start;
        buf[pivot..pivot + bytes.len()].copy_from_slice(bytes);
        self.inner.write(start as u32, &buf)
    }
}

impl<F: ErrorType> ErrorType for NorFlashTransport<F> {
    type Error = F::Error;
}

impl<F: MultiwriteNorFlash> FlashTransport for NorFlashTransport<F> {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        let start = F::align_read_floor(offset);
        let end = F::align_read_ceil(offset + bytes.len());

        if start == offset && end == offset + bytes.len() {
            return self.inner.read(offset as u32, bytes);
        }

        let mut buf = vec![0u8; end - start];
        self.inner.read(start as u32, &mut buf)?;
        let pivot = offset - start;
        bytes.copy_from_slice(&buf[pivot..pivot + bytes.len()]);
        Ok(())
    }

    fn write_word(&mut self, offset: u32, words: &[u8]) -> Result<(), Self::Error> {
        self.write_padded(offset, words)
    }

    fn write_half_word(&mut self, offset: u32, half_word: &[u8]) -> Result<(), Self::Error> {
        self.write_padded(offset, half_word)
    }

    fn write_byte(&mut self, offset: u32, byte: u8) -> Result<(), Self::Error> {
        self.write_padded(offset, &[byte])
    }

    fn read_compare(&mut self, offset: u32, expected: &[u8]) -> Result<bool, Self::Error> {
        let mut buf = [0u8; COMPARE_CHUNK_SIZE];
        let mut offset = offset;
        for chunk in expected.chunks(COMPARE_CHUNK_SIZE) {
            let actual = &mut buf[..chunk.len()];
            self.read(offset, actual)?;
            if actual != chunk {
                return Ok(false);
            }
            offset += chunk.len() as u32;
        }
        Ok(true)
    }

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.inner.erase(from, to)
    }

    fn lock(&mut self) {
        if self.restore_state.is_none() {
            // Safety: released in `unlock`, the crate never nests bus brackets
            self.restore_state = Some(unsafe { critical_section::acquire() });
        }
    }

    fn unlock(&mut self) {
        if let Some(restore_state) = self.restore_state.take() {
            // Safety: `restore_state` was returned by the matching `acquire` in `lock`
            unsafe { critical_section::release(restore_state) }
        }
    }
}

impl<F: Crc> Crc for NorFlashTransport<F> {
    fn crc16(init: u16, data: &[u8]) -> u16 {
        F::crc16(init, data)
    }
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::Crc;

    impl Crc for FlashStorage<'_> {
        fn crc16(init: u16, data: &[u8]) -> u16 {
            // the ROM routine inverts both the seed and the result
            !esp_hal::rom::crc::crc16_be(!init, data)
        }
    }
}

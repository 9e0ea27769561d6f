#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use cycle_flash::platform::{Crc, FlashTransport};
use embedded_storage::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;

const XMODEM: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

pub fn xmodem(init: u16, data: &[u8]) -> u16 {
    let mut digest = XMODEM.digest_with_initial(init);
    digest.update(data);
    digest.finalize()
}

/// Flash bus mock recording every transport call.
#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
    pub locked: bool,
    /// Address of a byte handed out with its lowest bit flipped by the next read covering it.
    pub glitch_next_read: Option<u32>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Lock,
    Unlock,
    Read { offset: u32, len: usize },
    WriteWord { offset: u32, len: usize },
    WriteHalfWord { offset: u32 },
    WriteByte { offset: u32 },
    ReadCompare { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    /// Erased flash of `sectors` sectors starting at address 0.
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    /// Flash that was never erased, every programming attempt clashes with existing zeros.
    pub fn new_programmed(sectors: usize) -> Self {
        Self {
            buf: vec![0x00u8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            fail_after_operation,
            ..Self::new(sectors)
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    pub fn erases(&self) -> Vec<(u32, usize)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Erase { offset, len } => Some((*offset, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn record(&mut self, operation: Operation) -> Result<(), FlashError> {
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        println!("    flash: {operation:?} #{:>2}", self.operations.len());
        self.operations.push(operation);
        Ok(())
    }

    fn program(&mut self, offset: u32, bytes: &[u8]) {
        assert!(self.locked, "programming outside of a bus lock");
        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl FlashTransport for Flash {
    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(self.locked, "reading outside of a bus lock");
        self.record(Operation::Read {
            offset,
            len: bytes.len(),
        })?;

        let start = offset as usize;
        bytes.copy_from_slice(&self.buf[start..start + bytes.len()]);

        if let Some(address) = self.glitch_next_read
            && (offset..offset + bytes.len() as u32).contains(&address)
        {
            println!("    flash: glitch @{address:#x}");
            bytes[(address - offset) as usize] ^= 0x01;
            self.glitch_next_read = None;
        }
        Ok(())
    }

    fn write_word(&mut self, offset: u32, words: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(WORD_SIZE as _));
        assert!(!words.is_empty() && words.len().is_multiple_of(WORD_SIZE));
        self.record(Operation::WriteWord {
            offset,
            len: words.len(),
        })?;
        self.program(offset, words);
        Ok(())
    }

    fn write_half_word(&mut self, offset: u32, half_word: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(2));
        assert_eq!(half_word.len(), 2);
        self.record(Operation::WriteHalfWord { offset })?;
        self.program(offset, half_word);
        Ok(())
    }

    fn write_byte(&mut self, offset: u32, byte: u8) -> Result<(), Self::Error> {
        self.record(Operation::WriteByte { offset })?;
        self.program(offset, &[byte]);
        Ok(())
    }

    fn read_compare(&mut self, offset: u32, expected: &[u8]) -> Result<bool, Self::Error> {
        assert!(self.locked, "comparing outside of a bus lock");
        self.record(Operation::ReadCompare {
            offset,
            len: expected.len(),
        })?;

        let offset = offset as usize;
        Ok(self.buf[offset..offset + expected.len()] == *expected)
    }

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(self.locked, "erasing outside of a bus lock");
        assert!(from.is_multiple_of(FLASH_SECTOR_SIZE as _));
        assert!(to.is_multiple_of(FLASH_SECTOR_SIZE as _));
        self.record(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        })?;

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn lock(&mut self) {
        assert!(!self.locked, "bus locked twice");
        self.locked = true;
        self.operations.push(Operation::Lock);
    }

    fn unlock(&mut self) {
        assert!(self.locked, "bus unlocked twice");
        self.locked = false;
        self.operations.push(Operation::Unlock);
    }
}

impl Crc for Flash {
    fn crc16(init: u16, data: &[u8]) -> u16 {
        xmodem(init, data)
    }
}

/// NOR flash chip with word granular reads and writes, driven through `NorFlashTransport`.
pub struct Chip {
    pub buf: Vec<u8>,
    pub writes: Vec<(u32, usize)>,
}

impl Chip {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            writes: Vec::new(),
        }
    }
}

impl ErrorType for Chip {
    type Error = FlashError;
}

impl ReadNorFlash for Chip {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Chip {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        self.writes.push((offset, bytes.len()));

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

// programming only clears bits, so a word may be written again as long as its 1s stay 1s
impl MultiwriteNorFlash for Chip {}

impl Crc for Chip {
    fn crc16(init: u16, data: &[u8]) -> u16 {
        xmodem(init, data)
    }
}

//! Block-framed write-ahead log.
//!
//! Every mutation is appended here before it touches the memtable, so
//! an unclean shutdown can always be replayed back to the last
//! acknowledged write.
//!
//! # On-disk layout
//!
//! The file is a sequence of **32 KiB blocks**. Each block holds
//! physical records of the form:
//!
//! ```text
//! [crc32 (4 B, LE)][length (2 B, LE)][type (1 B)][payload]
//! ```
//!
//! A logical record larger than the space left in a block is split into
//! fragments: `Full` alone, or `First` → `Middle`* → `Last`. When fewer
//! than 7 bytes remain in a block the writer zero-fills them and starts
//! the next record on a fresh block boundary, so a reader can always
//! locate headers by block arithmetic.
//!
//! # Checksums
//!
//! The writer stores a CRC32 over `type ‖ payload`. The reader verifies
//! only when the stored value is non-zero, staying compatible with logs
//! written by implementations that leave the field blank.
//!
//! # Failure semantics
//!
//! A torn write at the tail of the file — a header or payload cut short
//! by a crash — terminates replay silently: the record was never
//! acknowledged. Corruption *before* the tail (bad fragment type, CRC
//! mismatch, impossible fragment sequence) is fatal.


use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, trace};

/// Size of one log block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Size of a physical record header: crc (4) + length (2) + type (1).
pub const HEADER_SIZE: usize = 7;

/// Largest payload a single physical record can carry.
const MAX_FRAGMENT: usize = BLOCK_SIZE - HEADER_SIZE;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by log operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log is structurally damaged before its tail.
    #[error("log corruption: {0}")]
    Corruption(String),
}

// ------------------------------------------------------------------------------------------------
// Fragment types
// ------------------------------------------------------------------------------------------------

const FULL: u8 = 1;
const FIRST: u8 = 2;
const MIDDLE: u8 = 3;
const LAST: u8 = 4;

fn fragment_crc(ftype: u8, payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(&[ftype]);
    hasher.update(payload);
    hasher.finalize()
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends logical records to a fresh log file.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    /// Byte offset within the current 32 KiB block.
    block_offset: usize,
    /// Force durability after every record.
    sync: bool,
}

impl LogWriter {
    /// Creates (truncating) the log file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), sync, "log created");
        Ok(Self {
            file,
            path,
            block_offset: 0,
            sync,
        })
    }

    /// Appends one logical record, fragmenting across blocks as needed.
    ///
    /// The data is handed to the operating system before returning;
    /// with `sync` enabled it is also forced to stable storage.
    pub fn add_record(&mut self, data: &[u8]) -> Result<(), WalError> {
        let mut rest = data;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Zero-fill the trailer and open a new block.
                if leftover > 0 {
                    self.file.write_all(&[0u8; HEADER_SIZE - 1][..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = rest.len().min(avail);
            let end = fragment_len == rest.len();
            let ftype = match (begin, end) {
                (true, true) => FULL,
                (true, false) => FIRST,
                (false, true) => LAST,
                (false, false) => MIDDLE,
            };

            self.emit_physical_record(ftype, &rest[..fragment_len])?;
            rest = &rest[fragment_len..];
            begin = false;
            if rest.is_empty() {
                break;
            }
        }

        if self.sync {
            self.file.sync_all()?;
        }
        trace!(len = data.len(), "log record appended");
        Ok(())
    }

    /// Forces all appended records to stable storage.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn emit_physical_record(&mut self, ftype: u8, payload: &[u8]) -> Result<(), WalError> {
        debug_assert!(payload.len() <= MAX_FRAGMENT);
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&fragment_crc(ftype, payload).to_le_bytes());
        header[4] = (payload.len() & 0xFF) as u8;
        header[5] = (payload.len() >> 8) as u8;
        header[6] = ftype;

        self.file.write_all(&header)?;
        self.file.write_all(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.file.sync_all() {
            error!(path = %self.path.display(), error = %e, "log sync failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Sequentially reassembles logical records from a log file.
pub struct LogReader {
    file: File,
    /// Absolute file offset of the next unread byte.
    offset: u64,
}

impl LogReader {
    /// Opens the log at `path` for replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let file = File::open(path)?;
        Ok(Self { file, offset: 0 })
    }

    /// Returns the next logical record, or `None` at end of stream.
    ///
    /// A record torn by a crash at the tail of the file also yields
    /// `None`; corruption earlier in the stream is an error.
    pub fn read_next_record(&mut self) -> Result<Option<Vec<u8>>, WalError> {
        let mut assembled: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            let mut block_left = BLOCK_SIZE as u64 - (self.offset % BLOCK_SIZE as u64);
            if block_left < HEADER_SIZE as u64 {
                // Zero-filled trailer; records restart at the block boundary.
                self.offset += block_left;
                block_left = BLOCK_SIZE as u64;
            }

            let mut header = [0u8; HEADER_SIZE];
            if !self.read_exact_at(self.offset, &mut header)? {
                // Clean or torn end of file: either way, end of stream.
                return Ok(None);
            }

            let stored_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = usize::from(header[4]) | (usize::from(header[5]) << 8);
            let ftype = header[6];

            if !(FULL..=LAST).contains(&ftype) {
                return Err(WalError::Corruption(format!(
                    "unknown fragment type {ftype} at offset {}",
                    self.offset
                )));
            }
            if HEADER_SIZE + length > block_left as usize {
                return Err(WalError::Corruption(format!(
                    "fragment length {length} overruns block at offset {}",
                    self.offset
                )));
            }

            let mut payload = vec![0u8; length];
            if !self.read_exact_at(self.offset + HEADER_SIZE as u64, &mut payload)? {
                trace!(offset = self.offset, "torn fragment at end of log");
                return Ok(None);
            }
            self.offset += (HEADER_SIZE + length) as u64;

            // A zero checksum marks an unchecked record.
            if stored_crc != 0 && stored_crc != fragment_crc(ftype, &payload) {
                return Err(WalError::Corruption(format!(
                    "checksum mismatch at offset {}",
                    self.offset
                )));
            }

            match ftype {
                FULL => {
                    if in_fragmented_record {
                        return Err(WalError::Corruption(
                            "full fragment inside fragmented record".into(),
                        ));
                    }
                    return Ok(Some(payload));
                }
                FIRST => {
                    if in_fragmented_record {
                        return Err(WalError::Corruption(
                            "first fragment inside fragmented record".into(),
                        ));
                    }
                    in_fragmented_record = true;
                    assembled = payload;
                }
                MIDDLE => {
                    if !in_fragmented_record {
                        return Err(WalError::Corruption(
                            "middle fragment without first".into(),
                        ));
                    }
                    assembled.extend_from_slice(&payload);
                }
                LAST => {
                    if !in_fragmented_record {
                        return Err(WalError::Corruption("last fragment without first".into()));
                    }
                    assembled.extend_from_slice(&payload);
                    return Ok(Some(assembled));
                }
                _ => unreachable!("fragment type validated above"),
            }
        }
    }

    /// Reads exactly `buf.len()` bytes at `offset`; `false` on EOF.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<bool, WalError> {
        self.file.seek(SeekFrom::Start(offset))?;
        match self.file.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(WalError::Io(e)),
        }
    }
}

//! Value Log (vLog) Module
//!
//! The value log is a single **append-only** file holding every value byte
//! the store has ever written; SSTs keep only `(key, offset, length)`
//! pointers into it. Space is reclaimed from the front by punching
//! filesystem holes, so the file's logical length only ever grows while its
//! allocated blocks shrink.
//!
//! # On-disk layout
//!
//! A stream of variable-length frames:
//!
//! ```text
//! [MAGIC(1)][CHECKSUM(2 LE)][KEY(8 LE)][VLEN(4 LE)][VALUE bytes…]
//! [MAGIC(1)][CHECKSUM(2 LE)][KEY(8 LE)][VLEN(4 LE)][VALUE bytes…]
//! ...
//! ```
//!
//! - **Magic** — [`VLOG_MAGIC`] (`0xFF`), marks the start of a frame.
//! - **Checksum** — 16-bit checksum over `key ‖ vlen ‖ value`
//!   ([`crate::checksum::checksum16`]).
//! - The fixed prefix is [`VLOG_PREFIX`] (15) bytes.
//!
//! # Live region
//!
//! Two offsets bound the live bytes:
//!
//! - `tail` — first live byte; everything below it has been hole-punched.
//! - `head` — end of the file; appends happen here.
//!
//! Invariant: `0 ≤ tail ≤ head`.
//!
//! # Recovery
//!
//! Holes are punched on filesystem-block boundaries, so after a restart the
//! first allocated byte (found via `lseek(SEEK_DATA)`) may sit mid-frame
//! inside arbitrary garbage. [`VLog::open`] therefore hunts forward for a
//! magic byte, reads the candidate frame, and recomputes its checksum: a
//! match marks the first live record; a mismatch skips the candidate
//! (`15 + vlen` bytes) and resumes the hunt. Torn trailing writes from a
//! crash fail the checksum the same way and are excluded from the live
//! region.
//!
//! # Guarantees
//!
//! - **Append-only** — frames are never mutated in place.
//! - **Torn-write safety** — recovery trusts nothing between holes and the
//!   first checksum-valid frame.
//! - **Steady-state integrity** — a referenced frame that fails its
//!   checksum is reported as [`VlogError::Corrupt`]; the engine is the sole
//!   writer, so this indicates external damage.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::checksum::checksum16;
use crate::encoding::{Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Frame marker byte.
pub const VLOG_MAGIC: u8 = 0xFF;

/// Fixed frame prefix: magic(1) + checksum(2) + key(8) + vlen(4).
pub const VLOG_PREFIX: u64 = 15;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by value-log operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VlogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A referenced frame failed its magic or checksum validation.
    #[error("corrupt value-log frame at offset {offset}")]
    Corrupt {
        /// Byte offset of the damaged frame.
        offset: u64,
    },

    /// Hole punching is unsupported or failed on this filesystem.
    #[error("hole punch failed: {0}")]
    PunchFailed(io::Error),
}

// ------------------------------------------------------------------------------------------------
// Frame prefix
// ------------------------------------------------------------------------------------------------

/// The decoded 15-byte frame prefix.
struct FramePrefix {
    magic: u8,
    checksum: u16,
    key: u64,
    vlen: u32,
}

impl Encode for FramePrefix {
    fn encode_to(&self, buf: &mut Vec<u8>) {
        self.magic.encode_to(buf);
        self.checksum.encode_to(buf);
        self.key.encode_to(buf);
        self.vlen.encode_to(buf);
    }
}

impl Decode for FramePrefix {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (checksum, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let (key, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (vlen, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                checksum,
                key,
                vlen,
            },
            off,
        ))
    }
}

/// A fully decoded, checksum-verified frame, as yielded to the GC walk.
#[derive(Debug)]
pub struct VlogRecord {
    /// Key stored in the frame.
    pub key: u64,

    /// Value payload.
    pub value: Vec<u8>,
}

impl VlogRecord {
    /// Total on-disk length of the frame.
    pub fn frame_len(&self) -> u64 {
        VLOG_PREFIX + self.value.len() as u64
    }
}

// ------------------------------------------------------------------------------------------------
// VLog Core
// ------------------------------------------------------------------------------------------------

/// The append-only value log.
///
/// See the [module-level documentation](self) for format and guarantees.
pub struct VLog {
    /// Open read/write handle.
    file: File,

    /// Path to the log file on disk.
    path: PathBuf,

    /// End offset; appends happen here.
    head: u64,

    /// First live byte; everything below has been reclaimed.
    tail: u64,
}

impl VLog {
    /// Opens (or creates) the value log and recovers its live region.
    ///
    /// For an existing non-empty file this probes the first allocated byte
    /// with `SEEK_DATA` and runs the checksum scan described in the module
    /// docs to position `tail` at the first live frame.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VlogError> {
        let path_ref = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path_ref)?;

        let head = file.metadata()?.len();

        let mut vlog = Self {
            file,
            path: path_ref.to_path_buf(),
            head,
            tail: 0,
        };

        if head > 0 {
            vlog.recover()?;
        }

        info!(
            path = %path_ref.display(),
            head = vlog.head,
            tail = vlog.tail,
            "value log opened"
        );

        Ok(vlog)
    }

    /// Appends one frame and returns its starting offset.
    pub fn append(&mut self, key: u64, value: &[u8]) -> Result<u64, VlogError> {
        let offset = self.head;
        let vlen = value.len() as u32;

        let prefix = FramePrefix {
            magic: VLOG_MAGIC,
            checksum: checksum16(key, vlen, value),
            key,
            vlen,
        };

        let mut frame = Vec::with_capacity(VLOG_PREFIX as usize + value.len());
        prefix.encode_to(&mut frame);
        frame.extend_from_slice(value);

        self.file.write_all_at(&frame, offset)?;
        self.head += frame.len() as u64;

        trace!(offset, key, vlen, "value log frame appended");
        Ok(offset)
    }

    /// Reads the value payload of the frame starting at `offset`.
    ///
    /// `vlen` comes from the caller's SST index entry. The frame's magic
    /// byte and checksum are re-verified; a mismatch on a referenced frame
    /// is fatal ([`VlogError::Corrupt`]).
    pub fn read_value(&self, offset: u64, vlen: u32) -> Result<Vec<u8>, VlogError> {
        let mut frame = vec![0u8; VLOG_PREFIX as usize + vlen as usize];
        self.file.read_exact_at(&mut frame, offset)?;

        let (prefix, _) = FramePrefix::decode_from(&frame)?;
        let value = frame.split_off(VLOG_PREFIX as usize);

        if prefix.magic != VLOG_MAGIC
            || prefix.vlen != vlen
            || prefix.checksum != checksum16(prefix.key, prefix.vlen, &value)
        {
            return Err(VlogError::Corrupt { offset });
        }

        Ok(value)
    }

    /// Reads the whole frame starting at `offset`, for the GC walk.
    ///
    /// Returns `Ok(None)` when `offset` is at or past the head, or when the
    /// byte at `offset` is not a frame marker (the walk has left the frame
    /// stream). A marker followed by a bad checksum is fatal — in steady
    /// state the region `[tail, head)` contains only intact frames.
    pub fn record_at(&self, offset: u64) -> Result<Option<VlogRecord>, VlogError> {
        if offset >= self.head {
            return Ok(None);
        }

        let mut magic = [0u8; 1];
        self.file.read_exact_at(&mut magic, offset)?;
        if magic[0] != VLOG_MAGIC {
            return Ok(None);
        }

        let mut prefix_bytes = [0u8; VLOG_PREFIX as usize];
        self.file.read_exact_at(&mut prefix_bytes, offset)?;
        let (prefix, _) = FramePrefix::decode_from(&prefix_bytes)?;

        let mut value = vec![0u8; prefix.vlen as usize];
        self.file.read_exact_at(&mut value, offset + VLOG_PREFIX)?;

        if prefix.checksum != checksum16(prefix.key, prefix.vlen, &value) {
            return Err(VlogError::Corrupt { offset });
        }

        Ok(Some(VlogRecord {
            key: prefix.key,
            value,
        }))
    }

    /// Current logical end of the log.
    pub fn end_offset(&self) -> u64 {
        self.head
    }

    /// First live byte of the log.
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fsyncs the log.
    ///
    /// Called before any SST referencing appended frames is written, so
    /// that an SST never points at bytes the log might lose.
    pub fn sync(&self) -> Result<(), VlogError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Deallocates `[offset, offset + len)` and advances the tail.
    ///
    /// The file's logical length is preserved (`FALLOC_FL_KEEP_SIZE`); only
    /// the underlying blocks are released.
    pub fn punch_hole(&mut self, offset: u64, len: u64) -> Result<(), VlogError> {
        if len == 0 {
            return Ok(());
        }

        let ret = unsafe {
            libc::fallocate(
                self.file.as_raw_fd(),
                libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE,
                offset as libc::off_t,
                len as libc::off_t,
            )
        };
        if ret != 0 {
            return Err(VlogError::PunchFailed(io::Error::last_os_error()));
        }

        self.tail = offset + len;
        debug!(offset, len, tail = self.tail, "value log hole punched");
        Ok(())
    }

    /// Lowest offset whose filesystem block is still allocated.
    ///
    /// Returns the head when the whole file is a hole (or empty).
    fn seek_first_live(&self) -> Result<u64, VlogError> {
        let ret = unsafe { libc::lseek(self.file.as_raw_fd(), 0, libc::SEEK_DATA) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // ENXIO: no data region at or after offset 0 — fully punched.
            if err.raw_os_error() == Some(libc::ENXIO) {
                return Ok(self.head);
            }
            return Err(VlogError::Io(err));
        }
        Ok(ret as u64)
    }

    /// Positions `tail` at the first checksum-valid frame.
    ///
    /// See the module docs for the scan rationale. Sets `tail = head` when
    /// no live frame remains.
    fn recover(&mut self) -> Result<(), VlogError> {
        let mut pos = self.seek_first_live()?;
        debug!(first_live = pos, head = self.head, "value log recovery scan");

        while pos < self.head {
            let mut byte = [0u8; 1];
            self.file.read_exact_at(&mut byte, pos)?;
            if byte[0] != VLOG_MAGIC {
                pos += 1;
                continue;
            }

            // Candidate frame. If its prefix or payload would run past the
            // head, nothing after this point can be a complete frame.
            if pos + VLOG_PREFIX > self.head {
                break;
            }

            let mut prefix_bytes = [0u8; VLOG_PREFIX as usize];
            self.file.read_exact_at(&mut prefix_bytes, pos)?;
            let (prefix, _) = FramePrefix::decode_from(&prefix_bytes)?;

            let frame_end = pos + VLOG_PREFIX + prefix.vlen as u64;
            if frame_end > self.head {
                break;
            }

            let mut value = vec![0u8; prefix.vlen as usize];
            self.file.read_exact_at(&mut value, pos + VLOG_PREFIX)?;

            if prefix.checksum == checksum16(prefix.key, prefix.vlen, &value) {
                self.tail = pos;
                info!(tail = self.tail, head = self.head, "value log recovered");
                return Ok(());
            }

            // Torn or stale candidate — skip it wholesale and resume.
            warn!(offset = pos, vlen = prefix.vlen, "skipping invalid frame candidate");
            pos = frame_end;
        }

        // No live frame: the log is fully reclaimed or all-torn.
        self.tail = self.head;
        info!(head = self.head, "value log recovered with no live frames");
        Ok(())
    }
}

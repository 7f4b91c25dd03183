//! Named POSIX shared-memory segments with creator/attacher lifecycle.
//!
//! One process creates each named region and is the only one allowed to
//! unlink it on shutdown; every other process attaches to the existing name
//! with a bounded retry loop to tolerate startup races. Dropping a segment
//! closes the mapping but never removes the name.

use crate::{TransportError, TransportResult};
use memmap2::MmapMut;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use std::fs::File;
use std::ptr;
use std::thread;
use std::time::Duration;

/// Role a process plays for one named segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentRole {
    /// This process created the region and must unlink it on shutdown.
    Creator,
    /// This process opened an existing region and must only close it.
    Attacher,
}

/// A mapped POSIX shared-memory object.
///
/// The mapping stays valid for the lifetime of the value. `Drop` closes the
/// file descriptor and unmaps; the name is removed only through
/// [`SharedSegment::unlink`], which is rejected for attachers.
#[derive(Debug)]
pub struct SharedSegment {
    name: String,
    map: MmapMut,
    len: usize,
    role: SegmentRole,
    unlinked: bool,
}

impl SharedSegment {
    /// Creates a named region of exactly `len` bytes, zero-initialized.
    ///
    /// If the name already exists with the same size the region is reused and
    /// re-zeroed (leftover from an unclean shutdown); a size mismatch is
    /// fatal because writer and reader would disagree on the layout.
    pub fn create(name: &str, len: usize) -> TransportResult<Self> {
        let path = shm_path(name)?;

        let fd = match shm_open(
            path.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => fd,
            Err(Errno::EEXIST) => {
                let fd = shm_open(path.as_str(), OFlag::O_RDWR, Mode::empty())
                    .map_err(|e| os_err(name, e))?;
                let file = File::from(fd);
                let existing = file.metadata().map_err(|e| io_err(name, e))?.len() as usize;
                if existing != len {
                    return Err(TransportError::SizeMismatch {
                        name: name.to_string(),
                        existing,
                        expected: len,
                    });
                }
                log::warn!("reusing stale shared memory '{name}' ({len} bytes)");
                let mut seg = Self::map_file(name, file, len, SegmentRole::Creator)?;
                seg.zero();
                return Ok(seg);
            }
            Err(e) => return Err(os_err(name, e)),
        };

        let file = File::from(fd);
        file.set_len(len as u64).map_err(|e| io_err(name, e))?;
        Self::map_file(name, file, len, SegmentRole::Creator)
    }

    /// Opens an existing named region, retrying while the creator starts up.
    ///
    /// Makes `retry_count + 1` open attempts spaced `retry_delay` apart, then
    /// fails with [`TransportError::AttachTimeout`]. The region's size must
    /// equal `len` exactly.
    pub fn attach(
        name: &str,
        len: usize,
        retry_count: u32,
        retry_delay: Duration,
    ) -> TransportResult<Self> {
        let path = shm_path(name)?;
        let attempts = retry_count.saturating_add(1);

        for attempt in 0..attempts {
            match shm_open(path.as_str(), OFlag::O_RDWR, Mode::empty()) {
                Ok(fd) => {
                    let file = File::from(fd);
                    let existing = file.metadata().map_err(|e| io_err(name, e))?.len() as usize;
                    if existing != len {
                        return Err(TransportError::SizeMismatch {
                            name: name.to_string(),
                            existing,
                            expected: len,
                        });
                    }
                    return Self::map_file(name, file, len, SegmentRole::Attacher);
                }
                Err(Errno::ENOENT) => {
                    if attempt + 1 < attempts {
                        thread::sleep(retry_delay);
                    }
                }
                Err(e) => return Err(os_err(name, e)),
            }
        }

        Err(TransportError::AttachTimeout {
            name: name.to_string(),
            attempts,
        })
    }

    fn map_file(name: &str, file: File, len: usize, role: SegmentRole) -> TransportResult<Self> {
        // SAFETY: the fd refers to a shm object of at least `len` bytes; the
        // mapping is dropped before the File, and all concurrent access goes
        // through the seqlock protocol layered above.
        let map = unsafe { memmap2::MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|e| io_err(name, e))?;
        Ok(Self {
            name: name.to_string(),
            map,
            len,
            role,
            unlinked: false,
        })
    }

    fn zero(&mut self) {
        // SAFETY: the mapping spans `len` writable bytes.
        unsafe { ptr::write_bytes(self.map.as_mut_ptr(), 0, self.len) };
    }

    /// Removes the name from the system. Creator-only; attachers get
    /// [`TransportError::NotCreator`]. Idempotent for the creator.
    pub fn unlink(&mut self) -> TransportResult<()> {
        if self.role != SegmentRole::Creator {
            return Err(TransportError::NotCreator {
                name: self.name.clone(),
            });
        }
        if self.unlinked {
            return Ok(());
        }
        let path = shm_path(&self.name)?;
        shm_unlink(path.as_str()).map_err(|e| os_err(&self.name, e))?;
        self.unlinked = true;
        Ok(())
    }

    /// Removes a name without holding a segment, ignoring a missing object.
    ///
    /// Used by the launcher to clear leftovers of an unclean shutdown before
    /// spawning the pipeline.
    pub fn force_unlink(name: &str) -> TransportResult<bool> {
        let path = shm_path(name)?;
        match shm_unlink(path.as_str()) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(os_err(name, e)),
        }
    }

    /// Name the segment was created or attached under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total mapped size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the mapping has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Role this process plays for the segment.
    pub fn role(&self) -> SegmentRole {
        self.role
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }
}

fn shm_path(name: &str) -> TransportResult<String> {
    if name.is_empty() || name.contains('/') {
        return Err(TransportError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(format!("/{name}"))
}

fn os_err(name: &str, errno: Errno) -> TransportError {
    TransportError::Os {
        name: name.to_string(),
        source: std::io::Error::from(errno),
    }
}

fn io_err(name: &str, source: std::io::Error) -> TransportError {
    TransportError::Os {
        name: name.to_string(),
        source,
    }
}

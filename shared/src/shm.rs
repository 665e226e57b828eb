//! Named shared-memory buffers for zero-copy image hand-off.
//!
//! The producer creates a uniquely named POSIX segment, copies pixel bytes
//! in, and ships only the name over the wire. The receiver opens the same
//! name, copies the bytes out into storage it owns, then closes and unlinks.
//!
//! Ownership rule: exactly one party unlinks a given name. The receiver
//! unlinks after a successful copy-out; the producer unlinks only when the
//! segment was never delivered (dropped publish, send failure, timeout).
//! Closing a handle never removes the name.
//!
//! The buffer exposes a raw byte view. Shape and dtype reinterpretation is
//! the caller's responsibility.

use std::fs::File;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;
use memmap2::MmapMut;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use crate::errors::BufferError;

/// Process-local sequence for name uniqueness within one nanosecond tick.
static NAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// Mapped handle to a named shared-memory segment.
///
/// Dropping the buffer unmaps the view and closes the descriptor without
/// touching the OS name; removal is an explicit `unlink` call.
#[derive(Debug)]
pub struct SharedMemoryBuffer {
    name: String,
    map: MmapMut,
}

impl SharedMemoryBuffer {
    /// Create and map a new segment of `size` bytes.
    ///
    /// # Errors
    /// `AlreadyExists` when the name is taken, `OutOfMemory` when the OS
    /// refuses to size the segment, `InvalidSize` for zero-length requests.
    pub fn create(name: &str, size: usize) -> Result<Self, BufferError> {
        if size == 0 {
            return Err(BufferError::InvalidSize { name: name.to_string() });
        }

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|errno| match errno {
            Errno::EEXIST => BufferError::AlreadyExists { name: name.to_string() },
            other => os_error(name, other),
        })?;

        let file = File::from(fd);
        if let Err(e) = file.set_len(size as u64) {
            // The name is linked but unusable; remove it before surfacing.
            let _ = shm_unlink(name);
            return Err(match e.raw_os_error().map(Errno::from_raw) {
                Some(Errno::ENOMEM) | Some(Errno::ENOSPC) => {
                    BufferError::OutOfMemory { name: name.to_string(), size }
                }
                _ => BufferError::Io { name: name.to_string(), source: e },
            });
        }

        // SAFETY: the segment was just created with exclusive ownership and
        // sized above; no other mapping of this name exists yet.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
            let _ = shm_unlink(name);
            BufferError::Io { name: name.to_string(), source: e }
        })?;

        debug!("created shared memory `{name}` ({size} bytes)");
        Ok(SharedMemoryBuffer { name: name.to_string(), map })
    }

    /// Open and map an existing segment by name.
    ///
    /// # Errors
    /// `NotFound` when no segment is linked under `name`.
    pub fn open(name: &str) -> Result<Self, BufferError> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|errno| match errno {
            Errno::ENOENT => BufferError::NotFound { name: name.to_string() },
            other => os_error(name, other),
        })?;

        let file = File::from(fd);
        let len = file
            .metadata()
            .map_err(|e| BufferError::Io { name: name.to_string(), source: e })?
            .len();
        if len == 0 {
            return Err(BufferError::InvalidSize { name: name.to_string() });
        }

        // SAFETY: mapping a segment the producer has finished writing; the
        // hand-off protocol guarantees no concurrent writer at this point.
        let map = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| BufferError::Io { name: name.to_string(), source: e })?;

        debug!("opened shared memory `{name}` ({len} bytes)");
        Ok(SharedMemoryBuffer { name: name.to_string(), map })
    }

    /// Remove a name from the OS namespace. Idempotent: unlinking a name
    /// that is already gone is not an error.
    pub fn unlink(name: &str) -> Result<(), BufferError> {
        match shm_unlink(name) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(errno) => Err(os_error(name, errno)),
        }
    }

    /// OS name of this segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Raw byte view of the segment.
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Mutable byte view, used by the producer to copy pixels in.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

/// Build a unique segment name: viewer prefix, origin id (pid plus a
/// process-local sequence), and a nanosecond timestamp.
pub fn unique_name(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = NAME_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("/{prefix}{}-{seq}_{nanos}", process::id())
}

fn os_error(name: &str, errno: Errno) -> BufferError {
    BufferError::Io {
        name: name.to_string(),
        source: std::io::Error::from_raw_os_error(errno as i32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_open_read_unlink() {
        let name = unique_name("test_");
        let mut created = SharedMemoryBuffer::create(&name, 16).unwrap();
        created.bytes_mut().copy_from_slice(&[7u8; 16]);
        drop(created);

        let opened = SharedMemoryBuffer::open(&name).unwrap();
        assert_eq!(opened.len(), 16);
        assert_eq!(opened.bytes(), &[7u8; 16]);
        drop(opened);

        SharedMemoryBuffer::unlink(&name).unwrap();
        assert!(matches!(
            SharedMemoryBuffer::open(&name).unwrap_err(),
            BufferError::NotFound { .. }
        ));
    }

    #[test]
    fn create_refuses_existing_name() {
        let name = unique_name("test_");
        let first = SharedMemoryBuffer::create(&name, 8).unwrap();
        assert!(matches!(
            SharedMemoryBuffer::create(&name, 8).unwrap_err(),
            BufferError::AlreadyExists { .. }
        ));
        drop(first);
        SharedMemoryBuffer::unlink(&name).unwrap();
    }

    #[test]
    fn unlink_is_idempotent() {
        let name = unique_name("test_");
        let buf = SharedMemoryBuffer::create(&name, 8).unwrap();
        drop(buf);
        SharedMemoryBuffer::unlink(&name).unwrap();
        SharedMemoryBuffer::unlink(&name).unwrap();
    }

    #[test]
    fn zero_size_is_rejected() {
        let name = unique_name("test_");
        assert!(matches!(
            SharedMemoryBuffer::create(&name, 0).unwrap_err(),
            BufferError::InvalidSize { .. }
        ));
    }

    #[test]
    fn unique_names_do_not_collide() {
        let a = unique_name("test_");
        let b = unique_name("test_");
        assert_ne!(a, b);
        assert!(a.starts_with("/test_"));
    }
}

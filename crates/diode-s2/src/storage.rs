//! Decapsulator's secure writer: atomic durable storage.
//!
//! Generalizes `Storage`'s trait-per-backend split down to the one operation
//! this gateway needs — persist a payload once, never mutate it — so tests
//! can substitute an in-memory fake while production uses [`FileStorage`]'s
//! temp-then-rename write.

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;

/// Errors [`Storage`] operations can raise. Both variants are drop-plus-log
/// at the call site; neither crashes the decapsulator.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The filesystem reported `ENOSPC` or an equivalent disk-full
    /// condition.
    #[error("disk full")]
    DiskFull,

    /// Any other I/O failure while writing or syncing.
    #[error("storage io error: {0}")]
    Io(String),
}

/// Durable storage for accepted payloads.
pub trait Storage: Send + Sync + 'static {
    /// Writes `payload` under `file_stem` (the caller has already computed
    /// `data_<wall_ms>_<unique>_<src_port>`; this trait only owns the I/O,
    /// not the naming scheme) using the atomic temp-then-rename pattern.
    fn write_payload(&self, file_stem: &str, payload: &[u8]) -> Result<(), StorageError>;

    /// Waits for all in-flight writes to complete and issues a filesystem
    /// sync. Called by the supervisor during graceful shutdown.
    fn flush_buffers(&self) -> Result<(), StorageError>;
}

/// Builds the file stem (without extension) for a stored payload:
/// `data_<wall_ms>_<unique>_<src_port>`. `unique` must come from a
/// process-wide monotonic source (see [`UniqueIdGenerator`]); `wall_ms` is
/// purely informational and may regress.
#[must_use]
pub fn build_file_stem(wall_clock_millis: u64, unique: u64, src_port: u16) -> String {
    format!("data_{wall_clock_millis}_{unique}_{src_port}")
}

/// A process-wide monotonic counter for the `unique` component of stored
/// file names. Strictly increasing and never repeating within a process
/// lifetime, independent of wall-clock.
#[derive(Debug, Default)]
pub struct UniqueIdGenerator {
    next: AtomicU64,
}

impl UniqueIdGenerator {
    /// Creates a generator starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id in the sequence.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Production [`Storage`] backed by the local filesystem.
///
/// Writes go to `<file_stem>.dat.tmp` then are renamed to `<file_stem>.dat`.
/// A `.tmp` file left behind by a crash mid-write is never durable under its
/// final name and is safe for a future startup pass to delete.
pub struct FileStorage {
    data_dir: PathBuf,
    in_flight: std::sync::atomic::AtomicUsize,
}

impl FileStorage {
    /// Opens storage rooted at `data_dir`. Does not validate writability;
    /// callers should have already done so via [`diode_core::config::Config::validate`].
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), in_flight: std::sync::atomic::AtomicUsize::new(0) }
    }

    fn tmp_path(&self, file_stem: &str) -> PathBuf {
        self.data_dir.join(format!("{file_stem}.dat.tmp"))
    }

    fn final_path(&self, file_stem: &str) -> PathBuf {
        self.data_dir.join(format!("{file_stem}.dat"))
    }
}

impl Storage for FileStorage {
    fn write_payload(&self, file_stem: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = (|| {
            let tmp = self.tmp_path(file_stem);
            let target = self.final_path(file_stem);

            write_with_create_new(&tmp, payload).map_err(classify_io_error)?;

            if let Err(err) = std::fs::rename(&tmp, &target) {
                let _ = std::fs::remove_file(&tmp);
                return Err(classify_io_error(err));
            }

            Ok(())
        })();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn flush_buffers(&self) -> Result<(), StorageError> {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let dir = std::fs::File::open(&self.data_dir).map_err(classify_io_error)?;
        dir.sync_all().map_err(classify_io_error)
    }
}

fn write_with_create_new(path: &Path, payload: &[u8]) -> io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

fn classify_io_error(err: io::Error) -> StorageError {
    if err.raw_os_error() == Some(libc::ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(err.to_string())
    }
}

/// Deletes any leftover `.dat.tmp` files in `data_dir`. A `.tmp` file is
/// always an incomplete write from a prior run and safe to delete on start.
pub fn clean_stale_temp_files(data_dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(data_dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".dat.tmp") {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

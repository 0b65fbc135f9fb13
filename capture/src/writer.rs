//! Destination file handling.
//!
//! The dump file is created (or truncated) before the capture starts, written
//! exactly once for triage dumps, and removed again whenever the run fails so
//! no half-written dump is left behind.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    HandleValue,
    error::{CaptureError, Result},
    options::CaptureMode,
};

/// Where dump files live.
pub trait DumpStorage {
    type Sink: Write;

    /// Create `path` for exclusive synchronous writing, replacing any existing file.
    fn create(&self, path: &Path, mode: CaptureMode) -> io::Result<Self::Sink>;

    /// Raw handle of `sink`, for the kernel to write to.
    fn raw_handle(&self, sink: &Self::Sink) -> HandleValue;

    /// Flush `sink` to stable storage.
    fn sync(&self, sink: &Self::Sink) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

impl<S: DumpStorage + ?Sized> DumpStorage for &S {
    type Sink = S::Sink;

    fn create(&self, path: &Path, mode: CaptureMode) -> io::Result<Self::Sink> {
        (**self).create(path, mode)
    }

    fn raw_handle(&self, sink: &Self::Sink) -> HandleValue {
        (**self).raw_handle(sink)
    }

    fn sync(&self, sink: &Self::Sink) -> io::Result<()> {
        (**self).sync(sink)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        (**self).remove(path)
    }
}

/// Dump files on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorage;

impl FileStorage {
    /// Open options for `mode`.
    ///
    /// Triage output is written from an arbitrary length buffer, so it must go
    /// through the cache. The kernel writes live dumps itself and requires
    /// unbuffered write-through I/O on the handle it is given.
    pub fn open_options(mode: CaptureMode) -> OpenOptions {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);

        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;
            use windows_sys::Win32::Storage::FileSystem::{
                FILE_ATTRIBUTE_NORMAL, FILE_FLAG_NO_BUFFERING, FILE_FLAG_WRITE_THROUGH,
            };

            options.share_mode(0);
            match mode {
                CaptureMode::Triage => options.attributes(FILE_ATTRIBUTE_NORMAL),
                CaptureMode::Kernel => {
                    options.custom_flags(FILE_FLAG_WRITE_THROUGH | FILE_FLAG_NO_BUFFERING)
                }
            };
        }
        #[cfg(not(windows))]
        let _ = mode;

        options
    }
}

impl DumpStorage for FileStorage {
    type Sink = File;

    fn create(&self, path: &Path, mode: CaptureMode) -> io::Result<File> {
        Self::open_options(mode).open(path)
    }

    fn raw_handle(&self, sink: &File) -> HandleValue {
        raw_file_handle(sink)
    }

    fn sync(&self, sink: &File) -> io::Result<()> {
        sink.sync_all()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[cfg(windows)]
fn raw_file_handle(file: &File) -> HandleValue {
    use std::os::windows::io::AsRawHandle;
    HandleValue(file.as_raw_handle() as usize)
}

#[cfg(unix)]
fn raw_file_handle(file: &File) -> HandleValue {
    use std::os::unix::io::AsRawFd;
    HandleValue(file.as_raw_fd() as usize)
}

/// An open destination file.
#[derive(Debug)]
pub struct DumpFile<W> {
    sink: W,
    path: PathBuf,
    mode: CaptureMode,
}

impl<W> DumpFile<W> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }
}

/// Opens, writes and finalizes dump files on a [`DumpStorage`].
pub struct DumpWriter<S> {
    storage: S,
}

impl<S: DumpStorage> DumpWriter<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn open(&self, path: &Path, mode: CaptureMode) -> Result<DumpFile<S::Sink>> {
        let sink = self
            .storage
            .create(path, mode)
            .map_err(|source| CaptureError::FileCreate {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Created {mode} dump file '{}'", path.display());
        Ok(DumpFile {
            sink,
            path: path.to_path_buf(),
            mode,
        })
    }

    pub fn raw_handle(&self, file: &DumpFile<S::Sink>) -> HandleValue {
        self.storage.raw_handle(&file.sink)
    }

    /// Write `data` with a single write call starting at offset 0.
    pub fn write_triage(&self, file: &mut DumpFile<S::Sink>, data: &[u8]) -> Result<()> {
        write_once(&mut file.sink, data).map_err(|e| match e {
            WriteOnceError::Short { expected, written } => {
                CaptureError::ShortWrite { expected, written }
            }
            WriteOnceError::Io(source) => CaptureError::FileWrite {
                path: file.path.clone(),
                source,
            },
        })
    }

    /// Close `file`, keeping it only if the run `succeeded`.
    ///
    /// A kept file is flushed to stable storage first; if that fails the file
    /// is removed and the error returned. Removal failures are logged.
    pub fn finalize(&self, file: DumpFile<S::Sink>, succeeded: bool) -> Result<()> {
        let DumpFile { mut sink, path, .. } = file;

        let flushed = if succeeded {
            sink.flush()
                .and_then(|()| self.storage.sync(&sink))
                .map_err(|source| CaptureError::FileWrite {
                    path: path.clone(),
                    source,
                })
        } else {
            Ok(())
        };
        drop(sink);

        if !succeeded || flushed.is_err() {
            match self.storage.remove(&path) {
                Ok(()) => debug!("Removed incomplete dump file '{}'", path.display()),
                Err(e) => warn!("Failed to remove '{}': {e}", path.display()),
            }
        }

        flushed
    }
}

enum WriteOnceError {
    Short { expected: usize, written: usize },
    Io(io::Error),
}

fn write_once<W: Write>(sink: &mut W, data: &[u8]) -> std::result::Result<(), WriteOnceError> {
    let written = sink.write(data).map_err(WriteOnceError::Io)?;
    if written != data.len() {
        return Err(WriteOnceError::Short {
            expected: data.len(),
            written,
        });
    }
    Ok(())
}

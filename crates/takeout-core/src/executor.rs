//! Low-level file operations used by the moving strategies.
//!
//! Every operation holds a semaphore permit for its whole duration, so the
//! number of in-flight filesystem calls stays bounded across all entities.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use filetime::FileTime;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::concurrency::{ConcurrencyController, ConcurrencyKind};
use crate::config::ProcessingConfig;
use crate::error::{Error, IoResultExt, Result};

/// Files larger than this are copied in chunks on a blocking worker.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 100 * 1024 * 1024;
const COPY_CHUNK_SIZE: usize = 1024 * 1024;
/// Suffix of the temporary file a copy is written to before it is renamed
/// to its final name.
const PARTIAL_SUFFIX: &str = ".takeout-part";

pub struct FileOperationExecutor {
    permits: Semaphore,
    reserved: Mutex<HashSet<PathBuf>>,
    large_file_threshold: u64,
}

/// A target path claimed by an in-flight operation. Released on drop.
struct Reservation<'a> {
    executor: &'a FileOperationExecutor,
    path: PathBuf,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.executor.lock_reserved().remove(&self.path);
    }
}

impl FileOperationExecutor {
    pub fn new(max_operations: usize, large_file_threshold: u64) -> Self {
        Self {
            permits: Semaphore::new(max_operations.max(1)),
            reserved: Mutex::new(HashSet::new()),
            large_file_threshold,
        }
    }

    pub fn from_config(config: &ProcessingConfig, controller: &ConcurrencyController) -> Self {
        let max_operations = config
            .max_file_operations
            .unwrap_or_else(|| controller.for_operation(ConcurrencyKind::FileIo));
        Self::new(max_operations, config.large_file_threshold)
    }

    pub async fn ensure_directory(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await.with_path(dir)
    }

    /// First free name for `name` inside `dir`: `name` itself, then
    /// `stem(1).ext`, `stem(2).ext`, ... Does not claim the result, so two
    /// calls with no filesystem change in between return the same path.
    pub async fn unique_path(&self, dir: &Path, name: &OsStr) -> PathBuf {
        let mut counter = 0;
        loop {
            let candidate = numbered(dir, name, counter);
            let claimed = self.lock_reserved().contains(&candidate);
            if !claimed && !exists(&candidate).await {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Move (or copy) `source` into `target_dir` under a unique name and
    /// return the final path.
    ///
    /// Moves try a rename first and fall back to copy-then-delete when
    /// source and target are on different devices.
    pub async fn move_or_copy(&self, source: &Path, target_dir: &Path, copy: bool) -> Result<PathBuf> {
        let _permit = self.acquire().await?;
        self.ensure_directory(target_dir).await?;
        let reservation = self.reserve(target_dir, file_name(source)?).await;
        let target = reservation.path.clone();

        if copy {
            self.copy_file(source, &target).await?;
        } else {
            match tokio::fs::rename(source, &target).await {
                Ok(()) => {}
                Err(e) if is_cross_device(&e) => {
                    debug!(source = %source.display(), "Cross-device move, copying instead");
                    self.copy_file(source, &target).await?;
                    // The content is safe at the target, a rerun must not copy it again
                    if let Err(e) = tokio::fs::remove_file(source).await {
                        warn!(
                            source = %source.display(),
                            target = %target.display(),
                            error = %e,
                            "Copied across devices but could not remove the source"
                        );
                    }
                }
                Err(e) => return Err(Error::io(source, e)),
            }
        }
        Ok(target)
    }

    pub async fn copy_to(&self, source: &Path, target_dir: &Path) -> Result<PathBuf> {
        self.move_or_copy(source, target_dir, true).await
    }

    /// Create a relative symlink inside `link_dir` pointing at `target_file`.
    pub async fn create_shortcut(&self, target_file: &Path, link_dir: &Path) -> Result<PathBuf> {
        let _permit = self.acquire().await?;
        self.ensure_directory(link_dir).await?;
        let reservation = self.reserve(link_dir, file_name(target_file)?).await;
        let link = reservation.path.clone();

        let relative = pathdiff::diff_paths(target_file, link_dir)
            .unwrap_or_else(|| target_file.to_path_buf());
        #[cfg(unix)]
        tokio::fs::symlink(&relative, &link).await.with_path(&link)?;
        #[cfg(windows)]
        tokio::fs::symlink_file(&relative, &link).await.with_path(&link)?;
        Ok(link)
    }

    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let _permit = self.acquire().await?;
        tokio::fs::remove_file(path).await.with_path(path)
    }

    /// Set the modification time of `file` to `when` (local time).
    /// Dates before 1970 are clamped to the epoch.
    pub async fn set_timestamp(&self, file: &Path, when: NaiveDateTime) -> Result<()> {
        let _permit = self.acquire().await?;
        let secs = when
            .and_local_timezone(chrono::Local)
            .earliest()
            .map(|local| local.timestamp())
            .unwrap_or_else(|| when.and_utc().timestamp())
            .max(0);
        let mtime = FileTime::from_unix_time(secs, 0);

        let path = file.to_path_buf();
        let result = tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime)).await?;
        match result {
            Ok(()) => Ok(()),
            // Some filesystems report success as an error with code 0
            Err(e) if e.raw_os_error() == Some(0) => {
                debug!(path = %file.display(), "Ignoring spurious timestamp error");
                Ok(())
            }
            Err(e) => Err(Error::io(file, e)),
        }
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| Error::operation("file operation executor is closed"))
    }

    fn lock_reserved(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve and claim a unique name. The check runs right before the
    /// filesystem call that uses the name.
    ///
    /// A candidate is claimed in memory first and only then checked on disk,
    /// so the lock is never held across I/O.
    async fn reserve(&self, dir: &Path, name: &OsStr) -> Reservation<'_> {
        let mut counter = 0;
        loop {
            let candidate = numbered(dir, name, counter);
            let claimed = self.lock_reserved().insert(candidate.clone());
            if claimed {
                let reservation = Reservation {
                    executor: self,
                    path: candidate,
                };
                if !exists(&reservation.path).await {
                    return reservation;
                }
            }
            counter += 1;
        }
    }

    /// Copy `source` to `target` through a temporary file next to it.
    /// `target` only ever appears complete; the temporary file is removed
    /// on failure.
    async fn copy_file(&self, source: &Path, target: &Path) -> Result<()> {
        let partial = partial_path(target);
        let copied = self.copy_contents(source, &partial).await;
        let finished = match copied {
            Ok(()) => tokio::fs::rename(&partial, target).await.with_path(target),
            Err(e) => Err(e),
        };
        if let Err(e) = finished {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), error = %cleanup, "Could not remove partial copy");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn copy_contents(&self, source: &Path, target: &Path) -> Result<()> {
        let size = tokio::fs::metadata(source).await.with_path(source)?.len();
        let (from, to) = (source.to_path_buf(), target.to_path_buf());
        if size > self.large_file_threshold {
            tokio::task::spawn_blocking(move || {
                copy_in_chunks(&from, &to)?;
                preserve_mtime(&from, &to);
                Ok::<_, Error>(())
            })
            .await??;
        } else {
            tokio::fs::copy(source, target).await.with_path(target)?;
            tokio::task::spawn_blocking(move || preserve_mtime(&from, &to)).await?;
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> Result<&OsStr> {
    path.file_name()
        .ok_or_else(|| Error::operation(format!("{} has no file name", path.display())))
}

/// `name` for counter 0, `stem(counter).ext` after that.
fn numbered(dir: &Path, name: &OsStr, counter: u32) -> PathBuf {
    if counter == 0 {
        return dir.join(name);
    }
    let name = Path::new(name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    match name.extension() {
        Some(ext) => dir.join(format!("{stem}({counter}).{}", ext.to_string_lossy())),
        None => dir.join(format!("{stem}({counter})")),
    }
}

/// Anything at `path`, dangling links included.
async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_else(|| OsStr::new("file")));
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

fn is_cross_device(e: &io::Error) -> bool {
    // EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows
    let code = if cfg!(windows) { 17 } else { 18 };
    if e.raw_os_error() == Some(code) {
        return true;
    }
    let message = e.to_string().to_lowercase();
    message.contains("cross-device") || message.contains("different disk drive")
}

fn copy_in_chunks(source: &Path, target: &Path) -> Result<()> {
    let mut input = File::open(source).with_path(source)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)
        .with_path(target)?;
    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        let n = input.read(&mut buffer).with_path(source)?;
        if n == 0 {
            break;
        }
        output.write_all(&buffer[..n]).with_path(target)?;
    }
    output.flush().with_path(target)
}

fn preserve_mtime(source: &Path, target: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    if let Err(e) = filetime::set_file_mtime(target, mtime) {
        debug!(path = %target.display(), error = %e, "Could not preserve modification time");
    }
}

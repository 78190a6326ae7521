//! Portable filesystem operations over an AFC session.
//!
//! [`Filesystem`] is the seam other filesystems plug into (the virtual root
//! routes across implementors); [`AfcFs`] is the device-backed one. Bulk
//! transfer helpers (push/pull/rm_tree/tree_view) are inherent to `AfcFs`
//! since they compose the portable operations with direct session traffic.

use std::fmt::Write as _;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use filetime::FileTime;
use globset::Glob;
use log::{debug, error};
use tokio::fs as localfs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Error;
use crate::file::RemoteFile;
use crate::io_err;
use crate::packet::{OpenFlags, OpenMode};
use crate::session::AfcSession;
use crate::stat::StatInfo;
use crate::utils::{self, Result};

/// Fixed request capacity for each pull read transaction.
const PULL_CHUNK: usize = 64 * 1024;

/// Push chunk sizes: small sources go in 128 KiB writes, everything from
/// 1 MiB up in 1 MiB writes.
const PUSH_CHUNK_SMALL: usize = 128 * 1024;
const PUSH_CHUNK_LARGE: usize = 1024 * 1024;
const PUSH_SMALL_LIMIT: u64 = 1024 * 1024;

/// The operations a mounted filesystem must answer.
///
/// `chmod`, `chown` and `chtimes` succeed without doing anything on AFC:
/// the device does not honor them, and callers layered on portable
/// interfaces expect them to be accepted.
#[async_trait]
pub trait Filesystem: Send + Sync {
    fn name(&self) -> &str;

    /// Create (truncating) a file open for read/write.
    async fn create(&self, name: &str) -> Result<RemoteFile>;

    /// Open read-only.
    async fn open(&self, name: &str) -> Result<RemoteFile>;

    /// Open with portable flags. Opening a directory yields a metadata-only
    /// directory handle.
    async fn open_with(&self, name: &str, flags: OpenFlags) -> Result<RemoteFile>;

    async fn mkdir(&self, name: &str) -> Result<()>;

    /// Succeeds if `name` is already a directory, creates the final
    /// component if the path is absent, and fails on an existing
    /// non-directory. Intermediate components are not created.
    async fn mkdir_all(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    /// Remove a path and everything below it in one device operation.
    async fn remove_all(&self, name: &str) -> Result<()>;

    async fn rename(&self, oldname: &str, newname: &str) -> Result<()>;

    async fn stat(&self, name: &str) -> Result<StatInfo>;

    async fn read_dir(&self, name: &str) -> Result<Vec<String>>;

    async fn chmod(&self, name: &str, mode: u32) -> Result<()>;
    async fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()>;
    async fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()>;
}

/// The device filesystem reached through one AFC session.
pub struct AfcFs {
    session: Arc<AfcSession>,
}

impl AfcFs {
    pub fn new(session: Arc<AfcSession>) -> AfcFs {
        AfcFs { session }
    }

    /// Dial an AFC endpoint and wrap it.
    pub async fn dial(addr: &str) -> Result<AfcFs> {
        Ok(AfcFs::new(Arc::new(AfcSession::dial(addr).await?)))
    }

    pub fn session(&self) -> &Arc<AfcSession> {
        &self.session
    }

    /// Write `data` as the full contents of a device file.
    pub async fn send_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let fd = self
            .session
            .open_file(path, OpenMode::WriteTruncate)
            .await?;
        let write = self.session.write_file(fd, data).await;
        let close = self.session.close_file(fd).await;
        write?;
        close
    }

    /// Names in `dir` matching a glob pattern.
    pub async fn list_files(&self, dir: &str, pattern: &str) -> Result<Vec<String>> {
        let matcher = Glob::new(pattern)
            .map_err(|e| Error::Io(io_err!(InvalidInput, e.to_string())))?
            .compile_matcher();

        Ok(self
            .read_dir(dir)
            .await?
            .into_iter()
            .filter(|name| matcher.is_match(name))
            .collect())
    }

    /// Render a textual tree of the hierarchy under `path`.
    pub async fn tree_view(&self, path: &str) -> Result<String> {
        let mut out = String::new();
        self.tree_walk(path.to_owned(), String::new(), true, &mut out)
            .await?;
        Ok(out)
    }

    fn tree_walk<'a>(
        &'a self,
        path: String,
        prefix: String,
        last: bool,
        out: &'a mut String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let info = self.stat(&path).await?;
            let glyph = if last { "`--" } else { "|--" };

            if !info.is_dir() {
                let _ = writeln!(out, "{}{} {}", prefix, glyph, utils::basename(&path));
                return Ok(());
            }
            let _ = writeln!(out, "{}{} {}/", prefix, glyph, utils::basename(&path));

            let children = self.read_dir(&path).await?;
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "|   " });
            let count = children.len();
            for (i, child) in children.into_iter().enumerate() {
                self.tree_walk(
                    utils::join(&path, &child),
                    child_prefix.clone(),
                    i == count - 1,
                    &mut *out,
                )
                .await?;
            }
            Ok(())
        })
    }

    /// Copy a device file or directory tree to the local filesystem.
    pub async fn pull(&self, src: &str, dst: impl AsRef<Path>) -> Result<()> {
        self.pull_walk(src.to_owned(), dst.as_ref().to_path_buf())
            .await
    }

    fn pull_walk(
        &self,
        src: String,
        dst: PathBuf,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let info = self.stat(&src).await?;
            if !info.is_dir() {
                return self.pull_file(&src, &dst, &info).await;
            }

            localfs::create_dir_all(&dst).await?;
            for name in self.read_dir(&src).await? {
                self.pull_walk(utils::join(&src, &name), dst.join(&name))
                    .await?;
            }
            Ok(())
        })
    }

    async fn pull_file(&self, src: &str, dst: &Path, info: &StatInfo) -> Result<()> {
        // A symlink source is followed once; the device will not open the
        // link itself.
        let src = if info.is_link() {
            info.link_target().to_owned()
        } else {
            src.to_owned()
        };
        debug!("pull {} -> {}", src, dst.display());

        let fd = self.session.open_file(&src, OpenMode::ReadOnly).await?;
        let copy = self.pull_copy(fd, info.size(), dst).await;
        let close = self.session.close_file(fd).await;
        copy?;
        close?;

        let mtime = FileTime::from_system_time(info.modified());
        let dst = dst.to_path_buf();
        let _ = tokio::task::spawn_blocking(move || filetime::set_file_mtime(dst, mtime)).await;
        Ok(())
    }

    async fn pull_copy(&self, fd: u64, size: i64, dst: &Path) -> Result<()> {
        let mut out = localfs::File::create(dst).await?;

        // The request capacity stays fixed; the budget comes from the stat
        // size, and an early empty response ends the loop rather than
        // spinning if the file shrank mid-transfer.
        let mut left = size;
        while left > 0 {
            let data = self.session.read_file(fd, PULL_CHUNK).await?;
            if data.is_empty() {
                break;
            }
            left -= data.len() as i64;
            out.write_all(&data).await?;
        }
        out.flush().await?;
        Ok(())
    }

    /// Copy a local file to the device.
    pub async fn push(&self, src: impl AsRef<Path>, dst: &str) -> Result<()> {
        self.push_with_progress(src, dst, |_, _| {}).await
    }

    /// Copy a local file to the device, reporting each chunk to `progress`.
    /// A destination that already exists as a directory receives the file
    /// under the source's basename.
    pub async fn push_with_progress<F>(
        &self,
        src: impl AsRef<Path>,
        dst: &str,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(u64, &str) + Send,
    {
        let src = src.as_ref();
        let meta = localfs::metadata(src).await?;

        let mut dst = dst.to_owned();
        if let Ok(info) = self.stat(&dst).await {
            if info.is_dir() {
                let base = src
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                dst = utils::join(&dst, &base);
            }
        }
        debug!("push {} -> {}", src.display(), dst);

        let mut local = localfs::File::open(src).await?;
        let chunk_size = if meta.len() < PUSH_SMALL_LIMIT {
            PUSH_CHUNK_SMALL
        } else {
            PUSH_CHUNK_LARGE
        };

        let fd = self
            .session
            .open_file(&dst, OpenMode::ReadWriteTruncate)
            .await?;
        let copy = async {
            let mut chunk = vec![0u8; chunk_size];
            loop {
                let n = local.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                progress(n as u64, "Pushing");
                self.session.write_file(fd, &chunk[..n]).await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        let close = self.session.close_file(fd).await;
        copy?;
        close
    }

    /// Remove a tree leaves first with individual remove operations.
    ///
    /// Children that cannot be statted are logged and skipped; a remove
    /// failure aborts the walk.
    pub async fn rm_tree(&self, path: &str) -> Result<()> {
        self.rm_walk(path.to_owned()).await
    }

    fn rm_walk(&self, path: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let info = self.stat(&path).await?;
            if info.is_dir() {
                for name in self.read_dir(&path).await? {
                    let child = utils::join(&path, &name);
                    let info = match self.stat(&child).await {
                        Ok(info) => info,
                        Err(err) => {
                            error!("stat {} error: {}", child, err);
                            continue;
                        }
                    };
                    if info.is_dir() {
                        self.rm_walk(child).await?;
                    } else {
                        self.session.remove_path(&child).await?;
                    }
                }
            }
            self.session.remove_path(&path).await
        })
    }
}

#[async_trait]
impl Filesystem for AfcFs {
    fn name(&self) -> &str {
        "afc"
    }

    async fn create(&self, name: &str) -> Result<RemoteFile> {
        let fd = self
            .session
            .open_file(name, OpenMode::ReadWriteTruncate)
            .await
            .map_err(|err| Error::Path {
                op: "open",
                path: name.to_owned(),
                source: Box::new(err),
            })?;
        Ok(RemoteFile::device(
            self.session.clone(),
            name.to_owned(),
            fd,
        ))
    }

    async fn open(&self, name: &str) -> Result<RemoteFile> {
        self.open_with(name, OpenFlags::READ).await
    }

    async fn open_with(&self, name: &str, flags: OpenFlags) -> Result<RemoteFile> {
        if let Ok(info) = self.session.stat(name).await {
            if info.is_dir() {
                let children = self.session.read_dir(name).await?;
                return Ok(RemoteFile::directory(
                    self.session.clone(),
                    name.to_owned(),
                    children,
                ));
            }
        }

        let mode = OpenMode::from_flags(flags)?;
        let fd = self.session.open_file(name, mode).await?;
        Ok(RemoteFile::device(
            self.session.clone(),
            name.to_owned(),
            fd,
        ))
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        self.session.make_dir(name).await
    }

    async fn mkdir_all(&self, name: &str) -> Result<()> {
        let info = match self.session.stat(name).await {
            Ok(info) => info,
            Err(_) => return self.session.make_dir(name).await,
        };

        if info.is_dir() {
            return Ok(());
        }
        Err(Error::NotDirectory(name.to_owned()))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.session.remove_path(name).await
    }

    async fn remove_all(&self, name: &str) -> Result<()> {
        self.session.remove_path_and_contents(name).await
    }

    async fn rename(&self, oldname: &str, newname: &str) -> Result<()> {
        self.session.rename_path(oldname, newname).await
    }

    async fn stat(&self, name: &str) -> Result<StatInfo> {
        self.session.stat(name).await
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<String>> {
        self.session.read_dir(name).await
    }

    async fn chmod(&self, _name: &str, _mode: u32) -> Result<()> {
        Ok(())
    }

    async fn chown(&self, _name: &str, _uid: u32, _gid: u32) -> Result<()> {
        Ok(())
    }

    async fn chtimes(&self, _name: &str, _atime: SystemTime, _mtime: SystemTime) -> Result<()> {
        Ok(())
    }
}

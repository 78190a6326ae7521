//! Remote file handles.
//!
//! A handle owns a device descriptor and forwards streaming operations to
//! its session, one transaction per call. Directory handles are the odd
//! case: the device refuses to open a directory, so they carry no
//! descriptor and answer only metadata and listing calls.

use std::io::SeekFrom;
use std::sync::Arc;

use log::warn;

use crate::error::{AfcStatus, Error};
use crate::session::AfcSession;
use crate::stat::StatInfo;
use crate::utils::Result;

#[derive(Debug)]
enum Handle {
    Device { fd: u64 },
    Directory { children: Vec<String> },
}

/// An open file on the device.
///
/// A handle must not be used from multiple callers at once; the session
/// serializes the wire traffic, but interleaved reads would still corrupt
/// the shared file position. Close explicitly: the protocol has no way to
/// reclaim a descriptor once the handle is gone.
pub struct RemoteFile {
    session: Arc<AfcSession>,
    path: String,
    handle: Handle,
    closed: bool,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .field("closed", &self.closed)
            .finish()
    }
}

impl RemoteFile {
    pub(crate) fn device(session: Arc<AfcSession>, path: String, fd: u64) -> RemoteFile {
        RemoteFile {
            session,
            path,
            handle: Handle::Device { fd },
            closed: false,
        }
    }

    pub(crate) fn directory(
        session: Arc<AfcSession>,
        path: String,
        children: Vec<String>,
    ) -> RemoteFile {
        RemoteFile {
            session,
            path,
            handle: Handle::Directory { children },
            closed: true,
        }
    }

    /// The absolute device path this handle was opened with.
    pub fn name(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.handle, Handle::Directory { .. })
    }

    /// The device descriptor; `None` for directory handles.
    pub fn fd(&self) -> Option<u64> {
        match self.handle {
            Handle::Device { fd } => Some(fd),
            Handle::Directory { .. } => None,
        }
    }

    /// Read into `buf` at the current position.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of file. The
    /// device answers a read past the tail with a short count, so a return
    /// shorter than `buf` also means the file is exhausted.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fd = self.device_fd()?;
        let data = self.session.read_file(fd, buf.len()).await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Write all of `buf` at the current position.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let fd = self.device_fd()?;
        self.session.write_file(fd, buf).await?;
        Ok(buf.len())
    }

    /// Reposition the handle, returning the new absolute offset.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let fd = self.device_fd()?;
        self.session.seek_file(fd, pos).await
    }

    /// Current absolute offset.
    pub async fn tell(&self) -> Result<u64> {
        let fd = self.device_fd()?;
        self.session.tell_file(fd).await
    }

    pub async fn truncate(&self, size: u64) -> Result<()> {
        let fd = self.device_fd()?;
        self.session.truncate_file(fd, size).await
    }

    pub async fn lock(&self) -> Result<()> {
        let fd = self.device_fd()?;
        self.session.lock_file(fd).await
    }

    /// Fresh metadata for the handle's path. Nothing is cached; directory
    /// handles synthesize their record locally.
    pub async fn stat(&self) -> Result<StatInfo> {
        match self.handle {
            Handle::Device { .. } => self.session.stat(&self.path).await,
            Handle::Directory { .. } => Ok(StatInfo::dir_placeholder(&self.path)),
        }
    }

    /// Child names of a directory handle, as listed at open time.
    pub fn read_dir_names(&self) -> Result<Vec<String>> {
        match &self.handle {
            Handle::Directory { children } => Ok(children.clone()),
            Handle::Device { .. } => Err(unsupported()),
        }
    }

    /// Stat records for a directory handle's children. These are built from
    /// the name list alone, without further device traffic.
    pub fn read_dir(&self) -> Result<Vec<StatInfo>> {
        match &self.handle {
            Handle::Directory { children } => Ok(children
                .iter()
                .map(|name| StatInfo::dir_placeholder(name))
                .collect()),
            Handle::Device { .. } => Err(unsupported()),
        }
    }

    /// Release the device descriptor. Call at most once; the descriptor is
    /// gone even if the device reports an error.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        match self.handle {
            Handle::Device { fd } => self.session.close_file(fd).await,
            Handle::Directory { .. } => Ok(()),
        }
    }

    fn device_fd(&self) -> Result<u64> {
        match self.handle {
            Handle::Device { fd } => Ok(fd),
            Handle::Directory { .. } => Err(unsupported()),
        }
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if !self.closed {
            if let Handle::Device { fd } = self.handle {
                warn!(
                    "remote file {:?} dropped without close, descriptor {} leaks",
                    self.path, fd
                );
            }
        }
    }
}

fn unsupported() -> Error {
    Error::Status(AfcStatus::OperationNotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Operation;
    use crate::testutil::{self, MockDevice};

    fn device_file(fd: u64) -> (RemoteFile, MockDevice) {
        let (session, device) = testutil::pair();
        let file = RemoteFile::device(Arc::new(session), "/f".to_owned(), fd);
        (file, device)
    }

    #[tokio::test]
    async fn short_read_then_eof() {
        let (mut file, mut device) = device_file(17);

        let server = tokio::spawn(async move {
            let req = device.recv().await;
            assert_eq!(req.operation(), Some(Operation::FileRead));
            device.send_data(0, b"hello".to_vec()).await;

            let _ = device.recv().await;
            device.send_data(1, Vec::new()).await;
        });

        let mut buf = [0u8; 16];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"hello");

        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.await.unwrap();
        drop(file); // descriptor intentionally leaked by the test device
    }

    #[tokio::test]
    async fn write_reports_full_length() {
        let (mut file, mut device) = device_file(3);

        let server = tokio::spawn(async move {
            let req = device.recv().await;
            assert_eq!(req.payload, b"abc");
            device.send_status(0, crate::error::AfcStatus::Success).await;
        });

        assert_eq!(file.write(b"abc").await.unwrap(), 3);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_the_descriptor() {
        let (file, mut device) = device_file(12);

        let server = tokio::spawn(async move {
            let req = device.recv().await;
            assert_eq!(req.operation(), Some(Operation::FileClose));
            assert_eq!(req.header_payload, testutil::le64(12));
            device.send_status(0, crate::error::AfcStatus::Success).await;
        });

        file.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn directory_handles_answer_metadata_only() {
        let (session, _device) = testutil::pair();
        let mut dir = RemoteFile::directory(
            Arc::new(session),
            "/DCIM".to_owned(),
            vec!["100APPLE".to_owned(), "Thumbs".to_owned()],
        );

        assert!(dir.is_dir());
        assert_eq!(dir.fd(), None);
        assert_eq!(
            dir.read_dir_names().unwrap(),
            vec!["100APPLE".to_owned(), "Thumbs".to_owned()]
        );
        let infos = dir.read_dir().unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|i| i.is_dir()));

        let stat = dir.stat().await.unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.name(), "DCIM");

        let mut buf = [0u8; 4];
        let err = dir.read(&mut buf).await.unwrap_err();
        assert_eq!(err.status(), Some(AfcStatus::OperationNotSupported));
        let err = dir.write(b"x").await.unwrap_err();
        assert_eq!(err.status(), Some(AfcStatus::OperationNotSupported));
        let err = dir.seek(SeekFrom::Start(0)).await.unwrap_err();
        assert_eq!(err.status(), Some(AfcStatus::OperationNotSupported));
    }
}

//! Prefix-routed dispatch across mounted filesystems.
//!
//! A virtual root maps path prefixes onto [`Filesystem`] implementations.
//! The empty prefix matches every path and is registered at construction as
//! the device root, so additional service filesystems (app sandboxes, crash
//! logs) can be layered on later without the caller caring which session
//! answers a path.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::Error;
use crate::file::RemoteFile;
use crate::fs::{AfcFs, Filesystem};
use crate::packet::OpenFlags;
use crate::stat::StatInfo;
use crate::utils::Result;

struct Mount {
    prefix: String,
    fs: Arc<dyn Filesystem>,
}

/// A root filesystem assembled from prefix mounts.
pub struct VirtualRootFs {
    mounts: Vec<Mount>,
}

impl VirtualRootFs {
    /// Dial the device and install its filesystem as the root mount.
    pub async fn dial(addr: &str) -> Result<VirtualRootFs> {
        let root = AfcFs::dial(addr).await?;
        Ok(VirtualRootFs::new(Arc::new(root)))
    }

    /// Build a root around an existing filesystem, mounted at the empty
    /// prefix.
    pub fn new(root: Arc<dyn Filesystem>) -> VirtualRootFs {
        VirtualRootFs {
            mounts: vec![Mount {
                prefix: String::new(),
                fs: root,
            }],
        }
    }

    /// Bind a filesystem at a path prefix, replacing any previous binding
    /// for the same prefix.
    pub fn mount(&mut self, prefix: &str, fs: Arc<dyn Filesystem>) {
        self.unmount(prefix);
        self.mounts.push(Mount {
            prefix: prefix.to_owned(),
            fs,
        });
    }

    /// Drop a binding. The filesystem behind it is not closed; its session
    /// stays usable through other handles.
    pub fn unmount(&mut self, prefix: &str) {
        self.mounts.retain(|m| m.prefix != prefix);
    }

    /// Pick the mount whose prefix matches the path, longest prefix first,
    /// and split off the remainder the mounted filesystem sees.
    fn resolve(&self, path: &str) -> Option<(&Mount, String)> {
        self.mounts
            .iter()
            .filter(|m| path.starts_with(&m.prefix))
            .max_by_key(|m| m.prefix.len())
            .map(|m| (m, path[m.prefix.len()..].to_owned()))
    }

    fn resolve_or_deny(&self, path: &str) -> Result<(&Mount, String)> {
        self.resolve(path)
            .ok_or_else(|| Error::NoMount(path.to_owned()))
    }
}

/// Strip a mount prefix from a rename destination, keeping the result
/// rooted.
fn trim_dest(path: &str, prefix: &str) -> String {
    let trimmed = path.strip_prefix(prefix).unwrap_or(path);
    if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{}", trimmed)
    }
}

/// Collapse host path separators: Windows callers hand in backslashes.
fn normalize(name: &str) -> String {
    if cfg!(windows) {
        name.replace('\\', "/")
    } else {
        name.to_owned()
    }
}

#[async_trait]
impl Filesystem for VirtualRootFs {
    fn name(&self) -> &str {
        "virtual-root"
    }

    async fn create(&self, name: &str) -> Result<RemoteFile> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.create(&rest).await
    }

    async fn open(&self, name: &str) -> Result<RemoteFile> {
        self.open_with(name, OpenFlags::READ).await
    }

    async fn open_with(&self, name: &str, flags: OpenFlags) -> Result<RemoteFile> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.open_with(&rest, flags).await
    }

    async fn mkdir(&self, name: &str) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.mkdir(&rest).await
    }

    async fn mkdir_all(&self, name: &str) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.mkdir_all(&rest).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.remove(&rest).await
    }

    async fn remove_all(&self, name: &str) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.remove_all(&rest).await
    }

    /// Both names must live under one mount: the source picks it, and the
    /// same prefix is stripped from the destination. There is no cross-mount
    /// rename.
    async fn rename(&self, oldname: &str, newname: &str) -> Result<()> {
        let oldname = normalize(oldname);
        let newname = normalize(newname);
        let (mount, old_rest) = self.resolve_or_deny(&oldname)?;
        let new_rest = trim_dest(&newname, &mount.prefix);
        mount.fs.rename(&old_rest, &new_rest).await
    }

    /// The root itself is always statable: a path outside every mount
    /// answers with a synthesized directory record instead of an error.
    async fn stat(&self, name: &str) -> Result<StatInfo> {
        let name = normalize(name);
        match self.resolve(&name) {
            Some((mount, rest)) => mount.fs.stat(&rest).await,
            None => Ok(StatInfo::dir_placeholder(&name)),
        }
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<String>> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.read_dir(&rest).await
    }

    async fn chmod(&self, name: &str, mode: u32) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.chmod(&rest, mode).await
    }

    async fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.chown(&rest, uid, gid).await
    }

    async fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let name = normalize(name);
        let (mount, rest) = self.resolve_or_deny(&name)?;
        mount.fs.chtimes(&rest, atime, mtime).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AfcStatus;
    use std::sync::Mutex;

    struct RecordingFs {
        label: String,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingFs {
        fn new(label: &str) -> Arc<RecordingFs> {
            Arc::new(RecordingFs {
                label: label.to_owned(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Filesystem for RecordingFs {
        fn name(&self) -> &str {
            &self.label
        }

        async fn create(&self, name: &str) -> Result<RemoteFile> {
            self.record(format!("create {}", name));
            Err(Error::Status(AfcStatus::OperationNotSupported))
        }

        async fn open(&self, name: &str) -> Result<RemoteFile> {
            self.open_with(name, OpenFlags::READ).await
        }

        async fn open_with(&self, name: &str, _flags: OpenFlags) -> Result<RemoteFile> {
            self.record(format!("open {}", name));
            Err(Error::Status(AfcStatus::OperationNotSupported))
        }

        async fn mkdir(&self, name: &str) -> Result<()> {
            self.record(format!("mkdir {}", name));
            Ok(())
        }

        async fn mkdir_all(&self, name: &str) -> Result<()> {
            self.record(format!("mkdir_all {}", name));
            Ok(())
        }

        async fn remove(&self, name: &str) -> Result<()> {
            self.record(format!("remove {}", name));
            Ok(())
        }

        async fn remove_all(&self, name: &str) -> Result<()> {
            self.record(format!("remove_all {}", name));
            Ok(())
        }

        async fn rename(&self, oldname: &str, newname: &str) -> Result<()> {
            self.record(format!("rename {} -> {}", oldname, newname));
            Ok(())
        }

        async fn stat(&self, name: &str) -> Result<StatInfo> {
            self.record(format!("stat {}", name));
            Ok(StatInfo::dir_placeholder(name))
        }

        async fn read_dir(&self, name: &str) -> Result<Vec<String>> {
            self.record(format!("read_dir {}", name));
            Ok(Vec::new())
        }

        async fn chmod(&self, _name: &str, _mode: u32) -> Result<()> {
            Ok(())
        }

        async fn chown(&self, _name: &str, _uid: u32, _gid: u32) -> Result<()> {
            Ok(())
        }

        async fn chtimes(
            &self,
            _name: &str,
            _atime: SystemTime,
            _mtime: SystemTime,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn root_mount_sees_full_paths() {
        let a = RecordingFs::new("a");
        let root = VirtualRootFs::new(a.clone());

        root.rename("/foo", "/bar").await.unwrap();
        assert_eq!(a.calls(), vec!["rename /foo -> /bar".to_owned()]);
    }

    #[tokio::test]
    async fn rename_under_a_mount_strips_the_prefix_from_both_sides() {
        let a = RecordingFs::new("a");
        let b = RecordingFs::new("b");
        let mut root = VirtualRootFs::new(a.clone());
        root.mount("/apps", b.clone());

        root.rename("/apps/x", "/apps/y").await.unwrap();
        assert_eq!(b.calls(), vec!["rename /x -> /y".to_owned()]);
        assert!(a.calls().is_empty());
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let a = RecordingFs::new("a");
        let b = RecordingFs::new("b");
        let mut root = VirtualRootFs::new(a.clone());
        root.mount("/apps", b.clone());

        root.mkdir("/apps/sub").await.unwrap();
        root.mkdir("/other").await.unwrap();

        assert_eq!(b.calls(), vec!["mkdir /sub".to_owned()]);
        assert_eq!(a.calls(), vec!["mkdir /other".to_owned()]);
    }

    #[tokio::test]
    async fn unmatched_paths_are_denied_except_for_stat() {
        let b = RecordingFs::new("b");
        let mut root = VirtualRootFs::new(b.clone());
        root.unmount("");
        root.mount("/apps", b.clone());

        let err = root.mkdir("/other/dir").await.unwrap_err();
        assert!(matches!(err, Error::NoMount(_)));

        let info = root.stat("/other/dir").await.unwrap();
        assert!(info.is_dir());
        assert_eq!(info.name(), "dir");
        assert!(b.calls().is_empty());
    }

    #[tokio::test]
    async fn unmount_removes_routing_without_closing_anything() {
        let b = RecordingFs::new("b");
        let mut root = VirtualRootFs::new(b.clone());
        root.unmount("");
        root.mount("/apps", b.clone());

        root.remove("/apps/x").await.unwrap();
        root.unmount("/apps");
        let err = root.remove("/apps/x").await.unwrap_err();

        assert!(matches!(err, Error::NoMount(_)));
        assert_eq!(b.calls(), vec!["remove /x".to_owned()]);
    }

    #[test]
    fn trim_dest_keeps_the_result_rooted() {
        assert_eq!(trim_dest("/apps/y", "/apps"), "/y");
        assert_eq!(trim_dest("/bar", ""), "/bar");
        assert_eq!(trim_dest("/appsy", "/apps"), "/y");
    }
}

//! Device file metadata.
//!
//! A `FileInfo` response carries NUL-separated key/value pairs; this module
//! parses them into a portable [`StatInfo`] record.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::utils::{self, Result};

const IFMT_DIR: &str = "S_IFDIR";
const IFMT_LINK: &str = "S_IFLNK";

/// What a path points at on the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// Portable view of a device stat response.
///
/// Times are stored as the device reports them: nanoseconds since the epoch,
/// where `ctime` comes from `st_birthtime`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatInfo {
    name: String,
    size: i64,
    blocks: i64,
    ctime: i64,
    mtime: i64,
    nlink: String,
    ifmt: String,
    linktarget: String,
}

impl StatInfo {
    /// Basename of the queried path. The device response itself carries no
    /// name; it is filled in from the request path.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn blocks(&self) -> i64 {
        self.blocks
    }

    pub fn nlink(&self) -> &str {
        &self.nlink
    }

    pub fn is_dir(&self) -> bool {
        self.ifmt == IFMT_DIR
    }

    pub fn is_link(&self) -> bool {
        self.ifmt == IFMT_LINK
    }

    pub fn kind(&self) -> FileKind {
        if self.is_dir() {
            FileKind::Dir
        } else if self.is_link() {
            FileKind::Symlink
        } else {
            FileKind::File
        }
    }

    /// Symlink target, empty for everything that is not a link.
    pub fn link_target(&self) -> &str {
        &self.linktarget
    }

    /// Birth time as reported, in nanoseconds since the epoch.
    pub fn ctime_nanos(&self) -> i64 {
        self.ctime
    }

    /// Modification time as reported, in nanoseconds since the epoch.
    pub fn mtime_nanos(&self) -> i64 {
        self.mtime
    }

    pub fn created(&self) -> SystemTime {
        device_time(self.ctime)
    }

    pub fn modified(&self) -> SystemTime {
        device_time(self.mtime)
    }

    /// Synthesize a directory record for a path the device was never asked
    /// about, stamped with the current time. Used for virtual roots.
    pub fn dir_placeholder(name: &str) -> StatInfo {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        StatInfo {
            name: utils::basename(name).to_owned(),
            size: 0,
            blocks: 0,
            ctime: now,
            mtime: now,
            nlink: String::new(),
            ifmt: IFMT_DIR.to_owned(),
            linktarget: String::new(),
        }
    }

    /// Parse a `FileInfo` content payload for the given request path.
    pub fn from_kv_payload(path: &str, payload: &[u8]) -> Result<StatInfo> {
        let mut info = StatInfo {
            name: utils::basename(path).to_owned(),
            size: 0,
            blocks: 0,
            ctime: 0,
            mtime: 0,
            nlink: String::new(),
            ifmt: String::new(),
            linktarget: String::new(),
        };

        for (key, value) in parse_kv_pairs(payload)? {
            match key.as_str() {
                "st_size" => info.size = value.parse().unwrap_or(0),
                "st_blocks" => info.blocks = value.parse().unwrap_or(0),
                "st_birthtime" => info.ctime = value.parse().unwrap_or(0),
                "st_mtime" => info.mtime = value.parse().unwrap_or(0),
                "st_nlink" => info.nlink = value,
                "st_ifmt" => info.ifmt = value,
                "st_linktarget" => info.linktarget = value,
                _ => {}
            }
        }

        Ok(info)
    }
}

/// Split a NUL-separated key/value payload, as used by `FileInfo` and
/// `DeviceInfo` responses. One trailing NUL is tolerated; an odd field count
/// is a malformed response.
pub fn parse_kv_pairs(payload: &[u8]) -> Result<Vec<(String, String)>> {
    let trimmed = payload.strip_suffix(&[0u8]).unwrap_or(payload);
    let fields: Vec<&[u8]> = trimmed.split(|b| *b == 0).collect();
    if fields.len() % 2 != 0 {
        return Err(Error::InvalidStatPayload {
            fields: fields.len(),
        });
    }

    Ok(fields
        .chunks_exact(2)
        .map(|kv| {
            (
                String::from_utf8_lossy(kv[0]).into_owned(),
                String::from_utf8_lossy(kv[1]).into_owned(),
            )
        })
        .collect())
}

// Device timestamps are nanoseconds; the conversion the rest of the stack
// expects is nanos / 1000 reinterpreted as microseconds.
fn device_time(nanos: i64) -> SystemTime {
    let micros = nanos / 1000;
    if micros <= 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::from_micros(micros as u64)
}

#![forbid(unsafe_code)]
//! Asynchronous Apple File Conduit (AFC) client library for Rust.
//!
//! This crate provides a tokio-based async client for the AFC protocol,
//! the request/response service Apple devices expose for remote filesystem
//! access, and layers a portable filesystem abstraction on top of it.
//!
//! # Overview
//!
//! AFC frames typed operation packets onto a single byte stream. Every
//! request is answered by exactly one response; packet numbers increase
//! monotonically and responses carry no correlation tag, so one session
//! runs one transaction at a time.
//!
//! The crate is built in layers:
//!
//! 1. [`packet`] — the wire codec: a fixed 40-byte little-endian header,
//!    a header payload carrying structured arguments, and a content payload
//!    carrying bulk bytes.
//! 2. [`session`] — [`AfcSession`], one connected client instance issuing
//!    serialized transactions.
//! 3. [`file`] — [`RemoteFile`], a per-open-file handle with read/write/
//!    seek/truncate over device descriptors.
//! 4. [`fs`] — the [`Filesystem`] trait plus [`AfcFs`], the device-backed
//!    implementation with recursive push/pull/rm_tree/tree_view helpers.
//! 5. [`vroot`] — [`VirtualRootFs`], routing paths across mounted
//!    filesystems by prefix.
//!
//! # Example
//!
//! ```no_run
//! use rsafc::{AfcFs, Filesystem, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let fs = AfcFs::dial("127.0.0.1:5001").await?;
//!
//!     for name in fs.read_dir("/DCIM").await? {
//!         let info = fs.stat(&format!("/DCIM/{name}")).await?;
//!         println!("{:>10}  {}", info.size(), info.name());
//!     }
//!
//!     fs.pull("/DCIM/100APPLE", "./photos").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! A session may be shared between tasks; a mutex serializes transactions
//! and callers observe strict FIFO ordering. A single [`RemoteFile`] must
//! not be used concurrently — the device-side file position is shared
//! state the protocol cannot protect.
//!
//! There are no timeouts or cancellation tokens. [`AfcSession::close`]
//! shuts the transport down once the current transaction finishes; a
//! transaction stuck on an unresponsive device is released only when the
//! peer or the network gives up the connection.
//!
//! # Errors
//!
//! Device status codes surface as [`Error::Status`] with the
//! [`AfcStatus`] taxonomy; framing and transport problems surface as the
//! other [`Error`] variants. Errors are returned unwrapped: there are no
//! retries, and a failed bulk transfer leaves already-written bytes in
//! place.
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`).
pub mod error;
pub mod file;
pub mod fs;
pub mod packet;
pub mod session;
pub mod stat;
#[macro_use]
pub mod utils;
pub mod vroot;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::error::{AfcStatus, Error};
pub use crate::file::RemoteFile;
pub use crate::fs::{AfcFs, Filesystem};
pub use crate::packet::{LinkType, OpenFlags, OpenMode, Operation, Packet, PacketHeader};
pub use crate::session::{AfcSession, Transport};
pub use crate::stat::{FileKind, StatInfo};
pub use crate::utils::Result;
pub use crate::vroot::VirtualRootFs;

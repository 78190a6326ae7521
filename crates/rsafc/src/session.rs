//! Asynchronous AFC client session.
//!
//! A session owns one connected transport and issues request/response
//! transactions over it. Packet numbers increase monotonically across all
//! sends, and responses carry no correlation tag, so a mutex serializes
//! every transaction: the guard is held from the request write until the
//! full response has been read.

use std::io::{Cursor, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::io_err;
use crate::packet::{LinkType, OpenMode, Operation, Packet, PacketHeader, HEADER_SIZE};
use crate::stat::{self, StatInfo};
use crate::utils::Result;

/// A bidirectional byte stream the session can run over.
///
/// Dialed TCP connections implement this, as does anything test harnesses
/// want to inject (`tokio::io::duplex`, in this crate's own tests).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

struct Conn {
    stream: Box<dyn Transport>,
    packet_num: u64,
}

/// One connected AFC client instance.
///
/// All methods are single serialized transactions; the session is safe to
/// share between tasks, and requests from concurrent callers are answered
/// strictly in FIFO order. There are no timeouts.
pub struct AfcSession {
    conn: Mutex<Conn>,
}

impl AfcSession {
    /// Connect to an AFC endpoint over plain TCP.
    pub async fn dial(addr: &str) -> Result<AfcSession> {
        let stream = TcpStream::connect(addr).await?;
        debug!("afc session connected to {}", addr);
        Ok(AfcSession::from_stream(stream))
    }

    /// Wrap an already-connected byte stream.
    pub fn from_stream<T: Transport + 'static>(stream: T) -> AfcSession {
        AfcSession {
            conn: Mutex::new(Conn {
                stream: Box::new(stream),
                packet_num: 0,
            }),
        }
    }

    /// Shut the transport down. Waits for the in-flight transaction, if
    /// any; callers queued behind it observe an I/O error.
    pub async fn close(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.stream.shutdown().await?;
        Ok(())
    }

    pub async fn remove_path(&self, path: &str) -> Result<()> {
        debug!("remove path {}", path);
        let mut conn = self.conn.lock().await;
        transact(
            &mut conn,
            Operation::RemovePath,
            path.as_bytes().to_vec(),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    pub async fn rename_path(&self, from: &str, to: &str) -> Result<()> {
        let mut data = Vec::with_capacity(from.len() + to.len() + 2);
        data.extend_from_slice(from.as_bytes());
        data.push(0);
        data.extend_from_slice(to.as_bytes());
        data.push(0);

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::RenamePath, data, Vec::new()).await?;
        Ok(())
    }

    pub async fn make_dir(&self, path: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        transact(
            &mut conn,
            Operation::MakeDir,
            path.as_bytes().to_vec(),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    /// Stat a device path. The record's name is the basename of `path`; the
    /// device reports everything else.
    pub async fn stat(&self, path: &str) -> Result<StatInfo> {
        let response = {
            let mut conn = self.conn.lock().await;
            transact(
                &mut conn,
                Operation::FileInfo,
                path.as_bytes().to_vec(),
                Vec::new(),
            )
            .await?
        };

        StatInfo::from_kv_payload(path, &response.payload)
    }

    /// List a directory, filtering out `.` and `..`.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let response = {
            let mut conn = self.conn.lock().await;
            transact(
                &mut conn,
                Operation::ReadDir,
                path.as_bytes().to_vec(),
                Vec::new(),
            )
            .await?
        };

        let trimmed = response
            .payload
            .strip_suffix(&[0u8])
            .unwrap_or(&response.payload);
        Ok(trimmed
            .split(|b| *b == 0)
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .filter(|name| !name.is_empty() && name != "." && name != "..")
            .collect())
    }

    /// Open a device file, returning its descriptor.
    pub async fn open_file(&self, path: &str, mode: OpenMode) -> Result<u64> {
        debug!("open file {} mode {:?}", path, mode);
        let mut data = Vec::with_capacity(8 + path.len());
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, mode as u64)?;
        data.extend_from_slice(path.as_bytes());

        let response = {
            let mut conn = self.conn.lock().await;
            transact(&mut conn, Operation::FileOpen, data, Vec::new()).await?
        };

        let fd = read_u64_result(&response)?;
        if fd == 0 {
            return Err(Error::FdZero);
        }
        Ok(fd)
    }

    /// Read up to `cap` bytes from an open descriptor. An empty result means
    /// end of file; a result longer than `cap` violates the protocol.
    pub async fn read_file(&self, fd: u64, cap: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(16);
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, fd)?;
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, cap as u64)?;

        let response = {
            let mut conn = self.conn.lock().await;
            transact(&mut conn, Operation::FileRead, data, Vec::new()).await?
        };

        if response.payload.len() > cap {
            return Err(Error::OversizedRead {
                requested: cap,
                returned: response.payload.len(),
            });
        }
        Ok(response.payload)
    }

    /// Write all of `data` at the descriptor's current position.
    pub async fn write_file(&self, fd: u64, data: &[u8]) -> Result<()> {
        let mut header = Vec::with_capacity(8);
        WriteBytesExt::write_u64::<LittleEndian>(&mut header, fd)?;

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::FileWrite, header, data.to_vec()).await?;
        Ok(())
    }

    pub async fn close_file(&self, fd: u64) -> Result<()> {
        let mut header = Vec::with_capacity(8);
        WriteBytesExt::write_u64::<LittleEndian>(&mut header, fd)?;

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::FileClose, header, Vec::new()).await?;
        Ok(())
    }

    pub async fn lock_file(&self, fd: u64) -> Result<()> {
        let mut header = Vec::with_capacity(8);
        WriteBytesExt::write_u64::<LittleEndian>(&mut header, fd)?;

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::FileLock, header, Vec::new()).await?;
        Ok(())
    }

    /// Seek an open descriptor and return the resulting position.
    ///
    /// The device offers no combined call: this is a `FileSeek` followed by
    /// a `FileTell`, issued back to back under one lock hold.
    pub async fn seek_file(&self, fd: u64, pos: SeekFrom) -> Result<u64> {
        let (whence, offset): (u64, i64) = match pos {
            SeekFrom::Start(n) => (0, n as i64),
            SeekFrom::Current(n) => (1, n),
            SeekFrom::End(n) => (2, n),
        };

        let mut data = Vec::with_capacity(24);
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, fd)?;
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, whence)?;
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, offset as u64)?;

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::FileSeek, data, Vec::new()).await?;
        tell_locked(&mut conn, fd).await
    }

    /// Current position of an open descriptor.
    pub async fn tell_file(&self, fd: u64) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        tell_locked(&mut conn, fd).await
    }

    /// Truncate an open descriptor to `size` bytes.
    pub async fn truncate_file(&self, fd: u64, size: u64) -> Result<()> {
        let mut data = Vec::with_capacity(16);
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, fd)?;
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, size)?;

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::FileSetSize, data, Vec::new()).await?;
        Ok(())
    }

    /// Truncate a path without opening it.
    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let mut data = Vec::with_capacity(8 + path.len());
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, size)?;
        data.extend_from_slice(path.as_bytes());

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::TruncatePath, data, Vec::new()).await?;
        Ok(())
    }

    pub async fn make_link(&self, link: LinkType, target: &str, linkname: &str) -> Result<()> {
        let mut data = Vec::with_capacity(8 + target.len() + linkname.len() + 2);
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, link as u64)?;
        data.extend_from_slice(target.as_bytes());
        data.push(0);
        data.extend_from_slice(linkname.as_bytes());
        data.push(0);

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::MakeLink, data, Vec::new()).await?;
        Ok(())
    }

    /// Set a path's modification time.
    pub async fn set_file_time(&self, path: &str, mtime: SystemTime) -> Result<()> {
        let nanos = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut data = Vec::with_capacity(8 + path.len() + 1);
        WriteBytesExt::write_u64::<LittleEndian>(&mut data, nanos)?;
        data.extend_from_slice(path.as_bytes());
        data.push(0);

        let mut conn = self.conn.lock().await;
        transact(&mut conn, Operation::SetFileTime, data, Vec::new()).await?;
        Ok(())
    }

    /// Remove a path and everything under it in a single device operation.
    pub async fn remove_path_and_contents(&self, path: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        transact(
            &mut conn,
            Operation::RemovePathAndContents,
            path.as_bytes().to_vec(),
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    /// Device-level key/value facts (model, capacity, block size).
    pub async fn device_info(&self) -> Result<Vec<(String, String)>> {
        let response = {
            let mut conn = self.conn.lock().await;
            transact(&mut conn, Operation::DeviceInfo, Vec::new(), Vec::new()).await?
        };

        stat::parse_kv_pairs(&response.payload)
    }
}

/// One transaction: snapshot and bump the packet number, write the request,
/// read the response, translate a non-zero status into an error.
async fn transact(
    conn: &mut Conn,
    operation: Operation,
    header_payload: Vec<u8>,
    payload: Vec<u8>,
) -> Result<Packet> {
    let packet = Packet::request(operation, conn.packet_num, header_payload, payload);
    conn.packet_num += 1;

    let mut buf = BytesMut::with_capacity(packet.header.entire_len as usize).writer();
    packet.encode(&mut buf)?;
    conn.stream.write_all(&buf.into_inner()).await?;

    let response = read_packet(&mut conn.stream).await?;
    response.check_status()?;
    Ok(response)
}

async fn tell_locked(conn: &mut Conn, fd: u64) -> Result<u64> {
    let mut data = Vec::with_capacity(8);
    WriteBytesExt::write_u64::<LittleEndian>(&mut data, fd)?;
    let response = transact(conn, Operation::FileTell, data, Vec::new()).await?;
    read_u64_result(&response)
}

/// Read one packet off the stream: exactly 40 header bytes, then the two
/// payload sections the header declares.
pub(crate) async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Packet> {
    let mut hdr = [0u8; HEADER_SIZE as usize];
    stream.read_exact(&mut hdr).await?;
    let header = PacketHeader::decode(&mut Cursor::new(&hdr[..]))?;

    let mut header_payload = vec![0u8; header.header_payload_len()];
    stream.read_exact(&mut header_payload).await?;
    let mut payload = vec![0u8; header.payload_len()];
    stream.read_exact(&mut payload).await?;

    Ok(Packet {
        header,
        header_payload,
        payload,
    })
}

fn read_u64_result(response: &Packet) -> Result<u64> {
    if response.header_payload.len() < 8 {
        return Err(Error::Io(io_err!(
            InvalidData,
            "response header payload shorter than 8 bytes"
        )));
    }
    let mut r = &response.header_payload[..];
    Ok(ReadBytesExt::read_u64::<LittleEndian>(&mut r)?)
}

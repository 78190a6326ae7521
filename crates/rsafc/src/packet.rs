//! AFC packet framing: serialize/deserialize protocol packets into/from binary.
//!
//! Every packet starts with a fixed 40-byte little-endian header followed by
//! two variable-length sections: the header payload (structured operation
//! arguments) and the content payload (bulk bytes).

use std::io::{Read, Write};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use enum_primitive::*;
use num_traits::FromPrimitive;

use crate::error::{AfcStatus, Error};
use crate::utils::Result;
use crate::{io_err, res};

/// Protocol magic, the ASCII bytes `CFA6LPAA` read as a little-endian u64.
pub const MAGIC: u64 = 0x4141_504c_3641_4643;

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: u64 = 40;

enum_from_primitive! {
    #[doc = "AFC operation codes."]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Operation {
        Status                  = 0x01,
        Data                    = 0x02,
        ReadDir                 = 0x03,
        ReadFile                = 0x04, // legacy
        WriteFile               = 0x05, // legacy
        WritePart               = 0x06,
        TruncatePath            = 0x07,
        RemovePath              = 0x08,
        MakeDir                 = 0x09,
        FileInfo                = 0x0a,
        DeviceInfo              = 0x0b,
        WriteFileAtomic         = 0x0c,
        FileOpen                = 0x0d,
        FileOpenResult          = 0x0e,
        FileRead                = 0x0f,
        FileWrite               = 0x10,
        FileSeek                = 0x11,
        FileTell                = 0x12,
        FileTellResult          = 0x13,
        FileClose               = 0x14,
        FileSetSize             = 0x15,
        GetConnInfo             = 0x16,
        SetConnOptions          = 0x17,
        RenamePath              = 0x18,
        SetFsBlockSize          = 0x19,
        SetSockBlockSize        = 0x1a,
        FileLock                = 0x1b,
        MakeLink                = 0x1c,
        SetFileTime             = 0x1e,
        FileHashRange           = 0x1f,
        SetImmutableHint        = 0x20,
        SizeOfPathContents      = 0x21,
        RemovePathAndContents   = 0x22,
        DirOpen                 = 0x23,
        DirOpenResult           = 0x24,
        DirRead                 = 0x25,
        DirClose                = 0x26,
        ReadOffset              = 0x27,
        WriteOffset             = 0x28,
    }
}

enum_from_primitive! {
    #[doc = "Open modes accepted by `FileOpen`, mirroring fopen(3) strings."]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum OpenMode {
        ReadOnly            = 1, // r
        ReadWrite           = 2, // r+
        WriteTruncate       = 3, // w
        ReadWriteTruncate   = 4, // w+
        Append              = 5, // a
        ReadAppend          = 6, // a+
    }
}

enum_from_primitive! {
    #[doc = "Link kinds accepted by `MakeLink`."]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LinkType {
        Hard    = 1,
        Symlink = 2,
    }
}

bitflags! {
    /// Portable open flags, translated to an [`OpenMode`] at open time.
    ///
    /// Read-only access is the empty word, as with `O_RDONLY`. Permission
    /// bits have no equivalent; the device ignores them.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
    pub struct OpenFlags: u32 {
        const WRITE  = 0x0001;
        const RDWR   = 0x0002;
        const CREATE = 0x0040;
        const TRUNC  = 0x0200;
        const APPEND = 0x0400;
    }
}

impl OpenFlags {
    /// Read-only access, the empty flag word.
    pub const READ: OpenFlags = OpenFlags::empty();

    const ACCMODE: u32 = 0x3;

    fn access(self) -> u32 {
        self.bits() & Self::ACCMODE
    }
}

impl OpenMode {
    /// Map portable open flags onto the device open mode.
    ///
    /// Plain write access without `TRUNC` or `APPEND` opens read/write, the
    /// only creating mode the device offers that preserves existing bytes.
    pub fn from_flags(flags: OpenFlags) -> Result<OpenMode> {
        let mode = match flags.access() {
            0 => OpenMode::ReadOnly,
            1 if flags.contains(OpenFlags::TRUNC) => OpenMode::WriteTruncate,
            1 if flags.contains(OpenFlags::APPEND) => OpenMode::Append,
            1 => OpenMode::ReadWrite,
            2 if flags.contains(OpenFlags::TRUNC) => OpenMode::ReadWriteTruncate,
            2 if flags.contains(OpenFlags::APPEND) => OpenMode::ReadAppend,
            2 => OpenMode::ReadWrite,
            _ => return Err(Error::InvalidFlag),
        };
        Ok(mode)
    }
}

/// The fixed 40-byte packet header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u64,
    /// Total packet size including the header.
    pub entire_len: u64,
    /// Header plus header-payload size; the content payload follows.
    pub this_len: u64,
    pub packet_num: u64,
    pub operation: u64,
}

impl PacketHeader {
    pub fn encode<W: WriteBytesExt>(&self, w: &mut W) -> std::io::Result<usize> {
        w.write_u64::<LittleEndian>(self.magic)?;
        w.write_u64::<LittleEndian>(self.entire_len)?;
        w.write_u64::<LittleEndian>(self.this_len)?;
        w.write_u64::<LittleEndian>(self.packet_num)?;
        w.write_u64::<LittleEndian>(self.operation)?;
        Ok(HEADER_SIZE as usize)
    }

    pub fn decode<R: ReadBytesExt>(r: &mut R) -> Result<PacketHeader> {
        let magic = r.read_u64::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(Error::WrongMagic { found: magic });
        }
        let header = PacketHeader {
            magic,
            entire_len: r.read_u64::<LittleEndian>()?,
            this_len: r.read_u64::<LittleEndian>()?,
            packet_num: r.read_u64::<LittleEndian>()?,
            operation: r.read_u64::<LittleEndian>()?,
        };
        if header.this_len < HEADER_SIZE || header.entire_len < header.this_len {
            return res!(io_err!(
                InvalidData,
                format!(
                    "invalid packet lengths: entire={} this={}",
                    header.entire_len, header.this_len
                )
            ));
        }
        Ok(header)
    }

    /// The declared header-payload length.
    pub fn header_payload_len(&self) -> usize {
        (self.this_len - HEADER_SIZE) as usize
    }

    /// The declared content-payload length.
    pub fn payload_len(&self) -> usize {
        (self.entire_len - self.this_len) as usize
    }
}

/// One unit of protocol exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub header_payload: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build a request packet, computing both length fields.
    pub fn request(
        operation: Operation,
        packet_num: u64,
        header_payload: Vec<u8>,
        payload: Vec<u8>,
    ) -> Packet {
        Packet {
            header: PacketHeader {
                magic: MAGIC,
                entire_len: HEADER_SIZE + (header_payload.len() + payload.len()) as u64,
                this_len: HEADER_SIZE + header_payload.len() as u64,
                packet_num,
                operation: operation as u64,
            },
            header_payload,
            payload,
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> std::io::Result<usize> {
        let mut bytes = self.header.encode(w)?;
        w.write_all(&self.header_payload)?;
        bytes += self.header_payload.len();
        w.write_all(&self.payload)?;
        bytes += self.payload.len();
        Ok(bytes)
    }

    /// Read one packet. Short reads of any section are fatal for the packet.
    pub fn decode<R: Read>(r: &mut R) -> Result<Packet> {
        let header = PacketHeader::decode(r)?;
        let mut header_payload = vec![0u8; header.header_payload_len()];
        r.read_exact(&mut header_payload)?;
        let mut payload = vec![0u8; header.payload_len()];
        r.read_exact(&mut payload)?;
        Ok(Packet {
            header,
            header_payload,
            payload,
        })
    }

    /// The operation code, if it is one this crate knows.
    pub fn operation(&self) -> Option<Operation> {
        Operation::from_u64(self.header.operation)
    }

    /// The raw status code of a status packet; `None` for any other
    /// operation.
    pub fn status_code(&self) -> Option<u64> {
        if self.header.operation != Operation::Status as u64 {
            return None;
        }
        let mut r = &self.header_payload[..];
        r.read_u64::<LittleEndian>().ok()
    }

    /// Translate a status response into an error, treating every non-status
    /// operation as success.
    pub fn check_status(&self) -> Result<()> {
        if self.header.operation != Operation::Status as u64 {
            return Ok(());
        }
        match self.status_code() {
            Some(0) => Ok(()),
            Some(code) => AfcStatus::from_code(code).into_result(),
            None => res!(io_err!(InvalidData, "status packet shorter than 8 bytes")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Packet {
        Packet::request(
            Operation::FileInfo,
            7,
            b"/var/mobile".to_vec(),
            b"bulk".to_vec(),
        )
    }

    #[test]
    fn round_trip() {
        let expected = sample();
        let mut buf = Vec::new();
        let n = expected.encode(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(buf.len() as u64, expected.header.entire_len);

        let actual = Packet::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn short_header_is_an_error() {
        let mut buf = Vec::new();
        sample().encode(&mut buf).unwrap();
        buf.truncate(20);
        assert!(matches!(
            Packet::decode(&mut Cursor::new(buf)),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn short_payload_is_an_error() {
        let mut buf = Vec::new();
        sample().encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            Packet::decode(&mut Cursor::new(buf)),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn altered_magic_is_rejected() {
        let mut buf = Vec::new();
        sample().encode(&mut buf).unwrap();
        buf[0] ^= 0xff;
        match Packet::decode(&mut Cursor::new(buf)) {
            Err(Error::WrongMagic { found }) => assert_ne!(found, MAGIC),
            other => panic!("expected wrong magic, got {:?}", other),
        }
    }

    #[test]
    fn status_extraction() {
        let mut header_payload = Vec::new();
        header_payload
            .write_u64::<LittleEndian>(AfcStatus::ObjectNotFound as u64)
            .unwrap();
        let p = Packet::request(Operation::Status, 0, header_payload, Vec::new());
        assert_eq!(p.status_code(), Some(8));
        assert!(matches!(
            p.check_status(),
            Err(Error::Status(AfcStatus::ObjectNotFound))
        ));
    }

    #[test]
    fn non_status_operations_carry_no_status() {
        let p = Packet::request(Operation::Data, 0, vec![1, 2, 3, 4, 5, 6, 7, 8], Vec::new());
        assert_eq!(p.status_code(), None);
        assert!(p.check_status().is_ok());
    }

    #[test]
    fn flag_table_matches_device_modes() {
        use OpenFlags as F;
        let cases = [
            (F::READ, OpenMode::ReadOnly),
            (F::WRITE | F::TRUNC, OpenMode::WriteTruncate),
            (F::WRITE | F::APPEND, OpenMode::Append),
            (F::WRITE, OpenMode::ReadWrite),
            (F::RDWR | F::TRUNC, OpenMode::ReadWriteTruncate),
            (F::RDWR | F::APPEND, OpenMode::ReadAppend),
            (F::RDWR, OpenMode::ReadWrite),
            (F::WRITE | F::CREATE, OpenMode::ReadWrite),
        ];
        for (flags, mode) in cases {
            assert_eq!(OpenMode::from_flags(flags).unwrap(), mode, "{:?}", flags);
        }
    }

    #[test]
    fn conflicting_access_bits_are_rejected() {
        let flags = OpenFlags::WRITE | OpenFlags::RDWR;
        assert!(matches!(
            OpenMode::from_flags(flags),
            Err(Error::InvalidFlag)
        ));
    }
}

//! Error types returned by the AFC client.

use std::fmt;
use std::io;

use enum_primitive::*;
use num_traits::FromPrimitive;

use crate::packet;

enum_from_primitive! {
    #[doc = "Status codes carried in the header payload of a status packet."]
    #[doc = ""]
    #[doc = "`Success` is the null error; every other value is reported to the"]
    #[doc = "caller as [`Error::Status`]."]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum AfcStatus {
        Success                 = 0,
        UnknownError            = 1,
        OperationHeaderInvalid  = 2,
        NoResources             = 3,
        ReadError               = 4,
        WriteError              = 5,
        UnknownPacketType       = 6,
        InvalidArgument         = 7,
        ObjectNotFound          = 8,
        ObjectIsDir             = 9,
        PermDenied              = 10,
        ServiceNotConnected     = 11,
        OperationTimeout        = 12,
        TooMuchData             = 13,
        EndOfData               = 14,
        OperationNotSupported   = 15,
        ObjectExists            = 16,
        ObjectBusy              = 17,
        NoSpaceLeft             = 18,
        OperationWouldBlock     = 19,
        IoError                 = 20,
        OperationInterrupted    = 21,
        OperationInProgress     = 22,
        InternalError           = 23,
        MuxError                = 30,
        NoMemory                = 31,
        NotEnoughData           = 32,
        DirNotEmpty             = 33,
    }
}

impl AfcStatus {
    /// Map a raw wire code to a status, folding codes outside the known
    /// set into `UnknownError`.
    pub fn from_code(code: u64) -> AfcStatus {
        AfcStatus::from_u64(code).unwrap_or(AfcStatus::UnknownError)
    }

    /// Convert a status into a `Result`, treating `Success` as `Ok`.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            AfcStatus::Success => Ok(()),
            status => Err(Error::Status(status)),
        }
    }
}

impl fmt::Display for AfcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The error type for every fallible operation in this crate.
#[derive(Debug)]
pub enum Error {
    /// The device answered a transaction with a non-zero status code.
    Status(AfcStatus),
    /// Transport-level failure.
    Io(io::Error),
    /// The response header did not start with the AFC magic.
    WrongMagic { found: u64 },
    /// The device returned descriptor 0 from a file-open request.
    FdZero,
    /// The portable open flags do not map onto any AFC open mode.
    InvalidFlag,
    /// No mount prefix matches the path. Routed operations refuse the path
    /// the same way a permission check would.
    NoMount(String),
    /// A file-info response held an odd number of NUL-separated fields.
    InvalidStatPayload { fields: usize },
    /// The device returned more bytes than the read request asked for.
    OversizedRead { requested: usize, returned: usize },
    /// mkdir_all found an existing non-directory at the path.
    NotDirectory(String),
    /// Operation-level context for an underlying error.
    Path {
        op: &'static str,
        path: String,
        source: Box<Error>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Status(status) => write!(f, "device returned {}", status),
            Error::Io(err) => write!(f, "{}", err),
            Error::WrongMagic { found } => {
                write!(
                    f,
                    "wrong magic: {:#018x}, expected {:#018x}",
                    found,
                    packet::MAGIC
                )
            }
            Error::FdZero => write!(f, "file descriptor should not be zero"),
            Error::InvalidFlag => write!(f, "invalid flag"),
            Error::NoMount(path) => {
                write!(f, "no mount matches {:?}: permission denied", path)
            }
            Error::InvalidStatPayload { fields } => {
                write!(f, "invalid file-info response: {} % 2 != 0", fields)
            }
            Error::OversizedRead {
                requested,
                returned,
            } => {
                write!(
                    f,
                    "device returned {} bytes for a {} byte read",
                    returned, requested
                )
            }
            Error::NotDirectory(path) => {
                write!(f, "path {:?} is not a directory", path)
            }
            Error::Path { op, path, source } => {
                write!(f, "{} {:?}: {}", op, path, source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Path { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl Error {
    /// The device status behind this error, if there is one.
    pub fn status(&self) -> Option<AfcStatus> {
        match self {
            Error::Status(status) => Some(*status),
            Error::Path { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether this error means the path does not exist on the device.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(AfcStatus::ObjectNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_code_covers_taxonomy() {
        assert_eq!(AfcStatus::from_code(0), AfcStatus::Success);
        assert_eq!(AfcStatus::from_code(8), AfcStatus::ObjectNotFound);
        assert_eq!(AfcStatus::from_code(23), AfcStatus::InternalError);
        assert_eq!(AfcStatus::from_code(30), AfcStatus::MuxError);
        assert_eq!(AfcStatus::from_code(33), AfcStatus::DirNotEmpty);
    }

    #[test]
    fn unknown_codes_fold_to_unknown_error() {
        assert_eq!(AfcStatus::from_code(24), AfcStatus::UnknownError);
        assert_eq!(AfcStatus::from_code(0xdead), AfcStatus::UnknownError);
    }

    #[test]
    fn success_is_the_null_error() {
        assert!(AfcStatus::Success.into_result().is_ok());
        assert!(matches!(
            AfcStatus::PermDenied.into_result(),
            Err(Error::Status(AfcStatus::PermDenied))
        ));
    }

    #[test]
    fn path_error_keeps_the_source_status() {
        let err = Error::Path {
            op: "open",
            path: "/missing".to_owned(),
            source: Box::new(Error::Status(AfcStatus::ObjectNotFound)),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "open \"/missing\": device returned ObjectNotFound");
    }
}

use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Last component of a slash-separated device path.
///
/// Device paths are plain `/`-separated byte strings; `std::path` must not
/// be used here because its separator depends on the host OS.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Join two device path components with a single `/`.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_owned();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_plain() {
        assert_eq!(basename("/var/mobile/Media"), "Media");
        assert_eq!(basename("/var/mobile/Media/"), "Media");
        assert_eq!(basename("file.txt"), "file.txt");
    }

    #[test]
    fn basename_degenerate() {
        assert_eq!(basename("/"), "/");
        assert_eq!(basename(""), ".");
    }

    #[test]
    fn join_strips_doubled_separator() {
        assert_eq!(join("/DCIM/", "IMG_0001.JPG"), "/DCIM/IMG_0001.JPG");
        assert_eq!(join("/DCIM", "IMG_0001.JPG"), "/DCIM/IMG_0001.JPG");
        assert_eq!(join("", "IMG_0001.JPG"), "IMG_0001.JPG");
    }
}

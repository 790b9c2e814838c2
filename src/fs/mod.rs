//! # File System Module
//!
//! The `ps2mc` submodule imposes the PS2 memory card file system on a
//! `CardImage`.  The `Card` object takes ownership of the image and uses
//! it as storage; changes are not durable until `flush` (or `close`).
//!
//! Directory entry names and icon titles are byte strings on the card,
//! nominally Shift-JIS.  The conversion tables are deliberately kept out
//! of this crate; the `TextEncoder` trait is the seam where a richer
//! encoder can be plugged in.  The built in `AsciiEncoder` passes ASCII
//! through and hex-escapes everything else.

pub mod ps2mc;

/// Enumerates file system errors.  The `Display` trait will print the equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("path not found")]
    PathNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("directory not found")]
    DirectoryNotFound,
    #[error("index past end of directory")]
    DirIndexOutOfRange,
    #[error("not a directory")]
    NotADirectory,
    #[error("not a regular file")]
    IsADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file is in use")]
    Busy,
    #[error("out of space on image")]
    NoSpace,
    #[error("file not opened for writing")]
    ReadOnly,
    #[error("access denied")]
    AccessDenied,
    #[error("file is closed")]
    Closed,
    #[error("corrupt filesystem: {0}")]
    Corrupt(String)
}

/// This converts between UTF8 and the byte strings stored on the card
pub trait TextEncoder {
    fn encode(&self,txt: &str) -> Option<Vec<u8>>;
    fn decode(&self,raw: &[u8]) -> Option<String>;
}

/// Encoder that knows nothing of Shift-JIS: ASCII passes through,
/// anything else round-trips as a hex escape.
pub struct AsciiEncoder;

impl TextEncoder for AsciiEncoder {
    fn encode(&self,txt: &str) -> Option<Vec<u8>> {
        Some(crate::parse_escaped_ascii(txt))
    }
    fn decode(&self,raw: &[u8]) -> Option<String> {
        Some(crate::escaped_ascii_from_bytes(raw))
    }
}

/// convenience for call sites that want a string no matter what
pub fn display_name(raw: &[u8]) -> String {
    match AsciiEncoder.decode(raw) {
        Some(s) => s,
        None => String::new()
    }
}

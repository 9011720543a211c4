use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::uuencode::core::{LINE_CAPACITY, UuError, decode_line, validate_file_name};

/// Largest mode accepted from a `begin` line (permission plus setuid/setgid/sticky bits).
const MODE_MASK: u32 = 0o7777;

/// Parsed `begin <mode> <name>` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub mode: u32,
    pub name: String,
}

/// Payload of one envelope together with its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    pub header: Header,
    pub data: Vec<u8>,
}

/// Errors that can occur while reading a uuencoded envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No line starting with `begin ` was found.
    #[error("no `begin' line")]
    MissingBegin,
    /// The `begin` line has a malformed mode or file name.
    #[error("invalid `begin' line: {0}")]
    InvalidHeader(String),
    /// An encoded line failed to decode. `line` is 1-based.
    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: UuError,
    },
    /// Characters other than a CR follow the encoded data of a line.
    #[error("line {line}: trailing characters after encoded data")]
    TrailingGarbage { line: usize },
    /// Input ended before the terminator line.
    #[error("short file")]
    UnexpectedEof,
    /// The terminator line is not followed by `end`.
    #[error("no `end' line")]
    MissingEnd,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Splits a buffer into lines with memchr, tracking 1-based line numbers.
/// The `\n` is not included in the returned line.
struct LineReader<'a> {
    buf: &'a [u8],
    offset: usize,
    line_no: usize,
}

impl<'a> LineReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        LineReader {
            buf,
            offset: 0,
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> Option<(usize, &'a [u8])> {
        if self.offset >= self.buf.len() {
            return None;
        }

        self.line_no += 1;
        let left = &self.buf[self.offset..];
        match memchr::memchr(b'\n', left) {
            Some(p) => {
                self.offset += p + 1;
                Some((self.line_no, &left[..p]))
            }
            None => {
                self.offset = self.buf.len();
                Some((self.line_no, left))
            }
        }
    }
}

#[inline]
fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse a `begin <octal mode> <name>` line.
/// The name is everything after the first space following the mode, and
/// must pass the same checks the encoder applies.
pub fn parse_header(line: &[u8]) -> Result<Header, DecodeError> {
    let line = strip_cr(line);
    let invalid = || DecodeError::InvalidHeader(String::from_utf8_lossy(line).into_owned());

    let rest = line.strip_prefix(b"begin ").ok_or_else(invalid)?;
    let sp = memchr::memchr(b' ', rest).ok_or_else(invalid)?;
    let (digits, name) = (&rest[..sp], &rest[sp + 1..]);

    if digits.is_empty() || !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
        return Err(invalid());
    }
    let mode = digits
        .iter()
        .try_fold(0u32, |acc, &d| {
            let v = acc * 8 + u32::from(d - b'0');
            (v <= MODE_MASK).then_some(v)
        })
        .ok_or_else(invalid)?;

    let name = std::str::from_utf8(name).map_err(|_| invalid())?;
    validate_file_name(name).map_err(|_| invalid())?;

    Ok(Header {
        mode,
        name: name.to_string(),
    })
}

/// Decode the first envelope found in `data`.
///
/// Anything before the `begin` line is skipped. Every body line must decode
/// cleanly and carry nothing after its encoded characters except an optional
/// CR. The terminator line must be followed by `end`.
pub fn decode_file(data: &[u8]) -> Result<DecodedFile, DecodeError> {
    let mut lines = LineReader::new(data);

    let header = loop {
        match lines.next_line() {
            Some((_, line)) if line.starts_with(b"begin ") => break parse_header(line)?,
            Some(_) => continue,
            None => return Err(DecodeError::MissingBegin),
        }
    };

    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    let mut buf = [0u8; LINE_CAPACITY];
    loop {
        let (line_no, line) = lines.next_line().ok_or(DecodeError::UnexpectedEof)?;
        let mut rest = strip_cr(line);
        let decoded = decode_line(&mut rest, &mut buf)
            .map_err(|source| DecodeError::Line {
                line: line_no,
                source,
            })?;
        if !rest.is_empty() {
            return Err(DecodeError::TrailingGarbage { line: line_no });
        }
        if decoded.is_empty() {
            break;
        }
        out.extend_from_slice(decoded);
    }

    match lines.next_line() {
        Some((_, line)) if line.trim_ascii_end() == b"end" => Ok(DecodedFile { header, data: out }),
        _ => Err(DecodeError::MissingEnd),
    }
}

/// Stream-decode from a reader. Used for stdin processing.
pub fn decode_stream(reader: &mut impl Read) -> Result<DecodedFile, DecodeError> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    decode_file(&data)
}

/// Write the decoded payload to `dest` and apply the header's mode.
pub fn write_decoded(file: &DecodedFile, dest: &Path) -> io::Result<()> {
    let mut out = fs::File::create(dest)?;
    out.write_all(&file.data)?;
    out.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(file.header.mode & MODE_MASK))?;
    }
    Ok(())
}

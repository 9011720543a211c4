use std::io::{self, BufWriter, Read, Write};

use thiserror::Error;

use crate::common::io::read_full;

/// Maximum number of raw bytes one encoded line can carry.
pub const LINE_CAPACITY: usize = 45;

/// Longest encoded line: length prefix plus 15 four-character groups.
pub const MAX_LINE_LEN: usize = 1 + LINE_CAPACITY / 3 * 4;

/// Permission mode written to the header when the caller supplies none.
pub const DEFAULT_MODE: u32 = 0o644;

/// Encoded form of a zero-length line. Marks the end of the payload.
pub const TERMINATOR: u8 = b'`';

/// Input bytes encoded per batched write: whole lines only, ~1.4MB.
const BODY_CHUNK: usize = LINE_CAPACITY * 32 * 1024;

/// Errors produced by the block and line codecs and the envelope writer.
#[derive(Debug, Error)]
pub enum UuError {
    /// A chunk longer than 45 bytes was offered to `encode_line`.
    #[error("line payload of {0} bytes exceeds the 45 byte limit")]
    InputTooLarge(usize),
    /// A byte outside the uuencode alphabet was found in the length prefix or data.
    #[error("illegal character 0x{0:02x} in encoded input")]
    IllegalCharacter(u8),
    /// Fewer encoded characters were available than the length prefix declares.
    #[error("unexpected end of encoded input")]
    EndOfStream(#[source] io::Error),
    /// The header file name contains CR, LF or a path separator.
    #[error("illegal file name {0:?}")]
    IllegalFileName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Map a 6-bit value to its alphabet character. Zero is written as a backtick
/// so encoded lines never carry spaces.
#[inline]
fn encode_char(v: u8) -> u8 {
    if v == 0 { TERMINATOR } else { 0x20 + v }
}

/// Map an alphabet character back to its 6-bit value.
/// Space and backtick both decode to zero.
#[inline]
fn decode_char(c: u8) -> Result<u8, UuError> {
    match c {
        b' ' | b'`' => Ok(0),
        0x21..=0x5f => Ok(c - 0x20),
        _ => Err(UuError::IllegalCharacter(c)),
    }
}

/// Encode 3 raw bytes as 4 alphabet characters, most significant 6 bits first.
#[inline]
pub fn encode_block(block: [u8; 3]) -> [u8; 4] {
    let n = u32::from_be_bytes([0, block[0], block[1], block[2]]);
    [
        encode_char((n >> 18) as u8 & 0x3f),
        encode_char((n >> 12) as u8 & 0x3f),
        encode_char((n >> 6) as u8 & 0x3f),
        encode_char(n as u8 & 0x3f),
    ]
}

/// Decode 4 alphabet characters back into 3 raw bytes.
/// Fails on the first character outside the alphabet.
#[inline]
pub fn decode_block(encoded: [u8; 4]) -> Result<[u8; 3], UuError> {
    let mut n = 0u32;
    for &c in &encoded {
        n = (n << 6) | u32::from(decode_char(c)?);
    }
    let [_, a, b, c] = n.to_be_bytes();
    Ok([a, b, c])
}

/// Number of characters `encode_line` emits for a payload of `len` bytes,
/// excluding the line break.
#[inline]
pub fn encoded_line_len(len: usize) -> usize {
    if len == 0 { 1 } else { 1 + len.div_ceil(3) * 4 }
}

/// Encode up to 45 bytes as one length-prefixed line (no line break).
/// An empty payload produces the bare backtick terminator line.
/// Payloads over 45 bytes fail with `InputTooLarge` before anything is written.
pub fn encode_line(payload: &[u8], out: &mut impl Write) -> Result<(), UuError> {
    if payload.len() > LINE_CAPACITY {
        return Err(UuError::InputTooLarge(payload.len()));
    }
    if payload.is_empty() {
        out.write_all(&[TERMINATOR])?;
        return Ok(());
    }

    // Build the whole line on the stack, then a single write.
    let mut line = [0u8; MAX_LINE_LEN];
    line[0] = encode_char(payload.len() as u8);
    let mut wp = 1;
    for chunk in payload.chunks(3) {
        // Final partial group is zero-padded; the prefix governs decode length.
        let mut block = [0u8; 3];
        block[..chunk.len()].copy_from_slice(chunk);
        line[wp..wp + 4].copy_from_slice(&encode_block(block));
        wp += 4;
    }
    out.write_all(&line[..wp])?;
    Ok(())
}

/// Decode one encoded line from `reader` into `buf`, returning the payload.
///
/// Reads the length prefix and then exactly `ceil(len / 3) * 4` characters.
/// A zero-length line returns immediately without reading further. Anything
/// following the encoded characters (line break, trailing garbage) is left
/// unread for the caller to deal with.
pub fn decode_line<'a>(
    reader: &mut impl Read,
    buf: &'a mut [u8; LINE_CAPACITY],
) -> Result<&'a [u8], UuError> {
    let mut prefix = [0u8; 1];
    read_encoded(reader, &mut prefix)?;
    let len = decode_char(prefix[0])? as usize;
    if len > LINE_CAPACITY {
        return Err(UuError::IllegalCharacter(prefix[0]));
    }
    if len == 0 {
        return Ok(&buf[..0]);
    }

    let enc_len = len.div_ceil(3) * 4;
    let mut encoded = [0u8; MAX_LINE_LEN - 1];
    read_encoded(reader, &mut encoded[..enc_len])?;

    // 45 is a multiple of 3, so every padded group still fits in buf.
    for (i, g) in encoded[..enc_len].chunks_exact(4).enumerate() {
        let block = decode_block([g[0], g[1], g[2], g[3]])?;
        buf[i * 3..i * 3 + 3].copy_from_slice(&block);
    }
    Ok(&buf[..len])
}

/// read_exact, with a short read reported as `EndOfStream`.
fn read_encoded(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), UuError> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            UuError::EndOfStream(e)
        } else {
            UuError::Io(e)
        }
    })
}

/// Check that `name` can sit at the end of a `begin` line.
pub fn validate_file_name(name: &str) -> Result<(), UuError> {
    if name.is_empty()
        || name
            .bytes()
            .any(|b| matches!(b, b'\r' | b'\n' | b'/' | b'\\'))
    {
        return Err(UuError::IllegalFileName(name.to_string()));
    }
    Ok(())
}

/// Encode `data` as a complete envelope: `begin` header, encoded lines,
/// terminator line and `end` trailer. `mode` defaults to 0644.
///
/// The file name is validated before anything is written.
pub fn encode_file(
    name: &str,
    mode: Option<u32>,
    data: &[u8],
    out: &mut impl Write,
) -> Result<(), UuError> {
    write_header(name, mode, out)?;
    write_body(data, out)?;
    write_trailer(out)
}

/// Stream-encode from a reader to a writer. Used for stdin processing.
/// Produces the same envelope as `encode_file` with bounded memory.
pub fn encode_stream(
    reader: &mut impl Read,
    name: &str,
    mode: Option<u32>,
    writer: &mut impl Write,
) -> Result<(), UuError> {
    let mut out = BufWriter::with_capacity(256 * 1024, writer);
    write_header(name, mode, &mut out)?;

    // read_full only comes back short at EOF, and BODY_CHUNK is a whole
    // number of lines, so line boundaries match the in-memory encoder.
    let mut buf = vec![0u8; BODY_CHUNK];
    loop {
        let n = read_full(reader, &mut buf)?;
        if n == 0 {
            break;
        }
        write_body(&buf[..n], &mut out)?;
    }

    write_trailer(&mut out)?;
    out.flush()?;
    Ok(())
}

fn write_header(name: &str, mode: Option<u32>, out: &mut impl Write) -> Result<(), UuError> {
    validate_file_name(name)?;
    writeln!(out, "begin {:o} {}", mode.unwrap_or(DEFAULT_MODE), name)?;
    Ok(())
}

/// Encode `data` as consecutive full lines (last one may be short), each
/// followed by a line break. Lines are batched into a reusable buffer so
/// every ~1.4MB of input costs a single write.
fn write_body(data: &[u8], out: &mut impl Write) -> Result<(), UuError> {
    if data.is_empty() {
        return Ok(());
    }

    let batch = data.len().min(BODY_CHUNK);
    let mut buf = Vec::with_capacity(batch.div_ceil(LINE_CAPACITY) * (MAX_LINE_LEN + 1));

    for chunk in data.chunks(BODY_CHUNK) {
        buf.clear();
        for line in chunk.chunks(LINE_CAPACITY) {
            match encode_line(line, &mut buf) {
                Ok(()) => {}
                Err(UuError::InputTooLarge(n)) => {
                    unreachable!("{} byte chunk exceeds line capacity", n)
                }
                Err(e) => return Err(e),
            }
            buf.push(b'\n');
        }
        out.write_all(&buf)?;
    }
    Ok(())
}

fn write_trailer(out: &mut impl Write) -> Result<(), UuError> {
    out.write_all(b"`\nend\n")?;
    Ok(())
}

use crate::errors::ProtocolError;
use bytes::Bytes;

// Guards against absurd frame headers before any allocation happens.
const MAX_ARGS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// One fully parsed command frame. `frame_len` is the exact number of
/// bytes the frame occupied on the wire, length prefixes and CRLFs
/// included; replication offset accounting depends on this figure, so
/// it is measured from the input rather than re-derived from the args.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    pub args: Vec<Bytes>,
    pub frame_len: usize,
}

/// Parses one RESP array-of-bulk-strings frame from the front of
/// `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a prefix of a frame
/// (read more and retry), `Ok(Some(..))` with the parsed args and
/// consumed byte count, or `Err` when the bytes cannot be a frame at
/// all. The buffer itself is never advanced here; callers consume
/// exactly `frame_len` bytes on success and nothing otherwise.
pub fn parse_command(buf: &[u8]) -> Result<Option<ParsedCommand>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != b'*' {
        return Err(ProtocolError::Malformed);
    }
    let mut pos = 1;
    let num_args = match read_decimal_line(buf, &mut pos)? {
        Some(n) => n,
        None => return Ok(None),
    };
    if num_args == 0 || num_args > MAX_ARGS {
        return Err(ProtocolError::Malformed);
    }
    let mut args = Vec::with_capacity(num_args);
    for _ in 0..num_args {
        if pos >= buf.len() {
            return Ok(None);
        }
        if buf[pos] != b'$' {
            return Err(ProtocolError::Malformed);
        }
        pos += 1;
        let len = match read_decimal_line(buf, &mut pos)? {
            Some(n) => n,
            None => return Ok(None),
        };
        if len > MAX_BULK_LEN {
            return Err(ProtocolError::Malformed);
        }
        if buf.len() < pos + len + 2 {
            return Ok(None);
        }
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Err(ProtocolError::Malformed);
        }
        args.push(Bytes::copy_from_slice(&buf[pos..pos + len]));
        pos += len + 2;
    }
    Ok(Some(ParsedCommand {
        args,
        frame_len: pos,
    }))
}

fn read_decimal_line(buf: &[u8], pos: &mut usize) -> Result<Option<usize>, ProtocolError> {
    let start = *pos;
    let mut i = start;
    while i < buf.len() && buf[i] != b'\r' {
        if !buf[i].is_ascii_digit() {
            return Err(ProtocolError::Malformed);
        }
        i += 1;
    }
    if i + 1 >= buf.len() {
        return Ok(None);
    }
    if i == start || buf[i + 1] != b'\n' {
        return Err(ProtocolError::Malformed);
    }
    let text = std::str::from_utf8(&buf[start..i]).map_err(|_| ProtocolError::Malformed)?;
    let value = text.parse::<usize>().map_err(|_| ProtocolError::Malformed)?;
    *pos = i + 2;
    Ok(Some(value))
}

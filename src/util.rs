use crate::protocol_constants::*;

/// Canonical RESP array-of-bulk-strings encoding of a command.
/// Propagated frames and handshake commands are built through here so
/// byte accounting on both ends sees identical frames.
pub fn construct_redis_command(args: &[&[u8]]) -> Vec<u8> {
    let mut command = format!("{}{}{}", ARRAY_PREFIX, args.len(), CRLF).into_bytes();
    for arg in args {
        command.extend_from_slice(
            format!("{}{}{}", BULK_STRING_PREFIX, arg.len(), CRLF).as_bytes(),
        );
        command.extend_from_slice(arg);
        command.extend_from_slice(CRLF.as_bytes());
    }
    command
}

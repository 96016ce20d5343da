use crate::protocol_constants::*;
use crate::value_entry::{now_ms, ValueEntry};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use bytes::Bytes;
use crc::{Crc, CRC_64_REDIS};
use std::io::{self, Cursor, Read};
use tracing::{debug, warn};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

enum SizeValue {
    Len(usize),
    // 2-bit prefix 0b11: the low 6 bits select an integer encoding
    Special(u8),
}

/// Decoder for the snapshot subset this server understands: string
/// entries in database 0 with optional second/millisecond expiry,
/// auxiliary fields, resize hints, and the EOF checksum trailer.
///
/// Decoding is best effort. A bad magic number yields an error (the
/// file is not a snapshot); anything that goes wrong later simply
/// ends the parse with whatever entries were decoded up to that
/// point.
pub struct RdbParser<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> RdbParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn parse(&mut self) -> io::Result<Vec<(Bytes, ValueEntry)>> {
        self.verify_magic_number()?;
        self.read_version()?;
        Ok(self.process_entries())
    }

    fn verify_magic_number(&mut self) -> io::Result<()> {
        let mut magic = [0; 5];
        self.cursor.read_exact(&mut magic)?;
        if &magic[..] != MAGIC_NUMBER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not an RDB file",
            ));
        }
        Ok(())
    }

    fn read_version(&mut self) -> io::Result<()> {
        let mut version = [0; 4];
        self.cursor.read_exact(&mut version)?;
        debug!("RDB version {}", String::from_utf8_lossy(&version));
        Ok(())
    }

    fn process_entries(&mut self) -> Vec<(Bytes, ValueEntry)> {
        let mut entries = Vec::new();
        let mut current_db: usize = 0;
        loop {
            let opcode = match self.cursor.read_u8() {
                Ok(byte) => byte,
                Err(_) => break,
            };
            let result = match opcode {
                OPCODE_EOF => {
                    self.verify_checksum();
                    break;
                }
                OPCODE_META => self.skip_aux_field(),
                OPCODE_START_DB => self.read_db_selector(&mut current_db),
                OPCODE_SIZE => self.skip_resize_hint(),
                OPCODE_EXPIRETIME_MS | OPCODE_EXPIRETIME_S => {
                    self.read_expiring_entry(opcode, current_db, &mut entries)
                }
                OPCODE_STRING => self.read_plain_entry(current_db, &mut entries),
                other => {
                    debug!("unsupported RDB opcode 0x{:02X}, stopping", other);
                    break;
                }
            };
            if result.is_err() {
                debug!("truncated RDB entry, keeping what was loaded");
                break;
            }
        }
        entries
    }

    fn skip_aux_field(&mut self) -> io::Result<()> {
        self.read_string()?;
        self.read_string()?;
        Ok(())
    }

    fn read_db_selector(&mut self, current_db: &mut usize) -> io::Result<()> {
        *current_db = self.read_length()?;
        Ok(())
    }

    fn skip_resize_hint(&mut self) -> io::Result<()> {
        self.read_length()?;
        self.read_length()?;
        Ok(())
    }

    fn read_expiring_entry(
        &mut self,
        opcode: u8,
        current_db: usize,
        entries: &mut Vec<(Bytes, ValueEntry)>,
    ) -> io::Result<()> {
        let expires_at_ms = if opcode == OPCODE_EXPIRETIME_S {
            u64::from(self.cursor.read_u32::<LittleEndian>()?) * 1000
        } else {
            self.cursor.read_u64::<LittleEndian>()?
        };
        let value_type = self.cursor.read_u8()?;
        if value_type != OPCODE_STRING {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported value type",
            ));
        }
        let key = self.read_string()?;
        let value = self.read_string()?;
        if current_db == 0 && expires_at_ms > now_ms() {
            entries.push((
                Bytes::from(key),
                ValueEntry::new_absolute(Bytes::from(value), Some(expires_at_ms)),
            ));
        }
        Ok(())
    }

    fn read_plain_entry(
        &mut self,
        current_db: usize,
        entries: &mut Vec<(Bytes, ValueEntry)>,
    ) -> io::Result<()> {
        let key = self.read_string()?;
        let value = self.read_string()?;
        if current_db == 0 {
            entries.push((
                Bytes::from(key),
                ValueEntry::new_absolute(Bytes::from(value), None),
            ));
        }
        Ok(())
    }

    // The trailing 8 bytes after EOF. Zero means the writer disabled
    // checksumming; anything else is compared and only warned about,
    // a snapshot is never rejected over it.
    fn verify_checksum(&mut self) {
        let covered = self.cursor.position() as usize;
        let data = *self.cursor.get_ref();
        let stored = match self.cursor.read_u64::<LittleEndian>() {
            Ok(value) => value,
            Err(_) => return,
        };
        if stored == 0 {
            return;
        }
        let computed = CRC64.checksum(&data[..covered]);
        if computed != stored {
            warn!(
                "RDB checksum mismatch (stored {:016x}, computed {:016x})",
                stored, computed
            );
        }
    }

    fn read_size(&mut self) -> io::Result<SizeValue> {
        let first = self.cursor.read_u8()?;
        match first >> 6 {
            0b00 => Ok(SizeValue::Len((first & 0x3F) as usize)),
            0b01 => {
                let second = self.cursor.read_u8()?;
                Ok(SizeValue::Len(
                    (((first & 0x3F) as usize) << 8) | second as usize,
                ))
            }
            0b10 => Ok(SizeValue::Len(
                self.cursor.read_u32::<BigEndian>()? as usize
            )),
            _ => Ok(SizeValue::Special(first & 0x3F)),
        }
    }

    fn read_length(&mut self) -> io::Result<usize> {
        match self.read_size()? {
            SizeValue::Len(len) => Ok(len),
            SizeValue::Special(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "integer encoding where a length was expected",
            )),
        }
    }

    // Length-prefixed bytes, or an integer-as-string special encoding
    // rendered as its decimal text.
    fn read_string(&mut self) -> io::Result<Vec<u8>> {
        match self.read_size()? {
            SizeValue::Len(len) => {
                let mut data = vec![0; len];
                self.cursor.read_exact(&mut data)?;
                Ok(data)
            }
            SizeValue::Special(encoding) => {
                let value: i64 = match encoding {
                    0 => i64::from(self.cursor.read_i8()?),
                    1 => i64::from(self.cursor.read_i16::<LittleEndian>()?),
                    2 => i64::from(self.cursor.read_i32::<LittleEndian>()?),
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "unsupported string encoding",
                        ))
                    }
                };
                Ok(value.to_string().into_bytes())
            }
        }
    }
}

/// A valid snapshot of an empty database, byte-for-byte what the
/// replication bootstrap sends: header, two auxiliary fields,
/// database selector 0, EOF, and a zeroed (disabled) checksum.
pub fn empty_rdb() -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(MAGIC_NUMBER);
    out.extend_from_slice(RDB_VERSION);
    out.push(OPCODE_META);
    out.push(9);
    out.extend_from_slice(b"redis-ver");
    out.push(5);
    out.extend_from_slice(b"7.2.0");
    out.push(OPCODE_META);
    out.push(10);
    out.extend_from_slice(b"redis-bits");
    out.extend_from_slice(&[0xC0, 64]);
    out.push(OPCODE_START_DB);
    out.push(0);
    out.push(OPCODE_EOF);
    out.extend_from_slice(&[0u8; 8]);
    out
}

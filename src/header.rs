//! Plugin-file header parsing.
//!
//! Only the leading header record of a plugin file is read: enough to
//! answer whether the master bit is set and which masters the plugin
//! depends on. Record bodies and groups are never touched.

use crate::game::HeaderDialect;
use byteorder::{LittleEndian, ReadBytesExt};
use camino::Utf8Path;
use std::fs::File;
use std::io::{self, Cursor, Read};

/// The master bit in the header record's flags field.
const MASTER_FLAG: u32 = 0x0000_0001;

/// Upper bound on the header record's data size. Real headers stay well
/// below this even with large ONAM tables; anything bigger is a corrupt
/// size field.
const MAX_HEADER_DATA_SIZE: u32 = 0x0800_0000;

/// Parsed header record of a plugin file.
#[derive(Debug, Clone)]
pub struct PluginHeader {
    flags: u32,
    masters: Vec<String>,
}

impl PluginHeader {
    /// Whether the plugin is flagged as a master file.
    ///
    /// This is the header bit, not the file extension: an `.esp` file
    /// may carry it and then loads with the masters.
    pub fn is_master(&self) -> bool {
        self.flags & MASTER_FLAG != 0
    }

    /// The master files named by the header's `MAST` subrecords, in
    /// declaration order.
    pub fn masters(&self) -> &[String] {
        &self.masters
    }

    /// Read and parse the header record of the file at `path`.
    pub fn read(path: &Utf8Path, dialect: HeaderDialect) -> io::Result<PluginHeader> {
        let mut file = File::open(path)?;
        Self::parse(&mut file, dialect)
    }

    fn parse(file: &mut File, dialect: HeaderDialect) -> io::Result<PluginHeader> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        let expected: &[u8; 4] = match dialect {
            HeaderDialect::Tes3 => b"TES3",
            HeaderDialect::Tes4 | HeaderDialect::Tes5 => b"TES4",
        };
        if &magic != expected {
            return Err(invalid_data(format!(
                "expected leading {} record, found {}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&magic),
            )));
        }

        let data_size = file.read_u32::<LittleEndian>()?;
        if data_size > MAX_HEADER_DATA_SIZE {
            return Err(invalid_data(format!(
                "header record claims {} bytes of data",
                data_size
            )));
        }

        let flags = match dialect {
            HeaderDialect::Tes3 => {
                let _unknown = file.read_u32::<LittleEndian>()?;
                file.read_u32::<LittleEndian>()?
            }
            HeaderDialect::Tes4 => {
                let flags = file.read_u32::<LittleEndian>()?;
                skip(file, 8)?; // form id, version-control info
                flags
            }
            HeaderDialect::Tes5 => {
                let flags = file.read_u32::<LittleEndian>()?;
                skip(file, 12)?; // form id, version-control info, version fields
                flags
            }
        };

        let mut data = vec![0u8; data_size as usize];
        file.read_exact(&mut data)?;
        let masters = parse_masters(&data, dialect)?;

        Ok(PluginHeader { flags, masters })
    }
}

/// Walk the header record's subrecords and collect `MAST` entries.
fn parse_masters(data: &[u8], dialect: HeaderDialect) -> io::Result<Vec<String>> {
    let mut cursor = Cursor::new(data);
    let mut masters = Vec::new();

    while (cursor.position() as usize) < data.len() {
        let mut kind = [0u8; 4];
        cursor.read_exact(&mut kind)?;
        let size = match dialect {
            HeaderDialect::Tes3 => cursor.read_u32::<LittleEndian>()?,
            HeaderDialect::Tes4 | HeaderDialect::Tes5 => {
                u32::from(cursor.read_u16::<LittleEndian>()?)
            }
        };
        let mut payload = vec![0u8; size as usize];
        cursor.read_exact(&mut payload)?;

        if &kind == b"MAST" {
            masters.push(decode_zstring(&payload));
        }
    }

    Ok(masters)
}

/// Decode a zero-terminated Windows-1252 string.
fn decode_zstring(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    encoding_rs::WINDOWS_1252.decode(&bytes[..end]).0.into_owned()
}

fn skip(file: &mut File, bytes: u64) -> io::Result<()> {
    io::copy(&mut file.take(bytes), &mut io::sink()).and_then(|copied| {
        if copied == bytes {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::UnexpectedEof))
        }
    })
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

use std::io::Read;

use serde_json::Value;

use crate::asar::{AsarHeader, Node};
use crate::error::HeaderError;
use crate::pickle::{self, PickleReader};

pub mod entry;
pub mod source;

/// Size of the first pickle, which only carries the size of the second one.
pub const SIZE_PICKLE_LEN: usize = 8;

/// A decoded header together with its raw JSON text.
#[derive(Debug, Clone)]
pub struct RawHeader {
    pub header: AsarHeader,
    pub json: String,
}

pub fn read_header<R>(reader: &mut R) -> Result<RawHeader, HeaderError>
where
    R: Read,
{
    let (json, header_size) = read_header_json(reader)?;
    parse_header(json, header_size)
}

/// Read both pickles and return the header JSON text and the size `S` of the
/// header pickle. The text is not parsed.
pub fn read_header_json<R>(reader: &mut R) -> Result<(String, u32), HeaderError>
where
    R: Read,
{
    // size pickle
    let buf = pickle::read_block(reader, SIZE_PICKLE_LEN)?;
    let header_size = PickleReader::new(&buf)?.read_u32()?;

    // header pickle
    let buf = pickle::read_block(reader, header_size as usize)?;
    let json = PickleReader::new(&buf)?.read_string()?.to_string();

    Ok((json, header_size))
}

pub fn parse_header(json: String, header_size: u32) -> Result<RawHeader, HeaderError> {
    let value: Value = serde_json::from_str(&json)?;
    if !value.is_object() {
        return Err(HeaderError::NotAnObject);
    }
    let root = match Node::from_value("", value)? {
        node @ Node::Directory { .. } => node,
        // a bare `{}` has no `files` key and parses as a file
        _ => Node::empty_dir(),
    };

    Ok(RawHeader {
        header: AsarHeader::new(root, SIZE_PICKLE_LEN as u64 + header_size as u64),
        json,
    })
}

//! Compact binary encoding for the file-backed index
//!
//! Keys are written as a one-byte length followed by the raw address bytes,
//! so IPv4 keys take 5 bytes and IPv6 keys 17 bytes within the same file:
//!
//! ```text
//! ┌─────┬───────────────────────┐
//! │ len │ address bytes (4|16)  │
//! └─────┴───────────────────────┘
//! ```
//!
//! Payloads are a presence bitmask followed by the present fields in a fixed
//! order. Strings are `u32` little-endian length prefixed UTF-8.

use crate::error::{Error, Result};
use crate::info::{InformationPayload, TriState};
use crate::ip::IpValue;

/// Largest encoded key size
pub const MAX_KEY_LEN: usize = 17;

const HAS_COUNTRY: u8 = 1 << 0;
const HAS_GEONAME: u8 = 1 << 1;
const HAS_CITY: u8 = 1 << 2;
const HAS_SUB_MOST: u8 = 1 << 3;
const HAS_SUB_LEAST: u8 = 1 << 4;
const HAS_POSTAL: u8 = 1 << 5;
const HAS_ORIGINAL: u8 = 1 << 6;

/// Append the length-prefixed form of `ip` to `out`
pub fn encode_key(ip: &IpValue, out: &mut Vec<u8>) {
    let bytes = ip.as_bytes();
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

/// Decode one key from the front of `buf`
///
/// Returns the value and the number of bytes consumed.
pub fn decode_key(buf: &[u8]) -> Result<(IpValue, usize)> {
    let mut reader = ByteReader::new(buf);
    let ip = reader.read_key()?;
    Ok((ip, reader.position()))
}

/// Append the binary form of a payload to `out`
pub fn encode_payload(info: &InformationPayload, out: &mut Vec<u8>) {
    let range = info.range();
    encode_key(&range.start, out);
    encode_key(&range.end, out);

    let mut flags = 0u8;
    if info.country_code().is_some() {
        flags |= HAS_COUNTRY;
    }
    if info.geoname_id().is_some() {
        flags |= HAS_GEONAME;
    }
    if info.city().is_some() {
        flags |= HAS_CITY;
    }
    if info.most_specific_subdivision().is_some() {
        flags |= HAS_SUB_MOST;
    }
    if info.least_specific_subdivision().is_some() {
        flags |= HAS_SUB_LEAST;
    }
    if info.postal_code().is_some() {
        flags |= HAS_POSTAL;
    }
    if info.original_line().is_some() {
        flags |= HAS_ORIGINAL;
    }
    out.push(flags);
    out.push(info.vpn().to_tag());

    if let Some(code) = info.country_code() {
        write_str(code, out);
    }
    if let Some(id) = info.geoname_id() {
        out.extend_from_slice(&id.to_le_bytes());
    }
    for text in [
        info.city(),
        info.most_specific_subdivision(),
        info.least_specific_subdivision(),
        info.postal_code(),
        info.original_line(),
    ]
    .into_iter()
    .flatten()
    {
        write_str(text, out);
    }
}

/// Decode a payload written by [`encode_payload`]
pub fn decode_payload(buf: &[u8]) -> Result<InformationPayload> {
    let mut reader = ByteReader::new(buf);
    let start = reader.read_key()?;
    let end = reader.read_key()?;
    let flags = reader.read_u8()?;
    let vpn_tag = reader.read_u8()?;
    let vpn = TriState::from_tag(vpn_tag)
        .ok_or_else(|| Error::Codec(format!("invalid vpn tag {}", vpn_tag)))?;

    let mut info = InformationPayload::new(crate::ip::IpRange::new(start, end)?).with_vpn(vpn);
    if flags & HAS_COUNTRY != 0 {
        info = info.with_country_code(reader.read_str()?);
    }
    if flags & HAS_GEONAME != 0 {
        info = info.with_geoname_id(reader.read_u32()?);
    }
    if flags & HAS_CITY != 0 {
        info = info.with_city(reader.read_str()?);
    }
    if flags & HAS_SUB_MOST != 0 {
        info = info.with_most_specific_subdivision(reader.read_str()?);
    }
    if flags & HAS_SUB_LEAST != 0 {
        info = info.with_least_specific_subdivision(reader.read_str()?);
    }
    if flags & HAS_POSTAL != 0 {
        info = info.with_postal_code(reader.read_str()?);
    }
    if flags & HAS_ORIGINAL != 0 {
        info = info.with_original_line(reader.read_str()?);
    }
    Ok(info)
}

fn write_str(text: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

/// Bounds-checked cursor over an encoded buffer
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                Error::Codec(format!(
                    "read of {} bytes at offset {} exceeds buffer of {}",
                    len,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u32`
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a length-prefixed key
    pub fn read_key(&mut self) -> Result<IpValue> {
        let len = self.read_u8()? as usize;
        if len != 4 && len != 16 {
            return Err(Error::Codec(format!("invalid key length {}", len)));
        }
        let bytes = self.take(len)?;
        IpValue::from_bytes(bytes).ok_or_else(|| Error::Codec(format!("invalid key length {}", len)))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| Error::Codec(format!("invalid utf-8 at offset {}: {}", self.pos, e)))
    }
}

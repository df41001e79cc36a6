//! Flat record streams.
//!
//! A stream is a sequence of records, each a magic byte, a varint length and
//! the payload. Key/value data is stored as alternating key and value
//! records. Store files and exported snapshots share this format.

use crate::status::{Status, StatusCode};

const RECORD_MAGIC: u8 = 0xFF;

pub fn write_varint(buf: &mut Vec<u8>, mut num: u64) {
    loop {
        let byte = (num & 0x7F) as u8;
        num >>= 7;
        if num == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut num = 0u64;
    for (index, byte) in data.iter().enumerate().take(10) {
        num |= u64::from(byte & 0x7F) << (7 * index);
        if byte & 0x80 == 0 {
            return Some((num, index + 1));
        }
    }
    None
}

pub fn encode_record(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(RECORD_MAGIC);
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

pub fn encode_pairs<'a, I>(pairs: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut buf = Vec::new();
    for (key, value) in pairs {
        encode_record(&mut buf, key);
        encode_record(&mut buf, value);
    }
    buf
}

/// Iterates over the records of a stream.
pub struct FlatReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FlatReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Byte offset of the next record.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    fn broken(&self, what: &str) -> Status {
        Status::new(
            StatusCode::BrokenDataError,
            format!("{what} at offset {}", self.pos),
        )
    }
}

impl<'a> Iterator for FlatReader<'a> {
    type Item = Result<&'a [u8], Status>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        let (&magic, rest) = rest.split_first()?;
        if magic != RECORD_MAGIC {
            let status = self.broken("bad record magic");
            self.pos = self.data.len();
            return Some(Err(status));
        }
        let Some((len, len_size)) = read_varint(rest) else {
            let status = self.broken("bad record length");
            self.pos = self.data.len();
            return Some(Err(status));
        };
        let Some(payload) = usize::try_from(len)
            .ok()
            .and_then(|len| rest.get(len_size..len_size.checked_add(len)?))
        else {
            let status = self.broken("truncated record");
            self.pos = self.data.len();
            return Some(Err(status));
        };
        self.pos += 1 + len_size + payload.len();
        Some(Ok(payload))
    }
}

/// Decodes alternating key and value records.
pub fn decode_pairs(data: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Status> {
    let mut reader = FlatReader::new(data);
    let mut pairs = Vec::new();
    while let Some(key) = reader.next() {
        let key = key?;
        let value = match reader.next() {
            Some(value) => value?,
            None => {
                return Err(Status::new(
                    StatusCode::BrokenDataError,
                    "key record without a value record",
                ))
            }
        };
        pairs.push((key.to_vec(), value.to_vec()));
    }
    Ok(pairs)
}

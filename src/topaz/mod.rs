//! The Topaz container engine: parse the length-prefixed record store,
//! recover the book key from the `dkey` record, and rewrite the container
//! with every payload decrypted and the `dkey` header dropped.

mod varint;

use std::io::{self, Read};

use flate2::read::ZlibDecoder;
use indexmap::IndexMap;
use log::info;

use self::varint::{push_number, push_string, read_number, read_size, read_string};
use crate::cipher::TopazCipher;
use crate::pid::PidResolver;
use crate::reader::Reader;
use crate::writer::Writer;
use crate::{Error, Result};

const TPZ_MAGIC: &[u8; 4] = b"TPZ0";
const HEADER_RECORD: u8 = 0x63;
const HEADER_END: u8 = 0x64;
const BODY_PREFIX: u8 = 0x40;

const METADATA_TAG: &str = "metadata";
const DKEY_TAG: &str = "dkey";

#[derive(Debug, PartialEq, Clone, Copy)]
/// Location of one payload record: offset relative to the body, logical
/// (decompressed) length, and stored length when zlib-compressed.
pub struct RecordEntry {
    pub offset: usize,
    pub length: usize,
    pub compressed: usize,
}

#[derive(Debug, PartialEq)]
/// One named header record and the payload entries filed under it.
pub struct HeaderRecord {
    pub tag: String,
    pub entries: Vec<RecordEntry>,
}

/// A parsed Topaz book over a borrowed file image.
pub struct TopazBook<'a> {
    data: &'a [u8],
    headers: Vec<HeaderRecord>,
    body_offset: usize,
    metadata: IndexMap<String, String>,
    book_key: Option<[u8; 8]>,
}

impl<'a> TopazBook<'a> {
    pub fn parse(data: &'a [u8]) -> Result<TopazBook<'a>> {
        let mut reader = Reader::new(data);
        if reader.take(4)? != TPZ_MAGIC {
            return Err(Error::BadHeader("not a Topaz file".into()));
        }
        let count = reader.read_u8()?;
        let mut headers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            headers.push(parse_header_record(&mut reader)?);
        }
        if reader.read_u8()? != HEADER_END {
            return Err(Error::BadHeader(format!(
                "invalid header end at 0x{:x}",
                reader.position() - 1
            )));
        }

        let mut book = TopazBook {
            data,
            headers,
            body_offset: reader.position(),
            metadata: IndexMap::new(),
            book_key: None,
        };
        if book.find_header(METADATA_TAG).is_some() {
            book.parse_metadata()?;
        }
        Ok(book)
    }

    fn find_header(&self, tag: &str) -> Option<&HeaderRecord> {
        self.headers.iter().find(|h| h.tag == tag)
    }

    pub fn headers(&self) -> &[HeaderRecord] {
        &self.headers
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// The metadata payload is a framed list of string pairs.
    fn parse_metadata(&mut self) -> Result<()> {
        let entry = self.entry(METADATA_TAG, 0)?;
        let mut reader = Reader::new(self.data);
        reader.seek(self.body_offset + entry.offset)?;
        let tag = read_string(&mut reader)?;
        if tag != METADATA_TAG {
            return Err(Error::TagMismatch {
                expected: METADATA_TAG.into(),
                found: tag,
            });
        }
        reader.read_u8()?;
        let count = read_size(&mut reader)?;
        for _ in 0..count {
            let key = read_string(&mut reader)?;
            let value = read_string(&mut reader)?;
            self.metadata.insert(key, value);
        }
        Ok(())
    }

    fn entry(&self, tag: &str, index: usize) -> Result<RecordEntry> {
        let header = self
            .find_header(tag)
            .ok_or_else(|| Error::BadHeader(format!("no {:?} record in the header", tag)))?;
        header.entries.get(index).copied().ok_or_else(|| {
            Error::BadHeader(format!("record {}:{} not present", tag, index))
        })
    }

    /// Fetch the `index`-th payload filed under `tag`, decrypting when the
    /// record is marked encrypted and inflating when `explode` is set.
    pub fn payload(&self, tag: &str, index: usize, explode: bool) -> Result<Vec<u8>> {
        let entry = self.entry(tag, index)?;
        let mut reader = Reader::new(self.data);
        reader.seek(self.body_offset + entry.offset)?;

        let found = read_string(&mut reader)?;
        if found != tag {
            return Err(Error::TagMismatch {
                expected: tag.into(),
                found,
            });
        }
        let mut record_index = read_number(&mut reader)?;
        let mut encrypted = false;
        if record_index < 0 {
            encrypted = true;
            record_index = -(record_index + 1);
        }
        if record_index as usize != index {
            return Err(Error::TagMismatch {
                expected: format!("{}:{}", tag, index),
                found: format!("{}:{}", tag, record_index),
            });
        }

        let stored = if entry.compressed != 0 {
            entry.compressed
        } else {
            entry.length
        };
        let mut blob = reader.take(stored)?.to_vec();

        if encrypted {
            let key = self.book_key.ok_or_else(|| {
                Error::BadHeader(format!(
                    "record {}:{} is encrypted but no book key is known",
                    tag, index
                ))
            })?;
            TopazCipher::new(&key).decrypt(&mut blob);
        }
        if entry.compressed != 0 && explode {
            blob = inflate(&blob, entry.length)?;
        }
        Ok(blob)
    }

    /// Walk the `dkey` sub-records with every candidate PID until one
    /// yields the 8-byte book key.
    pub fn recover_book_key(&mut self, pids: &[String]) -> Result<()> {
        if self.find_header(DKEY_TAG).is_none() {
            return Err(Error::NotEncrypted("no dkey record found".into()));
        }
        let dkey = self.payload(DKEY_TAG, 0, false)?;
        for pid in pids {
            if pid.len() < 8 || !pid.is_ascii() {
                continue;
            }
            if let Some(key) = decrypt_dkey_records(&dkey, pid.as_bytes()) {
                info!("PID {} unlocked the book key", pid);
                self.book_key = Some(key);
                return Ok(());
            }
        }
        Err(Error::NoKey)
    }

    /// Write the container back without the `dkey` header and with every
    /// payload decrypted. With `explode`, compressed payloads are inflated
    /// and their `compressed` field is cleared.
    pub fn write_clean<W: io::Write>(&self, out: W, explode: bool) -> Result<()> {
        let mut header_buf: Vec<u8> = Vec::new();
        let mut body_buf: Vec<u8> = vec![BODY_PREFIX];

        header_buf.extend_from_slice(TPZ_MAGIC);
        let kept: Vec<&HeaderRecord> = self
            .headers
            .iter()
            .filter(|h| h.tag != DKEY_TAG)
            .collect();
        push_number(&mut header_buf, kept.len() as i32);

        for header in kept {
            header_buf.push(HEADER_RECORD);
            push_string(&mut header_buf, &header.tag);
            push_number(&mut header_buf, header.entries.len() as i32);
            for (index, entry) in header.entries.iter().enumerate() {
                push_number(&mut header_buf, body_buf.len() as i32);
                push_string(&mut body_buf, &header.tag);
                push_number(&mut body_buf, index as i32);
                let blob = self.payload(&header.tag, index, explode)?;
                body_buf.extend_from_slice(&blob);
                push_number(&mut header_buf, entry.length as i32);
                push_number(
                    &mut header_buf,
                    if explode { 0 } else { entry.compressed as i32 },
                );
            }
        }
        header_buf.push(HEADER_END);

        let mut w = Writer::new(out);
        w.write_bytes(&header_buf)?;
        w.write_bytes(&body_buf)?;
        Ok(())
    }
}

fn parse_header_record(reader: &mut Reader) -> Result<HeaderRecord> {
    let start = reader.position();
    if reader.read_u8()? != HEADER_RECORD {
        return Err(Error::BadHeader(format!(
            "invalid header record at 0x{:x}",
            start
        )));
    }
    let tag = read_string(reader)?;
    let count = read_size(reader)?;
    let mut entries = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        entries.push(RecordEntry {
            offset: read_size(reader)?,
            length: read_size(reader)?,
            compressed: read_size(reader)?,
        });
    }
    Ok(HeaderRecord { tag, entries })
}

/// Decrypt one length-prefixed `dkey` sub-record and validate its framing:
/// `"PID" 8 <pid> 8 <book key> "pid"`.
fn decrypt_dkey_record(data: &[u8], pid: &[u8]) -> Option<[u8; 8]> {
    let mut plain = data.to_vec();
    TopazCipher::new(&pid[..8]).decrypt(&mut plain);
    if plain.len() < 24 {
        return None;
    }
    if &plain[..3] != b"PID" || &plain[21..24] != b"pid" {
        return None;
    }
    if plain[3] != 8 || plain[12] != 8 {
        return None;
    }
    if plain[4..12] != pid[..8] {
        return None;
    }
    let mut key = [0u8; 8];
    key.copy_from_slice(&plain[13..21]);
    Some(key)
}

fn decrypt_dkey_records(blob: &[u8], pid: &[u8]) -> Option<[u8; 8]> {
    let count = *blob.first()? as usize;
    let mut idx = 1;
    for _ in 0..count {
        if idx >= blob.len() {
            break;
        }
        let len = blob[idx] as usize;
        idx += 1;
        let record = blob.get(idx..idx + len)?;
        if let Some(key) = decrypt_dkey_record(record, pid) {
            return Some(key);
        }
        idx += len;
    }
    None
}

fn inflate(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected);
    decoder
        .read_to_end(&mut out)
        .map_err(|err| Error::Inflate(err.to_string()))?;
    if out.len() != expected {
        return Err(Error::Inflate(format!(
            "expected {} bytes, inflated to {}",
            expected,
            out.len()
        )));
    }
    Ok(out)
}

/// Strip DRM from a Topaz image, writing the cleartext container to `out`.
pub fn strip<W: io::Write>(
    data: &[u8],
    out: W,
    resolver: &PidResolver,
    extra_pids: &[String],
    explode: bool,
) -> Result<()> {
    let mut book = TopazBook::parse(data)?;
    if let Some(title) = book.metadata("Title") {
        info!("processing {:?}", title);
    }
    let keys_name = book
        .metadata("keys")
        .ok_or_else(|| Error::BadHeader("metadata has no \"keys\" entry".into()))?
        .to_owned();
    let keys_value = book
        .metadata(&keys_name)
        .ok_or_else(|| {
            Error::BadHeader(format!("metadata has no {:?} entry", keys_name))
        })?
        .to_owned();
    let pids = resolver.candidates(keys_name.as_bytes(), keys_value.as_bytes(), extra_pids)?;
    book.recover_book_key(&pids)?;
    book.write_clean(out, explode)
}

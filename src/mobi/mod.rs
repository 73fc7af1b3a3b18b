//! The Mobipocket container engine: parse the Palm database layers, recover
//! the book key from the DRM cookie table, and rewrite the container with
//! every text record decrypted and the DRM block scrubbed.

pub(crate) mod drm;
mod exth;
mod mobih;
mod palmdoc;
mod pdb;

pub use self::exth::ExthHeader;
pub use self::mobih::MobiHeader;
pub use self::palmdoc::{Encryption, PalmDocHeader};
pub use self::pdb::{PdbHeader, RecordDescriptor};

use std::io;

use log::info;

use self::exth::ExthRecord;
use self::palmdoc::{ENCRYPTION_TYPE_OFFSET, PALMDOC_HEADER_LEN};
use crate::cipher::Pc1;
use crate::pid::PidResolver;
use crate::reader::Reader;
use crate::writer::Writer;
use crate::{Error, Result};

/// A parsed, still-encrypted Mobipocket book over a borrowed file image.
pub struct MobiBook<'a> {
    data: &'a [u8],
    pub pdb: PdbHeader,
    pub records: Vec<RecordDescriptor>,
    record0: Vec<u8>,
    pub palmdoc: PalmDocHeader,
    pub mobi: MobiHeader,
    pub exth: ExthHeader,
}

impl<'a> MobiBook<'a> {
    pub fn parse(data: &'a [u8]) -> Result<MobiBook<'a>> {
        let mut reader = Reader::new(data);
        let pdb = PdbHeader::parse(&mut reader)?;
        if &pdb.type_code != b"BOOK" || &pdb.creator != b"MOBI" {
            return Err(Error::BadHeader(
                "invalid Palm database type or creator".into(),
            ));
        }
        let records = pdb::parse_descriptors(&mut reader, pdb.num_records)?;
        if records.len() < 2 {
            return Err(Error::BadHeader("too few records".into()));
        }

        let record0_offset = records[0].offset as usize;
        let record0_end = records[1].offset as usize;
        let record0 = data
            .get(record0_offset..record0_end)
            .ok_or_else(|| Error::BadHeader("record 0 lies outside the file".into()))?
            .to_vec();

        let mut r0 = Reader::new(&record0);
        let palmdoc = PalmDocHeader::parse(&mut r0)?;
        match palmdoc.encryption() {
            Encryption::Mobipocket => {}
            other => return Err(Error::NotEncrypted(other.to_string())),
        }

        let mobi = MobiHeader::parse(&mut r0, PALMDOC_HEADER_LEN)?;
        if !mobi.has_exth_header() {
            return Err(Error::BadHeader("missing EXTH header".into()));
        }
        let exth = ExthHeader::parse(
            &mut r0,
            PALMDOC_HEADER_LEN + mobi.header_length as usize,
        )?;
        if mobi.drm_count == 0 {
            return Err(Error::NotEncrypted("no DRM cookies present".into()));
        }

        Ok(MobiBook {
            data,
            pdb,
            records,
            record0,
            palmdoc,
            mobi,
            exth,
        })
    }

    /// Key material for PID derivation: the raw tamper-proof-keys record
    /// and the concatenation of the token records it points at. The record
    /// is a run of 5-byte entries whose bytes 1..5 name another EXTH type.
    pub fn pid_material(&self) -> (Vec<u8>, Vec<u8>) {
        let keys = self
            .exth
            .get(ExthRecord::TamperProofKeys)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        let mut tokens = Vec::new();
        let mut idx = 0;
        while idx + 5 <= keys.len() {
            let record_type =
                u32::from_be_bytes([keys[idx + 1], keys[idx + 2], keys[idx + 3], keys[idx + 4]]);
            if let Some(data) = self.exth.get_type(record_type) {
                tokens.extend_from_slice(data);
            }
            idx += 5;
        }
        (keys, tokens)
    }

    fn drm_cookies(&self) -> Result<&[u8]> {
        let offset = self.mobi.drm_offset as usize;
        let len = (self.mobi.drm_count as usize) * drm::DRM_ENTRY_LEN;
        self.record0
            .get(offset..offset + len)
            .ok_or_else(|| Error::BadHeader("DRM block lies outside record 0".into()))
    }

    /// Try every candidate PID against the DRM cookie table.
    pub fn find_key(&self, pids: &[String]) -> Result<[u8; 16]> {
        let cookies = self.drm_cookies()?;
        for pid in pids {
            if let Some(key) = drm::find_key(cookies, pid) {
                info!("PID {} unlocked the book key", pid);
                return Ok(key);
            }
        }
        Err(Error::NoKey)
    }

    /// Write the container back with the DRM block scrubbed and every text
    /// record decrypted in place. Record offsets, lengths and trailing
    /// bytes are preserved exactly.
    pub fn write_clean<W: io::Write>(&self, out: W, key: &[u8; 16]) -> Result<()> {
        let mut record0 = self.record0.clone();
        scrub_record0(&mut record0, &self.mobi)?;

        let mut w = Writer::new(out);
        self.pdb.write(&mut w)?;
        for record in &self.records {
            w.write_u32(record.offset)?;
            w.write_u32(record.attr_id)?;
        }
        w.write_bytes(&[0, 0])?;
        let record0_offset = self.records[0].offset as usize;
        if record0_offset < w.position() {
            return Err(Error::BadHeader("record 0 overlaps the record table".into()));
        }
        w.pad_to(record0_offset)?;
        w.write_bytes(&record0)?;

        let text_records = self.palmdoc.record_count as usize;
        for i in 1..self.records.len() {
            let offset = self.records[i].offset as usize;
            let end = if i + 1 < self.records.len() {
                self.records[i + 1].offset as usize
            } else {
                self.data.len()
            };
            if end < offset || offset < w.position() {
                return Err(Error::BadHeader("record offsets are not increasing".into()));
            }
            let mut record = self
                .data
                .get(offset..end)
                .ok_or_else(|| Error::BadHeader("record lies outside the file".into()))?
                .to_vec();
            w.pad_to(offset)?;
            if i <= text_records {
                let trailing = drm::trailing_size(&record, self.mobi.extra_data_flags);
                let encrypted_len = record.len() - trailing;
                Pc1::new(key).decrypt(&mut record[..encrypted_len]);
            }
            w.write_bytes(&record)?;
        }
        Ok(())
    }
}

/// Zero the cookie table, point the DRM offset nowhere, clear the DRM
/// counters and mark the text as unencrypted.
fn scrub_record0(record0: &mut [u8], mobi: &MobiHeader) -> Result<()> {
    let offset = mobi.drm_offset as usize;
    let len = mobi.drm_size as usize;
    let region = record0
        .get_mut(offset..offset + len)
        .ok_or_else(|| Error::BadHeader("DRM block lies outside record 0".into()))?;
    for b in region {
        *b = 0;
    }

    let base = PALMDOC_HEADER_LEN;
    record0[base + mobih::DRM_OFFSET_OFFSET..base + mobih::DRM_OFFSET_OFFSET + 4]
        .copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    record0[base + mobih::DRM_COUNT_OFFSET..base + mobih::DRM_COUNT_OFFSET + 4]
        .copy_from_slice(&[0; 4]);
    record0[base + mobih::DRM_SIZE_OFFSET..base + mobih::DRM_SIZE_OFFSET + 4]
        .copy_from_slice(&[0; 4]);
    record0[base + mobih::DRM_FLAGS_OFFSET..base + mobih::DRM_FLAGS_OFFSET + 4]
        .copy_from_slice(&[0; 4]);
    record0[ENCRYPTION_TYPE_OFFSET..ENCRYPTION_TYPE_OFFSET + 2].copy_from_slice(&[0; 2]);
    Ok(())
}

/// Strip DRM from a Mobipocket image, writing the cleartext container to
/// `out`.
pub fn strip<W: io::Write>(
    data: &[u8],
    out: W,
    resolver: &PidResolver,
    extra_pids: &[String],
) -> Result<()> {
    let book = MobiBook::parse(data)?;
    info!("processing {:?}", book.pdb.display_name());
    book.exth.log_known_records();
    let (keys, tokens) = book.pid_material();
    let pids = resolver.candidates(&keys, &tokens, extra_pids)?;
    let key = book.find_key(&pids)?;
    book.write_clean(out, &key)
}

use log::{debug, warn};

use crate::reader::Reader;
use crate::{Error, Result};

const EXTH_MAGIC: u32 = 0x4558_5448; // "EXTH"

/// EXTH record types the stripper reads, for key material or diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ExthRecord {
    // source - https://wiki.mobileread.com/wiki/MOBI#EXTH_Header
    DrmServerId = 1,
    DrmCommerceId = 2,
    DrmEbookbaseBookId = 3,
    Author = 100,
    Publisher = 101,
    PublishDate = 106,
    Asin = 113,
    Watermark = 208,
    /// Used by the Kindle (and Android app) for generating book-specific PIDs.
    TamperProofKeys = 209,
    UpdatedTitle = 503,
}

impl ExthRecord {
    fn from_type(record_type: u32) -> Option<ExthRecord> {
        match record_type {
            1 => Some(ExthRecord::DrmServerId),
            2 => Some(ExthRecord::DrmCommerceId),
            3 => Some(ExthRecord::DrmEbookbaseBookId),
            100 => Some(ExthRecord::Author),
            101 => Some(ExthRecord::Publisher),
            106 => Some(ExthRecord::PublishDate),
            113 => Some(ExthRecord::Asin),
            208 => Some(ExthRecord::Watermark),
            209 => Some(ExthRecord::TamperProofKeys),
            503 => Some(ExthRecord::UpdatedTitle),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ExthRecord::DrmServerId => "drm_server_id",
            ExthRecord::DrmCommerceId => "drm_commerce_id",
            ExthRecord::DrmEbookbaseBookId => "drm_ebookbase_book_id",
            ExthRecord::Author => "author",
            ExthRecord::Publisher => "publisher",
            ExthRecord::PublishDate => "publishingdate",
            ExthRecord::Asin => "asin",
            ExthRecord::Watermark => "watermark",
            ExthRecord::TamperProofKeys => "tamper_proof_keys",
            ExthRecord::UpdatedTitle => "updatedtitle",
        }
    }
}

#[derive(Debug, Default, PartialEq)]
/// Extended header following the MOBI header, carrying typed records.
pub struct ExthHeader {
    pub header_length: u32,
    pub record_count: u32,
    records: Vec<(u32, Vec<u8>)>,
}

impl ExthHeader {
    /// Parse the EXTH header starting at `start` within the record 0 image.
    pub(crate) fn parse(reader: &mut Reader, start: usize) -> Result<ExthHeader> {
        reader.seek(start)?;
        let identifier = reader.read_u32_be()?;
        if identifier != EXTH_MAGIC {
            return Err(Error::BadHeader("EXTH header not found".into()));
        }
        let header_length = reader.read_u32_be()?;
        let record_count = reader.read_u32_be()?;

        let mut records = Vec::with_capacity(record_count.min(512) as usize);
        for i in 0..record_count {
            let record_type = reader.read_u32_be()?;
            let record_len = reader.read_u32_be()?;
            if record_len < 8 {
                // the remaining records cannot be located
                warn!("invalid EXTH record length at record {}", i);
                break;
            }
            let data = reader.take(record_len as usize - 8)?.to_vec();
            records.push((record_type, data));
        }

        Ok(ExthHeader {
            header_length,
            record_count,
            records,
        })
    }

    /// First record of the given type, if present.
    pub(crate) fn get(&self, record: ExthRecord) -> Option<&[u8]> {
        self.get_type(record as u32)
    }

    pub(crate) fn get_type(&self, record_type: u32) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|(t, _)| *t == record_type)
            .map(|(_, data)| data.as_slice())
    }

    /// Log the records the tool knows by name.
    pub(crate) fn log_known_records(&self) {
        for (record_type, data) in &self.records {
            if let Some(record) = ExthRecord::from_type(*record_type) {
                debug!("{}: {}", record.name(), String::from_utf8_lossy(data));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"EXTH");
        raw.extend_from_slice(&36u32.to_be_bytes()); // header length
        raw.extend_from_slice(&2u32.to_be_bytes()); // record count
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&16u32.to_be_bytes());
        raw.extend_from_slice(b"J. R. R."); // 8 data bytes
        raw.extend_from_slice(&209u32.to_be_bytes());
        raw.extend_from_slice(&13u32.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 0, 0, 100]); // 5 data bytes
        raw
    }

    #[test]
    fn parse_and_lookup() {
        let raw = sample();
        let exth = ExthHeader::parse(&mut Reader::new(&raw), 0).unwrap();
        assert_eq!(exth.record_count, 2);
        assert_eq!(exth.get(ExthRecord::Author), Some(&b"J. R. R."[..]));
        assert_eq!(
            exth.get(ExthRecord::TamperProofKeys),
            Some(&[0u8, 0, 0, 0, 100][..])
        );
        assert_eq!(exth.get(ExthRecord::Asin), None);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut raw = sample();
        raw[..4].copy_from_slice(b"HTXE");
        assert!(matches!(
            ExthHeader::parse(&mut Reader::new(&raw), 0),
            Err(Error::BadHeader(_))
        ));
    }

    #[test]
    fn invalid_record_length_aborts_the_walk() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"EXTH");
        raw.extend_from_slice(&36u32.to_be_bytes());
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(&100u32.to_be_bytes());
        raw.extend_from_slice(&7u32.to_be_bytes()); // impossible length
        raw.extend_from_slice(&209u32.to_be_bytes());
        raw.extend_from_slice(&13u32.to_be_bytes());
        raw.extend_from_slice(&[0, 0, 0, 0, 100]);
        let exth = ExthHeader::parse(&mut Reader::new(&raw), 0).unwrap();
        // nothing after the invalid record is reachable
        assert_eq!(exth.get(ExthRecord::TamperProofKeys), None);
    }
}

use std::io;

use crate::reader::Reader;
use crate::writer::Writer;
use crate::{Error, Result};

pub(crate) const PDB_HEADER_LEN: usize = 78;

#[derive(Debug, PartialEq, Clone)]
/// Palm database header, the outermost layer of a Mobipocket file. Raw
/// byte fields are kept as read so the rewrite stays bit-exact.
pub struct PdbHeader {
    pub name: [u8; 32],
    pub attributes: u16,
    pub version: u16,
    pub created: u32,
    pub modified: u32,
    pub backup: u32,
    pub modnum: u32,
    pub app_info_id: u32,
    pub sort_info_id: u32,
    pub type_code: [u8; 4],
    pub creator: [u8; 4],
    pub unique_id_seed: u32,
    pub next_record_list_id: u32,
    pub num_records: u16,
}

impl PdbHeader {
    /// Parse a header from the content. The reader must be at byte 0.
    pub(crate) fn parse(reader: &mut Reader) -> Result<PdbHeader> {
        if reader.remaining() < PDB_HEADER_LEN {
            return Err(Error::BadHeader("truncated Palm database header".into()));
        }
        let mut name = [0u8; 32];
        name.copy_from_slice(reader.take(32)?);
        Ok(PdbHeader {
            name,
            attributes: reader.read_u16_be()?,
            version: reader.read_u16_be()?,
            created: reader.read_u32_be()?,
            modified: reader.read_u32_be()?,
            backup: reader.read_u32_be()?,
            modnum: reader.read_u32_be()?,
            app_info_id: reader.read_u32_be()?,
            sort_info_id: reader.read_u32_be()?,
            type_code: {
                let mut t = [0u8; 4];
                t.copy_from_slice(reader.take(4)?);
                t
            },
            creator: {
                let mut c = [0u8; 4];
                c.copy_from_slice(reader.take(4)?);
                c
            },
            unique_id_seed: reader.read_u32_be()?,
            next_record_list_id: reader.read_u32_be()?,
            num_records: reader.read_u16_be()?,
        })
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut Writer<W>) -> io::Result<()> {
        w.write_bytes(&self.name)?;
        w.write_u16(self.attributes)?;
        w.write_u16(self.version)?;
        w.write_u32(self.created)?;
        w.write_u32(self.modified)?;
        w.write_u32(self.backup)?;
        w.write_u32(self.modnum)?;
        w.write_u32(self.app_info_id)?;
        w.write_u32(self.sort_info_id)?;
        w.write_bytes(&self.type_code)?;
        w.write_bytes(&self.creator)?;
        w.write_u32(self.unique_id_seed)?;
        w.write_u32(self.next_record_list_id)?;
        w.write_u16(self.num_records)
    }

    /// Database name with trailing NULs removed, for diagnostics.
    pub fn display_name(&self) -> String {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
/// One entry of the record table: absolute file offset plus the packed
/// attribute/id word.
pub struct RecordDescriptor {
    pub offset: u32,
    pub attr_id: u32,
}

/// Parse the record table. The reader must be at byte 78.
pub(crate) fn parse_descriptors(
    reader: &mut Reader,
    num_records: u16,
) -> Result<Vec<RecordDescriptor>> {
    let mut records = Vec::with_capacity(num_records as usize);
    for _ in 0..num_records {
        records.push(RecordDescriptor {
            offset: reader.read_u32_be()?,
            attr_id: reader.read_u32_be()?,
        });
    }
    Ok(records)
}

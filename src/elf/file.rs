//! The ELF reader.
//!
//! Opens a file, validates its header, and loads the section header table
//! plus the section-name string table. This is the shared first stage for
//! both `dlinit` (reading the host `ET_EXEC`) and `dlopen` (reading an
//! `ET_REL`).

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::elf::header::{ElfHeader, ExpectedType, SHN_UNDEF};
use crate::elf::section::{read_section_bytes, read_section_headers, SectionHeader};
use crate::error::{Error, Result};

/// An open, validated ELF file: its header, its section header table, and
/// (if present) the section-name string table.
pub(crate) struct ElfFile {
    reader: BufReader<File>,
    pub(crate) header: ElfHeader,
    pub(crate) sections: Vec<SectionHeader>,
    shstrtab: Option<Vec<u8>>,
}

impl ElfFile {
    /// Opens `path`, validates the header against `expected`, and loads
    /// the section header table and section-name string table.
    pub(crate) fn open(path: &Path, expected: ExpectedType) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = ElfHeader::read_and_validate(&mut reader, len, expected)?;
        let sections = read_section_headers(&mut reader, header.shoff, header.shnum)?;

        let shstrtab = if header.shstrndx == SHN_UNDEF {
            None
        } else {
            let section = &sections[header.shstrndx as usize];
            Some(read_section_bytes(&mut reader, section)?)
        };

        Ok(Self {
            reader,
            header,
            sections,
            shstrtab,
        })
    }

    /// Looks up a null-terminated string at `index` within the
    /// section-name string table.
    pub(crate) fn section_name(&self, index: u32) -> Result<String> {
        let table = self.shstrtab.as_deref().ok_or(Error::StringIndexOutOfRange {
            index,
            length: 0,
        })?;
        read_str(table, index)
    }

    /// Reads a section's raw contents from the file.
    pub(crate) fn read_section(&mut self, section_index: usize) -> Result<Vec<u8>> {
        let section = self.sections[section_index];
        self.reader.seek(SeekFrom::Start(section.offset as u64))?;
        let mut buf = vec![0u8; section.size as usize];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads an arbitrary section's raw contents without requiring a
    /// `&mut self` borrow of the whole file handle's bookkeeping; used by
    /// the symbol/relocation extractors which read string/table sections
    /// referenced by `sh_link` rather than by direct index into the main
    /// section loop.
    pub(crate) fn read_section_header(&self, index: usize) -> Result<SectionHeader> {
        self.sections
            .get(index)
            .copied()
            .ok_or(Error::SectionIndexOutOfRange {
                index: index as u32,
                shnum: self.header.shnum,
            })
    }
}

/// Reads a null-terminated string at byte offset `index` within `table`.
pub(crate) fn read_str(table: &[u8], index: u32) -> Result<String> {
    let start = index as usize;
    if start >= table.len() {
        return Err(Error::StringIndexOutOfRange {
            index,
            length: table.len(),
        });
    }
    let end = table[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .unwrap_or(table.len());
    Ok(String::from_utf8_lossy(&table[start..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_null_terminated_string() {
        let table = b"\0.text\0.data\0";
        assert_eq!(read_str(table, 1).unwrap(), ".text");
        assert_eq!(read_str(table, 7).unwrap(), ".data");
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let table = b"\0.text\0";
        assert!(read_str(table, 100).is_err());
    }
}

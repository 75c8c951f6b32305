//! Section header table (`Elf32_Shdr`) decoding.

use std::io::{Read, Seek, SeekFrom};

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::elf::primitives::read_u32;
use crate::error::Result;

pub(crate) const SHDR_SIZE: u32 = 40;

pub(crate) const SHT_SYMTAB: u32 = 2;
pub(crate) const SHT_RELA: u32 = 4;
pub(crate) const SHT_NOBITS: u32 = 8;

bitflags! {
    /// `sh_flags`: attributes of a section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SectionFlags: u32 {
        const WRITE = 0x1;
        const ALLOC = 0x2;
        const EXECINSTR = 0x4;
        const MERGE = 0x10;
        const STRINGS = 0x20;
        const INFO_LINK = 0x40;
        const LINK_ORDER = 0x80;
        const OS_NONCONFORMING = 0x100;
        const GROUP = 0x200;
        const TLS = 0x400;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
/// `sh_type`: a section's contents and semantics. Only the values this
/// loader actually branches on are enumerated; anything else decodes to
/// `SectionType::Other(raw)` rather than failing, since an unrecognised
/// section type that this loader never visits is not a format error.
pub(crate) enum KnownSectionType {
    Null = 0,
    ProgBits = 1,
    SymTab = 2,
    StrTab = 3,
    Rela = 4,
    Hash = 5,
    Dynamic = 6,
    Note = 7,
    NoBits = 8,
    Rel = 9,
    DynSym = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectionType {
    Known(KnownSectionType),
    Other(u32),
}

impl SectionType {
    fn from_raw(raw: u32) -> Self {
        match KnownSectionType::from_u32(raw) {
            Some(known) => SectionType::Known(known),
            None => SectionType::Other(raw),
        }
    }

    pub(crate) fn raw(self) -> u32 {
        match self {
            SectionType::Known(known) => known as u32,
            SectionType::Other(raw) => raw,
        }
    }
}

/// A single decoded `Elf32_Shdr` entry. `name` is the raw `sh_name` index
/// into the section header string table; resolving it to text is the
/// caller's job once the string table itself has been read (see
/// [`crate::file::ElfFile::section_name`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionHeader {
    pub(crate) name: u32,
    pub(crate) r#type: SectionType,
    pub(crate) flags: SectionFlags,
    pub(crate) addr: u32,
    pub(crate) offset: u32,
    pub(crate) size: u32,
    pub(crate) link: u32,
    pub(crate) info: u32,
    pub(crate) addralign: u32,
    pub(crate) entsize: u32,
}

impl SectionHeader {
    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let name = read_u32(reader)?;
        let r#type = SectionType::from_raw(read_u32(reader)?);
        let flags = SectionFlags::from_bits_truncate(read_u32(reader)?);
        let addr = read_u32(reader)?;
        let offset = read_u32(reader)?;
        let size = read_u32(reader)?;
        let link = read_u32(reader)?;
        let info = read_u32(reader)?;
        let addralign = read_u32(reader)?;
        let entsize = read_u32(reader)?;
        Ok(Self {
            name,
            r#type,
            flags,
            addr,
            offset,
            size,
            link,
            info,
            addralign,
            entsize,
        })
    }

    pub(crate) fn is_allocatable(&self) -> bool {
        self.flags.contains(SectionFlags::ALLOC)
    }
}

/// Reads the contiguous section header table of `shnum` entries starting
/// at `shoff`.
pub(crate) fn read_section_headers<R: Read + Seek>(
    reader: &mut R,
    shoff: u32,
    shnum: u16,
) -> Result<Vec<SectionHeader>> {
    reader.seek(SeekFrom::Start(shoff as u64))?;
    (0..shnum).map(|_| SectionHeader::read(reader)).collect()
}

/// Reads a section's raw byte contents from the file.
pub(crate) fn read_section_bytes<R: Read + Seek>(
    reader: &mut R,
    section: &SectionHeader,
) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(section.offset as u64))?;
    let mut buf = vec![0u8; section.size as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

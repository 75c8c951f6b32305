//! The relocation extractor.
//!
//! Walks every `SHT_RELA` section (skipping debug and `.eh_frame`
//! sections, and rejecting `SHT_REL`) and produces [`Relocation`]
//! records naming their referent by symbol name rather than index, so
//! the raw symbol table can be discarded once extraction is done.

use std::io::Cursor;

use num_derive::FromPrimitive;
use typed_builder::TypedBuilder;

use crate::elf::file::{read_str, ElfFile};
use crate::elf::primitives::{read_i32, read_u32};
use crate::elf::section::{KnownSectionType, SectionType};
use crate::elf::symbol::SymbolType;
use crate::error::{Error, Result};

const RELA_SIZE: u32 = 12;
const SYM_SIZE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
/// The 37 PowerPC psABI relocation types plus `R_PPC_NONE`.
pub(crate) enum RelocationType {
    None = 0,
    Addr32 = 1,
    Addr24 = 2,
    Addr16 = 3,
    Addr16Lo = 4,
    Addr16Hi = 5,
    Addr16Ha = 6,
    Addr14 = 7,
    Addr14BrTaken = 8,
    Addr14BrNTaken = 9,
    Rel24 = 10,
    Rel14 = 11,
    Rel14BrTaken = 12,
    Rel14BrNTaken = 13,
    Got16 = 14,
    Got16Lo = 15,
    Got16Hi = 16,
    Got16Ha = 17,
    PltRel24 = 18,
    Copy = 19,
    GlobDat = 20,
    JmpSlot = 21,
    Relative = 22,
    Local24Pc = 23,
    UAddr32 = 24,
    UAddr16 = 25,
    Rel32 = 26,
    Plt32 = 27,
    PltRel32 = 28,
    Plt16Lo = 29,
    Plt16Hi = 30,
    Plt16Ha = 31,
    SdaRel16 = 32,
    SectOff = 33,
    SectOffLo = 34,
    SectOffHi = 35,
    SectOffHa = 36,
    Addr30 = 37,
}

impl RelocationType {
    pub(crate) fn decode(raw: u8) -> Result<Self> {
        use num_traits::FromPrimitive;
        Self::from_u8(raw).ok_or(Error::UnsupportedRelocationType { value: raw })
    }
}

/// One entry from a relocation-with-addend section.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub(crate) struct Relocation {
    pub(crate) name: String,
    pub(crate) offset: u32,
    pub(crate) addend: i32,
    pub(crate) target_section: u16,
    pub(crate) rel_type: u8,
}

struct RawRela {
    offset: u32,
    info: u32,
    addend: i32,
}

fn read_raw_rela(bytes: &[u8]) -> Result<RawRela> {
    let mut cursor = Cursor::new(bytes);
    let offset = read_u32(&mut cursor)?;
    let info = read_u32(&mut cursor)?;
    let addend = read_i32(&mut cursor)?;
    Ok(RawRela {
        offset,
        info,
        addend,
    })
}

fn rela_sym_index(info: u32) -> u32 {
    info >> 8
}

fn rela_type(info: u32) -> u8 {
    (info & 0xff) as u8
}

/// Walks every `SHT_RELA` section in `elf` and extracts relocations.
/// `SHT_REL` sections are rejected; debug/`eh_frame` sections are
/// silently skipped, not rejected.
pub(crate) fn extract_relocations(elf: &mut ElfFile) -> Result<Vec<Relocation>> {
    let mut out = Vec::new();

    if elf
        .sections
        .iter()
        .skip(1)
        .any(|s| s.r#type == SectionType::Known(KnownSectionType::Rel))
    {
        return Err(Error::UnsupportedRelSection);
    }

    let rela_indices: Vec<usize> = elf
        .sections
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, s)| s.r#type == SectionType::Known(KnownSectionType::Rela))
        .map(|(i, _)| i)
        .collect();

    for index in rela_indices {
        let section = elf.read_section_header(index)?;
        let section_name = elf.section_name(section.name)?;
        if section_name.contains("debug") || section_name.contains("eh_frame") {
            continue;
        }

        if section.entsize != RELA_SIZE {
            return Err(Error::UnexpectedEntrySize {
                section: index as u16,
                found: section.entsize,
                expected: RELA_SIZE,
            });
        }

        let sym_section_index = section.link as usize;
        let sym_section = elf.read_section_header(sym_section_index)?;
        if sym_section.entsize != SYM_SIZE {
            return Err(Error::UnexpectedEntrySize {
                section: sym_section_index as u16,
                found: sym_section.entsize,
                expected: SYM_SIZE,
            });
        }

        let rela_bytes = elf.read_section(index)?;
        let sym_bytes = elf.read_section(sym_section_index)?;
        let strtab_index = sym_section.link as usize;
        let sym_strs = elf.read_section(strtab_index)?;

        let count = rela_bytes.len() / RELA_SIZE as usize;
        for i in 0..count {
            let entry = &rela_bytes[i * RELA_SIZE as usize..(i + 1) * RELA_SIZE as usize];
            let raw = read_raw_rela(entry)?;

            let sym_idx = rela_sym_index(raw.info) as usize;
            let sym_entry =
                &sym_bytes[sym_idx * SYM_SIZE as usize..(sym_idx + 1) * SYM_SIZE as usize];
            let (sym_name_idx, sym_info, sym_shndx) = read_sym_name_fields(sym_entry)?;

            let r#type = {
                use num_traits::FromPrimitive;
                SymbolType::from_u8(sym_info & 0xf).unwrap_or(SymbolType::NoType)
            };
            let name = if r#type == SymbolType::Section {
                let target = elf.read_section_header(sym_shndx as usize)?;
                elf.section_name(target.name)?
            } else {
                read_str(&sym_strs, sym_name_idx)?
            };

            out.push(
                Relocation::builder()
                    .name(name)
                    .offset(raw.offset)
                    .addend(raw.addend)
                    .target_section(section.info as u16)
                    .rel_type(rela_type(raw.info))
                    .build(),
            );
        }
    }

    Ok(out)
}

/// Reads just the fields of a raw `Elf32_Sym` this module needs to name a
/// relocation's referent (`st_name`, `st_info`, `st_shndx`).
fn read_sym_name_fields(bytes: &[u8]) -> Result<(u32, u8, u16)> {
    let mut cursor = Cursor::new(bytes);
    let name = read_u32(&mut cursor)?;
    let _value = read_u32(&mut cursor)?;
    let _size = read_u32(&mut cursor)?;
    let info = crate::elf::primitives::read_u8(&mut cursor)?;
    let _other = crate::elf::primitives::read_u8(&mut cursor)?;
    let shndx = crate::elf::primitives::read_u16(&mut cursor)?;
    Ok((name, info, shndx))
}

//! The symbol extractor.
//!
//! Walks every `SHT_SYMTAB` section and produces [`DefinedSymbol`]
//! records, dropping symbols the loader has no use for (`NOTYPE`, `FILE`,
//! the index-0 null symbol) and resolving `SECTION`-typed symbols to the
//! name of the section they denote.

use std::io::Cursor;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use typed_builder::TypedBuilder;

use crate::elf::file::{read_str, ElfFile};
use crate::elf::primitives::{read_u16, read_u32, read_u8};
use crate::elf::section::{KnownSectionType, SectionType, SHT_SYMTAB};
use crate::error::{Error, Result};

const SYM_SIZE: u32 = 16;

pub(crate) const SHN_ABS: u16 = 0xfff1;
pub(crate) const SHN_COMMON: u16 = 0xfff2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
/// `ELF32_ST_BIND(st_info)`.
pub(crate) enum SymbolBinding {
    Local = 0,
    Global = 1,
    Weak = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
/// `ELF32_ST_TYPE(st_info)`.
pub(crate) enum SymbolType {
    NoType = 0,
    Object = 1,
    Func = 2,
    Section = 3,
    File = 4,
}

/// One retained entry of a loaded symbol table.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub(crate) struct DefinedSymbol {
    pub(crate) name: String,
    #[builder(default)]
    pub(crate) value: u32,
    #[builder(default = SymbolBinding::Global)]
    pub(crate) binding: SymbolBinding,
    #[builder(default = SymbolType::Object)]
    pub(crate) r#type: SymbolType,
    #[builder(default)]
    pub(crate) section_index: u16,
    /// Runtime address, unset until the image-layout pass assigns it.
    #[builder(default)]
    pub(crate) address: Option<u32>,
}

impl DefinedSymbol {
    /// Whether this symbol can ever be resolved: the abs sentinel is
    /// always eligible, everything else needs a non-null `address`.
    pub(crate) fn is_defined(&self) -> bool {
        self.address.is_some()
    }
}

struct RawSym {
    name: u32,
    value: u32,
    info: u8,
    shndx: u16,
}

fn read_raw_sym(bytes: &[u8]) -> Result<RawSym> {
    let mut cursor = Cursor::new(bytes);
    let name = read_u32(&mut cursor)?;
    let value = read_u32(&mut cursor)?;
    let _size = read_u32(&mut cursor)?;
    let info = read_u8(&mut cursor)?;
    let _other = read_u8(&mut cursor)?;
    let shndx = read_u16(&mut cursor)?;
    Ok(RawSym {
        name,
        value,
        info,
        shndx,
    })
}

/// Resolves a raw symbol's name: for `STT_SECTION` symbols, the name of
/// the section it denotes; otherwise, the string at `st_name`.
fn symbol_name(elf: &ElfFile, raw: &RawSym, r#type: SymbolType, sym_strs: &[u8]) -> Result<String> {
    if r#type == SymbolType::Section {
        let section = elf.read_section_header(raw.shndx as usize)?;
        elf.section_name(section.name)
    } else {
        read_str(sym_strs, raw.name)
    }
}

/// Walks every `SHT_SYMTAB` section in `elf` and extracts defined
/// symbols.
pub(crate) fn extract_defined_symbols(elf: &mut ElfFile) -> Result<Vec<DefinedSymbol>> {
    let mut out = Vec::new();

    let symtab_indices: Vec<usize> = elf
        .sections
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, s)| s.r#type == SectionType::Known(KnownSectionType::SymTab))
        .map(|(i, _)| i)
        .collect();

    for index in symtab_indices {
        let section = elf.read_section_header(index)?;
        if section.entsize != SYM_SIZE {
            return Err(Error::UnexpectedEntrySize {
                section: index as u16,
                found: section.entsize,
                expected: SYM_SIZE,
            });
        }

        let sym_bytes = elf.read_section(index)?;
        let strtab_index = section.link as usize;
        let sym_strs = elf.read_section(strtab_index)?;

        let count = sym_bytes.len() / SYM_SIZE as usize;
        // Skip the mandatory index-0 null symbol.
        for i in 1..count {
            let entry = &sym_bytes[i * SYM_SIZE as usize..(i + 1) * SYM_SIZE as usize];
            let raw = read_raw_sym(entry)?;

            let r#type = SymbolType::from_u8(raw.info & 0xf).unwrap_or(SymbolType::NoType);
            if r#type == SymbolType::NoType || r#type == SymbolType::File {
                continue;
            }
            let binding = SymbolBinding::from_u8(raw.info >> 4).unwrap_or(SymbolBinding::Local);

            let name = symbol_name(elf, &raw, r#type, &sym_strs)?;

            out.push(
                DefinedSymbol::builder()
                    .name(name)
                    .value(raw.value)
                    .binding(binding)
                    .r#type(r#type)
                    .section_index(raw.shndx)
                    .build(),
            );
        }
    }

    Ok(out)
}

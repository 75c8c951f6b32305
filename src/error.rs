//! Error taxonomy for the loader.
//!
//! Every failing step in every public operation produces one of these
//! variants. `Display` (via `thiserror`) is what ultimately populates the
//! loader's single error slot (see [`crate::dlerror`]).

use std::io;

#[derive(thiserror::Error, Debug, PartialEq, Eq, Hash)]
/// Error type for every failure mode the loader can produce.
pub enum Error {
    #[error("An I/O error occurred: {kind:?}")]
    Io { kind: io::ErrorKind },
    #[error("Invalid ELF magic bytes")]
    InvalidMagic,
    #[error("Invalid value {value} for ELF Class, expected ELFCLASS32")]
    InvalidClass { value: u8 },
    #[error("Invalid value {value} for ELF Data Encoding, expected ELFDATA2MSB")]
    InvalidDataEncoding { value: u8 },
    #[error("Invalid value {value} for ELF Identifier Version, expected EV_CURRENT")]
    InvalidIdentifierVersion { value: u8 },
    #[error("Unexpected ELF type {value}, expected {expected}")]
    UnexpectedType { value: u16, expected: u16 },
    #[error("Invalid value {value} for ELF Machine, expected EM_PPC")]
    InvalidMachine { value: u16 },
    #[error("Invalid value {value} for ELF Version, expected EV_CURRENT")]
    InvalidVersion { value: u32 },
    #[error("Section header offset {offset} exceeds file length {length}")]
    SectionHeaderOffsetOutOfBounds { offset: u64, length: u64 },
    #[error("e_ehsize was {value}, expected 52")]
    InvalidHeaderSize { value: u16 },
    #[error("e_shstrndx {value} is not less than e_shnum {shnum}")]
    InvalidSectionNameStringTableIndex { value: u16, shnum: u16 },
    #[error("Section index {index} out of range (e_shnum = {shnum})")]
    SectionIndexOutOfRange { index: u32, shnum: u16 },
    #[error("String table index {index} out of range (table length {length})")]
    StringIndexOutOfRange { index: u32, length: usize },
    #[error("Section {section} has sh_entsize {found}, expected {expected}")]
    UnexpectedEntrySize {
        section: u16,
        found: u32,
        expected: u32,
    },
    #[error("Relocation section type SHT_REL is not supported; only SHT_RELA is")]
    UnsupportedRelSection,
    #[error("Failed to allocate {size} bytes with alignment {align}")]
    Allocation { size: usize, align: usize },
    #[error("Unresolved symbol '{name}'")]
    UnresolvedSymbol { name: String },
    #[error("Unsupported relocation type {value}")]
    UnsupportedRelocationType { value: u8 },
    #[error("dlinit has already been called")]
    AlreadyInitialized,
    #[error("dlinit has not been called")]
    NotInitialized,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("symbol not found")]
    SymbolNotFound,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io { kind: err.kind() }
    }
}

/// Shorthand for `std::result::Result<T, Error>`, used throughout the
/// crate's internal fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

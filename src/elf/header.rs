//! The ELF file header (`Elf32_Ehdr`) and its `e_ident` prologue.
//!
//! Field ordering and sizes follow the System V gABI; only the 32-bit,
//! big-endian encoding is decoded, matching the one PowerPC psABI variant
//! this loader targets.

use std::io::Read;

use crate::elf::primitives::{read_u16, read_u32, read_u8};
use crate::error::{Error, Result};

pub(crate) const EI_NIDENT: usize = 16;
pub(crate) const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];

pub(crate) const ELFCLASS32: u8 = 1;
pub(crate) const ELFDATA2MSB: u8 = 2;
pub(crate) const EV_CURRENT: u8 = 1;

pub(crate) const ET_REL: u16 = 1;
pub(crate) const ET_EXEC: u16 = 2;
pub(crate) const EM_PPC: u16 = 20;

pub(crate) const EHDR_SIZE: u16 = 52;

pub(crate) const SHN_UNDEF: u16 = 0;

/// The 16-byte `e_ident` prologue of an ELF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElfIdentifier {
    pub(crate) class: u8,
    pub(crate) data_encoding: u8,
    pub(crate) version: u8,
}

impl ElfIdentifier {
    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ELFMAG {
            return Err(Error::InvalidMagic);
        }

        let class = read_u8(reader)?;
        if class != ELFCLASS32 {
            return Err(Error::InvalidClass { value: class });
        }

        let data_encoding = read_u8(reader)?;
        if data_encoding != ELFDATA2MSB {
            return Err(Error::InvalidDataEncoding {
                value: data_encoding,
            });
        }

        let version = read_u8(reader)?;
        if version != EV_CURRENT {
            return Err(Error::InvalidIdentifierVersion { value: version });
        }

        // os_abi, abi_version, and 7 bytes of padding: not validated, the
        // psABI leaves them to the OS/embedder and this loader has none.
        let mut rest = [0u8; EI_NIDENT - 7];
        reader.read_exact(&mut rest)?;

        Ok(Self {
            class,
            data_encoding,
            version,
        })
    }
}

/// What kind of ELF file this is expected to be, used to pick the
/// `e_type` check a given caller wants (`dlinit` wants `ET_EXEC`, `dlopen`
/// wants `ET_REL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpectedType {
    Relocatable,
    Executable,
}

impl ExpectedType {
    fn value(self) -> u16 {
        match self {
            ExpectedType::Relocatable => ET_REL,
            ExpectedType::Executable => ET_EXEC,
        }
    }
}

/// A decoded and validated `Elf32_Ehdr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElfHeader {
    pub(crate) r#type: u16,
    pub(crate) machine: u16,
    pub(crate) version: u32,
    pub(crate) entry: u32,
    pub(crate) shoff: u32,
    pub(crate) shnum: u16,
    pub(crate) shstrndx: u16,
}

impl ElfHeader {
    /// Reads and validates the header, in the order specified: magic,
    /// class, data encoding, identifier version, `e_type`, `e_machine`,
    /// `e_version`, `e_shoff` bounds, `e_ehsize`, `e_shstrndx` bounds.
    pub(crate) fn read_and_validate<R: Read>(
        reader: &mut R,
        file_len: u64,
        expected: ExpectedType,
    ) -> Result<Self> {
        let _identifier = ElfIdentifier::read(reader)?;

        let r#type = read_u16(reader)?;
        if r#type != expected.value() {
            return Err(Error::UnexpectedType {
                value: r#type,
                expected: expected.value(),
            });
        }

        let machine = read_u16(reader)?;
        if machine != EM_PPC {
            return Err(Error::InvalidMachine { value: machine });
        }

        let version = read_u32(reader)?;
        if version != EV_CURRENT as u32 {
            return Err(Error::InvalidVersion { value: version });
        }

        let entry = read_u32(reader)?;
        let phoff = read_u32(reader)?;
        let shoff = read_u32(reader)?;
        let flags = read_u32(reader)?;
        let ehsize = read_u16(reader)?;
        let phentsize = read_u16(reader)?;
        let phnum = read_u16(reader)?;
        let shentsize = read_u16(reader)?;
        let shnum = read_u16(reader)?;
        let shstrndx = read_u16(reader)?;

        let _ = (phoff, flags, phentsize, phnum, shentsize);

        if (shoff as u64) > file_len {
            return Err(Error::SectionHeaderOffsetOutOfBounds {
                offset: shoff as u64,
                length: file_len,
            });
        }

        if ehsize != EHDR_SIZE {
            return Err(Error::InvalidHeaderSize { value: ehsize });
        }

        if shstrndx != SHN_UNDEF && shstrndx >= shnum {
            return Err(Error::InvalidSectionNameStringTableIndex {
                value: shstrndx,
                shnum,
            });
        }

        Ok(Self {
            r#type,
            machine,
            version,
            entry,
            shoff,
            shnum,
            shstrndx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn minimal_header_bytes(shnum: u16, shstrndx: u16, shoff: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(EHDR_SIZE as usize);
        bytes.extend_from_slice(&ELFMAG);
        bytes.push(ELFCLASS32);
        bytes.push(ELFDATA2MSB);
        bytes.push(EV_CURRENT);
        bytes.extend_from_slice(&[0u8; EI_NIDENT - 7]);
        bytes.extend_from_slice(&ET_REL.to_be_bytes());
        bytes.extend_from_slice(&EM_PPC.to_be_bytes());
        bytes.extend_from_slice(&(EV_CURRENT as u32).to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes()); // e_entry
        bytes.extend_from_slice(&0u32.to_be_bytes()); // e_phoff
        bytes.extend_from_slice(&shoff.to_be_bytes()); // e_shoff
        bytes.extend_from_slice(&0u32.to_be_bytes()); // e_flags
        bytes.extend_from_slice(&EHDR_SIZE.to_be_bytes()); // e_ehsize
        bytes.extend_from_slice(&0u16.to_be_bytes()); // e_phentsize
        bytes.extend_from_slice(&0u16.to_be_bytes()); // e_phnum
        bytes.extend_from_slice(&40u16.to_be_bytes()); // e_shentsize
        bytes.extend_from_slice(&shnum.to_be_bytes());
        bytes.extend_from_slice(&shstrndx.to_be_bytes());
        assert_eq!(bytes.len(), EHDR_SIZE as usize);
        bytes
    }

    #[test]
    fn valid_rel_header_parses() {
        let bytes = minimal_header_bytes(3, 1, EHDR_SIZE as u32);
        let mut cursor = Cursor::new(bytes);
        let header =
            ElfHeader::read_and_validate(&mut cursor, EHDR_SIZE as u64, ExpectedType::Relocatable)
                .unwrap();
        assert_eq!(header.shnum, 3);
        assert_eq!(header.shstrndx, 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = minimal_header_bytes(3, 1, EHDR_SIZE as u32);
        bytes[0] = 0;
        let mut cursor = Cursor::new(bytes);
        let err =
            ElfHeader::read_and_validate(&mut cursor, EHDR_SIZE as u64, ExpectedType::Relocatable)
                .unwrap_err();
        assert_eq!(err, Error::InvalidMagic);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let bytes = minimal_header_bytes(3, 1, EHDR_SIZE as u32);
        let mut cursor = Cursor::new(bytes);
        let err =
            ElfHeader::read_and_validate(&mut cursor, EHDR_SIZE as u64, ExpectedType::Executable)
                .unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedType {
                value: ET_REL,
                expected: ET_EXEC
            }
        );
    }

    #[test]
    fn shstrndx_out_of_range_is_rejected() {
        let bytes = minimal_header_bytes(2, 5, EHDR_SIZE as u32);
        let mut cursor = Cursor::new(bytes);
        let err =
            ElfHeader::read_and_validate(&mut cursor, EHDR_SIZE as u64, ExpectedType::Relocatable)
                .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidSectionNameStringTableIndex { value: 5, shnum: 2 }
        );
    }

    #[test]
    fn shoff_past_file_end_is_rejected() {
        let bytes = minimal_header_bytes(2, 1, 10_000);
        let mut cursor = Cursor::new(bytes);
        let err =
            ElfHeader::read_and_validate(&mut cursor, EHDR_SIZE as u64, ExpectedType::Relocatable)
                .unwrap_err();
        assert_eq!(
            err,
            Error::SectionHeaderOffsetOutOfBounds {
                offset: 10_000,
                length: EHDR_SIZE as u64
            }
        );
    }
}

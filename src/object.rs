//! [`LoadedObject`] and [`HostImage`]: the two symbol-table-bearing
//! records the resolver searches.

use std::path::Path;

use crate::elf::file::ElfFile;
use crate::elf::header::ExpectedType;
use crate::elf::relocation::{extract_relocations, Relocation};
use crate::elf::symbol::{extract_defined_symbols, DefinedSymbol};
use crate::error::Result;
use crate::image::{assign_symbol_addresses, SectionImages};

/// A namespace of defined symbols the resolver can search: the host
/// image, a loaded object's own symbols, or another already-loaded
/// object's exported symbols.
pub(crate) trait SymbolScope {
    fn symbols(&self) -> &[DefinedSymbol];

    fn find(&self, name: &str) -> Option<u32> {
        self.symbols()
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.address)
    }

    /// Like [`Self::find`], but returns the symbol's raw, file-recorded
    /// `value` (its offset within its own section) rather than its
    /// resolved runtime address. Used by the `SECTOFF` relocation
    /// family, whose operand is that section-local offset.
    fn find_value(&self, name: &str) -> Option<u32> {
        self.symbols()
            .iter()
            .find(|s| s.name == name && s.address.is_some())
            .map(|s| s.value)
    }
}

/// Produced by `dlopen`: an object file's parsed symbols, relocations,
/// and loaded section images.
pub(crate) struct LoadedObject {
    pub(crate) symbols: Vec<DefinedSymbol>,
    pub(crate) relocations: Vec<Relocation>,
    pub(crate) images: SectionImages,
}

impl SymbolScope for LoadedObject {
    fn symbols(&self) -> &[DefinedSymbol] {
        &self.symbols
    }
}

impl LoadedObject {
    /// Opens and validates `path`, then extracts its symbols and
    /// relocations, lays out its sections, and assigns each symbol's
    /// runtime address. Does not apply relocations; that is the
    /// caller's job once the host image and live-set are available too.
    pub(crate) fn build(path: &Path) -> Result<Self> {
        let mut elf = ElfFile::open(path, ExpectedType::Relocatable)?;
        let mut symbols = extract_defined_symbols(&mut elf)?;
        let relocations = extract_relocations(&mut elf)?;
        let images = SectionImages::layout(&mut elf)?;
        assign_symbol_addresses(&mut symbols, &images);

        Ok(Self {
            symbols,
            relocations,
            images,
        })
    }
}

/// Produced by `dlinit`: the running host executable's defined symbols,
/// each already carrying its final runtime address (`= st_value`).
pub(crate) struct HostImage {
    pub(crate) symbols: Vec<DefinedSymbol>,
}

impl SymbolScope for HostImage {
    fn symbols(&self) -> &[DefinedSymbol] {
        &self.symbols
    }
}

impl HostImage {
    /// Opens the running executable and extracts its symbols. The
    /// layout here is degenerate compared to a loaded object's: the
    /// host's sections are already mapped at their final addresses, so
    /// no allocation or copy is needed and `address = st_value` directly.
    pub(crate) fn build(path: &Path) -> Result<Self> {
        let mut elf = ElfFile::open(path, ExpectedType::Executable)?;
        let mut symbols = extract_defined_symbols(&mut elf)?;
        for symbol in &mut symbols {
            symbol.address = Some(symbol.value);
        }
        Ok(Self { symbols })
    }
}

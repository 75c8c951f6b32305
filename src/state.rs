//! The process-wide loader state and the per-handle lifecycle of a
//! loaded object (building, resolved, closed).
//!
//! Process-wide state lives behind a single `Mutex` reached through a
//! `OnceLock`, giving callers a concrete, safe way to share the host
//! image, the live set, and the error slot across threads rather than
//! leaving external locking as an unenforced caller contract.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use crate::cache::{CacheSync, NoopCacheSync};
use crate::diagnostics::{DiagnosticSink, StderrSink};
use crate::error::{Error, Result};
use crate::object::{HostImage, LoadedObject, SymbolScope};
use crate::resolver::resolve;

/// An opaque handle to a loaded object. The only valid operations on it
/// are `dlsym`, `dlclose`, and equality comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    #[cfg(test)]
    pub(crate) fn for_test(raw: u64) -> Self {
        Self(raw)
    }
}

pub(crate) struct LoaderState {
    host: Option<HostImage>,
    /// Ordered by load time: the resolver's "previously-loaded objects"
    /// scope walks this in order so that first-loaded wins.
    live: Vec<(Handle, LoadedObject)>,
    next_handle: u64,
    error: Option<String>,
    diagnostics: Box<dyn DiagnosticSink + Send>,
    cache_sync: Box<dyn CacheSync + Send>,
}

impl LoaderState {
    fn new() -> Self {
        Self {
            host: None,
            live: Vec::new(),
            next_handle: 1,
            error: None,
            diagnostics: Box::new(StderrSink),
            cache_sync: Box::new(NoopCacheSync),
        }
    }

    pub(crate) fn set_diagnostic_sink(&mut self, sink: Box<dyn DiagnosticSink + Send>) {
        self.diagnostics = sink;
    }

    pub(crate) fn set_cache_sync(&mut self, sync: Box<dyn CacheSync + Send>) {
        self.cache_sync = sync;
    }

    fn set_error(&mut self, err: Error) {
        self.error = Some(err.to_string());
    }

    pub(crate) fn dlerror(&mut self) -> Option<String> {
        self.error.take()
    }

    pub(crate) fn dlinit(&mut self, own_path: &Path) -> i32 {
        self.error = None;
        if self.host.is_some() {
            self.set_error(Error::AlreadyInitialized);
            return 1;
        }

        match HostImage::build(own_path) {
            Ok(host) => {
                self.diagnostics
                    .note(&format!("dlinit: host image carries {} symbols", host.symbols.len()));
                self.host = Some(host);
                0
            }
            Err(err) => {
                self.set_error(err);
                1
            }
        }
    }

    pub(crate) fn dlopen(&mut self, path: &Path) -> Option<Handle> {
        self.error = None;

        let host = match &self.host {
            Some(host) => host,
            None => {
                self.set_error(Error::NotInitialized);
                return None;
            }
        };

        let mut object = match LoadedObject::build(path) {
            Ok(object) => object,
            Err(err) => {
                self.set_error(err);
                return None;
            }
        };
        self.diagnostics.note(&format!(
            "dlopen {}: {} symbols, {} relocations",
            path.display(),
            object.symbols.len(),
            object.relocations.len()
        ));

        if let Err(err) = resolve_and_apply(&mut object, host, &self.live) {
            self.set_error(err);
            return None;
        }

        for (base, len) in object.images.ranges() {
            self.cache_sync.sync(base, len);
        }

        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.live.push((handle, object));
        Some(handle)
    }

    pub(crate) fn dlsym(&mut self, handle: Handle, name: &str) -> Option<u32> {
        self.error = None;
        let object = match self.live.iter().find(|(h, _)| *h == handle) {
            Some((_, object)) => object,
            None => {
                self.set_error(Error::InvalidHandle);
                return None;
            }
        };

        match object.symbols.iter().find(|s| s.name == name).and_then(|s| s.address) {
            Some(address) => Some(address),
            None => {
                self.set_error(Error::SymbolNotFound);
                None
            }
        }
    }

    pub(crate) fn dlclose(&mut self, handle: Handle) -> i32 {
        self.error = None;
        let position = self.live.iter().position(|(h, _)| *h == handle);
        match position {
            Some(index) => {
                self.live.remove(index);
                0
            }
            None => {
                self.set_error(Error::InvalidHandle);
                1
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// Resolves every relocation in `object` against local, host, and
/// previously-loaded scopes, patching the bytes in place. On the first
/// unresolved symbol or unsupported relocation type, the whole object
/// is abandoned: `object` is dropped by the caller, releasing every
/// buffer it allocated so no partially patched object is ever kept
/// around.
fn resolve_and_apply(
    object: &mut LoadedObject,
    host: &HostImage,
    previously_loaded: &[(Handle, LoadedObject)],
) -> Result<()> {
    use crate::apply::{apply_relocation, RelocationInputs};
    use crate::elf::relocation::RelocationType;
    use crate::resolver::resolve_section_offset;

    let scopes: Vec<&dyn SymbolScope> = previously_loaded
        .iter()
        .map(|(_, o)| o as &dyn SymbolScope)
        .collect();

    let sda_base = resolve("_SDA_BASE_", object, host, &scopes);

    let relocations = object.relocations.clone();
    for relocation in &relocations {
        let rel_type = RelocationType::decode(relocation.rel_type)?;

        let section_base = object
            .images
            .base_of(relocation.target_section)
            .ok_or(Error::SectionIndexOutOfRange {
                index: relocation.target_section as u32,
                shnum: u16::MAX,
            })?;
        let place = section_base.wrapping_add(relocation.offset);

        let symbol_address = if matches!(rel_type, RelocationType::Relative | RelocationType::Local24Pc) {
            0
        } else if matches!(
            rel_type,
            RelocationType::SectOff
                | RelocationType::SectOffLo
                | RelocationType::SectOffHi
                | RelocationType::SectOffHa
        ) {
            resolve_section_offset(&relocation.name, object, host, &scopes).ok_or_else(|| {
                Error::UnresolvedSymbol {
                    name: relocation.name.clone(),
                }
            })?
        } else {
            resolve(&relocation.name, object, host, &scopes).ok_or_else(|| Error::UnresolvedSymbol {
                name: relocation.name.clone(),
            })?
        };

        let inputs = RelocationInputs {
            offset: relocation.offset,
            rel_type,
            place,
            symbol_address,
            addend: relocation.addend,
            section_base,
            sda_base,
        };

        let bytes = object
            .images
            .section_mut(relocation.target_section)
            .ok_or(Error::SectionIndexOutOfRange {
                index: relocation.target_section as u32,
                shnum: u16::MAX,
            })?;
        apply_relocation(bytes, &inputs)?;
    }

    Ok(())
}

static LOADER_STATE: OnceLock<Mutex<LoaderState>> = OnceLock::new();

pub(crate) fn with_loader_state<R>(f: impl FnOnce(&mut LoaderState) -> R) -> R {
    let state = LOADER_STATE.get_or_init(|| Mutex::new(LoaderState::new()));
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    with_loader_state(|state| {
        *state = LoaderState::new();
    });
}

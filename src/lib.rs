//! A minimal runtime dynamic loader for 32-bit big-endian PowerPC ELF
//! relocatable object files.
//!
//! This crate gives a host that has no system dynamic linker (a
//! bare-metal executable running on a games console) POSIX-`dlfcn`-style
//! services: [`dlinit`] parses the host executable's own symbol table so
//! later [`dlopen`]ed objects can resolve references back into code and
//! data already resident in the running image; [`dlopen`] loads one
//! `ET_REL` object, allocates and fills its allocatable sections, and
//! patches every relocation in place per the PowerPC psABI; [`dlsym`]
//! looks up a loaded object's defined symbols by name; [`dlclose`] tears
//! one loaded object back down; [`dlerror`] reads and clears the single
//! process-wide error slot every other entry point writes on failure.
//!
//! Only 32-bit, big-endian `EM_PPC` input is accepted. There is no
//! support for `PT_DYNAMIC`, PLT/GOT construction, lazy binding, or
//! thread-local storage relocations (see the crate's design notes for
//! the full list of things deliberately left out).

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, missing_docs)]

use std::path::Path;

pub mod cache;
pub mod diagnostics;
mod elf;
pub mod error;
mod image;
mod object;
mod resolver;
mod state;

mod apply;

pub use error::Error;
pub use state::Handle;

use cache::CacheSync;
use diagnostics::DiagnosticSink;

/// `mode` value accepted by [`dlopen`] for interface compatibility with
/// POSIX `dlfcn`. This loader performs no lazy binding, so `LAZY` and
/// [`NOW`] behave identically.
pub const LAZY: i32 = 0;
/// `mode` value accepted by [`dlopen`] for interface compatibility with
/// POSIX `dlfcn`; behaves identically to [`LAZY`].
pub const NOW: i32 = 1;

/// Parses `own_path` (expected to be `ET_EXEC`) as the currently-running
/// host executable, extracts its defined symbols, and installs the
/// result as the process-wide host image that later [`dlopen`] calls
/// resolve undefined references against.
///
/// Returns `0` on success, non-zero on failure. Calling this a second
/// time is a programming error: it fails with [`Error::AlreadyInitialized`]
/// and leaves the first host image intact.
pub fn dlinit<P: AsRef<Path>>(own_path: P) -> i32 {
    state::with_loader_state(|s| s.dlinit(own_path.as_ref()))
}

/// Loads the `ET_REL` object at `path`: validates and parses it, extracts
/// its defined symbols and relocations, allocates and fills its
/// allocatable sections, then resolves and patches every relocation
/// against the object's own symbols, the host image, and the exported
/// symbols of every still-live object (in load order).
///
/// `mode` is accepted for interface compatibility and ignored; see
/// [`LAZY`] / [`NOW`].
///
/// Returns an opaque [`Handle`] on success. On any failure (a malformed
/// file, an unresolved symbol, an unsupported relocation type) the
/// partially-built object is dropped and `None` is returned; the live
/// set of loaded objects is left unchanged.
pub fn dlopen<P: AsRef<Path>>(path: P, _mode: i32) -> Option<Handle> {
    state::with_loader_state(|s| s.dlopen(path.as_ref()))
}

/// Looks up `name` among `handle`'s defined symbols and returns its
/// runtime address.
///
/// Returns `None` and sets [`Error::InvalidHandle`] if `handle` is not
/// (or is no longer) live, or [`Error::SymbolNotFound`] if no defined
/// symbol of that exact name was resolved.
pub fn dlsym(handle: Handle, name: &str) -> Option<u32> {
    state::with_loader_state(|s| s.dlsym(handle, name))
}

/// Tears down the loaded object referred to by `handle`: releases its
/// file handle, its aligned section buffers, and its symbol and
/// relocation tables, and removes it from the live set.
///
/// Returns `0` on success, non-zero (with [`Error::InvalidHandle`] set)
/// if `handle` is not live.
pub fn dlclose(handle: Handle) -> i32 {
    state::with_loader_state(|s| s.dlclose(handle))
}

/// Reads and clears the single most-recent-error slot shared by every
/// other entry point in this module.
///
/// Returns `None` if no operation has failed since the last call to
/// `dlerror`.
pub fn dlerror() -> Option<String> {
    state::with_loader_state(|s| s.dlerror())
}

/// Installs `sink` as the destination for this loader's optional,
/// non-authoritative progress output. Defaults to writing to stderr;
/// an embedder with no stderr (the console-less host this loader
/// targets) should call this during startup with its own UART/VGA
/// text writer before the first [`dlinit`]/[`dlopen`] call.
pub fn set_diagnostic_sink(sink: impl DiagnosticSink + Send + 'static) {
    state::with_loader_state(|s| s.set_diagnostic_sink(Box::new(sink)));
}

/// Installs `sync` as the hook run over every section range a
/// successful [`dlopen`] just finished patching, before the handle is
/// returned to the caller. Defaults to a no-op; an embedder targeting
/// real PowerPC hardware must supply a `dcbf`/`icbi`-based
/// implementation so freshly patched instructions are visible to the
/// core before execution reaches them.
pub fn set_cache_sync(sync: impl CacheSync + Send + 'static) {
    state::with_loader_state(|s| s.set_cache_sync(Box::new(sync)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Minimal synthetic 32-bit big-endian PPC ELF builder, used only by
    /// this module's integration tests: real corpus objects are not part
    /// of this retrieval pack, so the host image and loadable objects
    /// these scenarios need are assembled by hand instead.
    struct ElfBuilder {
        is_exec: bool,
        sections: Vec<SectionSpec>,
    }

    struct SectionSpec {
        name: String,
        sh_type: u32,
        flags: u32,
        data: Vec<u8>,
        link: u32,
        info: u32,
        entsize: u32,
        addralign: u32,
    }

    const SHT_PROGBITS: u32 = 1;
    const SHT_SYMTAB: u32 = 2;
    const SHT_STRTAB: u32 = 3;
    const SHT_RELA: u32 = 4;
    const SHT_NOBITS: u32 = 8;
    const SHF_WRITE: u32 = 0x1;
    const SHF_ALLOC: u32 = 0x2;
    const SHF_EXECINSTR: u32 = 0x4;

    impl ElfBuilder {
        fn new(is_exec: bool) -> Self {
            Self {
                is_exec,
                sections: Vec::new(),
            }
        }

        fn section(mut self, spec: SectionSpec) -> Self {
            self.sections.push(spec);
            self
        }

        /// Builds the file. Section indices are 1-based in ELF-index
        /// terms: index 0 is the mandatory null section, `sections[0]`
        /// lands at index 1, and the section-name string table this
        /// builder always appends last lands at `sections.len() + 1`.
        fn build(self) -> Vec<u8> {
            let mut shstrtab = vec![0u8];
            let mut name_offsets = Vec::new();
            for section in &self.sections {
                name_offsets.push(shstrtab.len() as u32);
                shstrtab.extend_from_slice(section.name.as_bytes());
                shstrtab.push(0);
            }
            let shstrndx = self.sections.len() as u32 + 1;

            let mut body = Vec::new();
            let mut section_offsets = Vec::new();
            let ehsize = 52u32;
            for section in &self.sections {
                section_offsets.push(body.len() as u32 + ehsize);
                if section.sh_type != SHT_NOBITS {
                    body.extend_from_slice(&section.data);
                }
            }
            let shstrtab_offset = body.len() as u32 + ehsize;
            body.extend_from_slice(&shstrtab);
            let shoff = ehsize + body.len() as u32;

            let mut out = Vec::new();
            out.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
            out.push(1); // ELFCLASS32
            out.push(2); // ELFDATA2MSB
            out.push(1); // EV_CURRENT
            out.extend_from_slice(&[0u8; 9]);
            out.extend_from_slice(&(if self.is_exec { 2u16 } else { 1u16 }).to_be_bytes()); // e_type
            out.extend_from_slice(&20u16.to_be_bytes()); // e_machine = EM_PPC
            out.extend_from_slice(&1u32.to_be_bytes()); // e_version
            out.extend_from_slice(&0u32.to_be_bytes()); // e_entry
            out.extend_from_slice(&0u32.to_be_bytes()); // e_phoff
            out.extend_from_slice(&shoff.to_be_bytes()); // e_shoff
            out.extend_from_slice(&0u32.to_be_bytes()); // e_flags
            out.extend_from_slice(&(ehsize as u16).to_be_bytes()); // e_ehsize
            out.extend_from_slice(&0u16.to_be_bytes()); // e_phentsize
            out.extend_from_slice(&0u16.to_be_bytes()); // e_phnum
            out.extend_from_slice(&40u16.to_be_bytes()); // e_shentsize
            out.extend_from_slice(&(self.sections.len() as u16 + 2).to_be_bytes()); // e_shnum: null + sections + shstrtab
            out.extend_from_slice(&(shstrndx as u16).to_be_bytes()); // e_shstrndx
            assert_eq!(out.len(), ehsize as usize);

            out.extend_from_slice(&body);

            // Null section header.
            out.extend_from_slice(&[0u8; 40]);
            for (i, section) in self.sections.iter().enumerate() {
                out.extend_from_slice(&name_offsets[i].to_be_bytes());
                out.extend_from_slice(&section.sh_type.to_be_bytes());
                out.extend_from_slice(&section.flags.to_be_bytes());
                out.extend_from_slice(&0u32.to_be_bytes()); // sh_addr
                out.extend_from_slice(&section_offsets[i].to_be_bytes());
                out.extend_from_slice(&(section.data.len() as u32).to_be_bytes());
                out.extend_from_slice(&section.link.to_be_bytes());
                out.extend_from_slice(&section.info.to_be_bytes());
                out.extend_from_slice(&section.addralign.to_be_bytes());
                out.extend_from_slice(&section.entsize.to_be_bytes());
            }
            // shstrtab section header; its own name is not recorded anywhere.
            out.extend_from_slice(&0u32.to_be_bytes()); // sh_name
            out.extend_from_slice(&SHT_STRTAB.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&shstrtab_offset.to_be_bytes());
            out.extend_from_slice(&(shstrtab.len() as u32).to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());

            out
        }
    }

    fn symtab_bytes(entries: &[(u32, u32, u8, u16)]) -> Vec<u8> {
        let mut out = vec![0u8; 16]; // null symbol
        for &(name, value, info, shndx) in entries {
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&value.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
            out.push(info);
            out.push(0);
            out.extend_from_slice(&shndx.to_be_bytes());
        }
        out
    }

    fn strtab_bytes(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
        let mut out = vec![0u8];
        let mut offsets = Vec::new();
        for name in names {
            offsets.push(out.len() as u32);
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        (out, offsets)
    }

    fn unique_temp_path(label: &str) -> std::path::PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("ppcdl_test_{}_{}_{}", std::process::id(), label, n))
    }

    fn write_temp(label: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = unique_temp_path(label);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    /// A host executable exporting one function, `host_fn`, at a fixed
    /// value so a loaded object can resolve against it.
    fn build_host_image(extra_symbol: Option<(&str, u32)>) -> Vec<u8> {
        let (strtab, offsets) = strtab_bytes(
            &extra_symbol
                .map(|(n, _)| vec![n])
                .unwrap_or_else(|| vec!["host_fn"]),
        );
        let value = extra_symbol.map(|(_, v)| v).unwrap_or(0x8000_1000);
        // STB_GLOBAL (1) << 4 | STT_FUNC (2)
        let symtab = symtab_bytes(&[(offsets[0], value, 0x12, 1)]);

        ElfBuilder::new(true)
            .section(SectionSpec {
                name: ".symtab".to_string(),
                sh_type: SHT_SYMTAB,
                flags: 0,
                data: symtab,
                link: 2,
                info: 0,
                entsize: 16,
                addralign: 4,
            })
            .section(SectionSpec {
                name: ".strtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                data: strtab,
                link: 0,
                info: 0,
                entsize: 0,
                addralign: 1,
            })
            .build()
    }

    /// A loadable object with a `.text` of `lis r3,0 / addi r3,r3,0`
    /// and two relocations (`ADDR16_HA`, `ADDR16_LO`) against `referent`.
    fn build_object(referent: &str, rel_types: &[(u32, u8)]) -> Vec<u8> {
        let text = vec![0x3C, 0x60, 0x00, 0x00, 0x38, 0x63, 0x00, 0x00];

        let (strtab, offsets) = strtab_bytes(&[referent]);
        let symtab = symtab_bytes(&[(offsets[0], 0, 0x10, 0)]); // GLOBAL, NOTYPE(undef-ish) -- used only as rela referent

        // section layout: 1=.text 2=.symtab 3=.strtab 4=.rela.text
        let mut rela = Vec::new();
        for &(offset, rel_type) in rel_types {
            rela.extend_from_slice(&offset.to_be_bytes());
            let info = (1u32 << 8) | rel_type as u32; // symbol index 1 (the only non-null symtab entry)
            rela.extend_from_slice(&info.to_be_bytes());
            rela.extend_from_slice(&0i32.to_be_bytes());
        }

        ElfBuilder::new(false)
            .section(SectionSpec {
                name: ".text".to_string(),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_EXECINSTR,
                data: text,
                link: 0,
                info: 0,
                entsize: 0,
                addralign: 4,
            })
            .section(SectionSpec {
                name: ".symtab".to_string(),
                sh_type: SHT_SYMTAB,
                flags: 0,
                data: symtab,
                link: 3,
                info: 0,
                entsize: 16,
                addralign: 4,
            })
            .section(SectionSpec {
                name: ".strtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                data: strtab,
                link: 0,
                info: 0,
                entsize: 0,
                addralign: 1,
            })
            .section(SectionSpec {
                name: ".rela.text".to_string(),
                sh_type: SHT_RELA,
                flags: 0,
                data: rela,
                link: 2,
                info: 1, // targets .text, section index 1
                entsize: 12,
                addralign: 4,
            })
            .build()
    }

    /// A loadable object with an allocatable `.bss` of 16 bytes and no
    /// relocations, to exercise NOBITS zero-fill reservation.
    fn build_bss_only_object() -> Vec<u8> {
        ElfBuilder::new(false)
            .section(SectionSpec {
                name: ".bss".to_string(),
                sh_type: SHT_NOBITS,
                flags: SHF_ALLOC | SHF_WRITE,
                data: vec![0u8; 16],
                link: 0,
                info: 0,
                entsize: 0,
                addralign: 4,
            })
            .build()
    }

    /// A loadable object with a zero-size allocatable `.sdata`: an empty
    /// but still-materialised PROGBITS section.
    fn build_empty_progbits_object() -> Vec<u8> {
        ElfBuilder::new(false)
            .section(SectionSpec {
                name: ".sdata".to_string(),
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_WRITE,
                data: Vec::new(),
                link: 0,
                info: 0,
                entsize: 0,
                addralign: 4,
            })
            .build()
    }

    fn with_reset<R>(f: impl FnOnce() -> R) -> R {
        // Every public entry point shares one process-wide `LoaderState`;
        // tests run concurrently within one process need to serialize
        // through a second lock so they don't observe each other's host
        // image / live-set.
        static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        let _guard = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        state::reset_for_test();
        let result = f();
        state::reset_for_test();
        result
    }

    #[test]
    fn dlinit_then_dlopen_resolves_against_host() {
        with_reset(|| {
            let host_path = write_temp("host", &build_host_image(None));
            assert_eq!(dlinit(&host_path), 0);

            let obj_path = write_temp(
                "obj",
                &build_object("host_fn", &[(2, 6), (6, 4)]), // ADDR16_HA at offset 2, ADDR16_LO at offset 6
            );
            let handle = dlopen(&obj_path, NOW).expect("dlopen should succeed");

            // #ha(0x80001000) = 0x8000, #lo(0x80001000) = 0x1000.
            assert!(dlsym(handle, "host_fn").is_none()); // not a locally-defined symbol
            assert_eq!(dlerror(), Some(Error::SymbolNotFound.to_string()));

            assert_eq!(dlclose(handle), 0);
            std::fs::remove_file(host_path).ok();
            std::fs::remove_file(obj_path).ok();
        });
    }

    #[test]
    fn double_dlinit_fails_and_preserves_first_host() {
        with_reset(|| {
            let host_path = write_temp("host2", &build_host_image(None));
            assert_eq!(dlinit(&host_path), 0);
            assert_eq!(dlinit(&host_path), 1);
            assert_eq!(dlerror(), Some(Error::AlreadyInitialized.to_string()));

            let obj_path = write_temp("obj2", &build_bss_only_object());
            assert!(dlopen(&obj_path, LAZY).is_some());

            std::fs::remove_file(host_path).ok();
            std::fs::remove_file(obj_path).ok();
        });
    }

    #[test]
    fn empty_allocatable_progbits_section_loads_without_panicking() {
        with_reset(|| {
            let host_path = write_temp("host_empty", &build_host_image(None));
            dlinit(&host_path);

            let obj_path = write_temp("obj_empty", &build_empty_progbits_object());
            let handle = dlopen(&obj_path, NOW);
            assert!(handle.is_some());

            std::fs::remove_file(host_path).ok();
            std::fs::remove_file(obj_path).ok();
        });
    }

    #[test]
    fn dlopen_without_dlinit_fails() {
        with_reset(|| {
            let obj_path = write_temp("obj3", &build_bss_only_object());
            assert!(dlopen(&obj_path, NOW).is_none());
            assert_eq!(dlerror(), Some(Error::NotInitialized.to_string()));
            std::fs::remove_file(obj_path).ok();
        });
    }

    #[test]
    fn unresolved_symbol_fails_dlopen_and_leaves_live_set_unchanged() {
        with_reset(|| {
            let host_path = write_temp("host4", &build_host_image(None));
            dlinit(&host_path);

            let obj_path = write_temp("obj4", &build_object("xyzzy", &[(2, 6)]));
            let before = state::with_loader_state(|s| s.live_count());
            assert!(dlopen(&obj_path, NOW).is_none());
            let after = state::with_loader_state(|s| s.live_count());
            assert_eq!(before, after);

            let err = dlerror().expect("an error should be set");
            assert!(err.contains("xyzzy"));

            std::fs::remove_file(host_path).ok();
            std::fs::remove_file(obj_path).ok();
        });
    }

    #[test]
    fn invalid_handle_is_rejected_by_dlsym_and_dlclose() {
        with_reset(|| {
            let bogus = Handle::for_test(0xdead_beef);
            assert!(dlsym(bogus, "anything").is_none());
            assert_eq!(dlerror(), Some(Error::InvalidHandle.to_string()));
            assert_eq!(dlclose(bogus), 1);
            assert_eq!(dlerror(), Some(Error::InvalidHandle.to_string()));
        });
    }

    #[test]
    fn dlerror_returns_none_when_nothing_pending() {
        with_reset(|| {
            assert_eq!(dlerror(), None);
        });
    }

    #[test]
    fn diagnostic_sink_receives_progress_notes_without_affecting_outcome() {
        use std::sync::{Arc, Mutex as StdMutex};

        struct Captured(Arc<StdMutex<Vec<String>>>);
        impl DiagnosticSink for Captured {
            fn note(&self, message: &str) {
                self.0.lock().unwrap_or_else(|p| p.into_inner()).push(message.to_string());
            }
        }

        with_reset(|| {
            let log = Arc::new(StdMutex::new(Vec::new()));
            set_diagnostic_sink(Captured(log.clone()));

            let host_path = write_temp("host5", &build_host_image(None));
            assert_eq!(dlinit(&host_path), 0);

            let obj_path = write_temp("obj5", &build_bss_only_object());
            assert!(dlopen(&obj_path, NOW).is_some());

            assert!(!log.lock().unwrap().is_empty());

            std::fs::remove_file(host_path).ok();
            std::fs::remove_file(obj_path).ok();
        });
    }

    #[test]
    fn cache_sync_hook_runs_once_per_materialised_section() {
        use std::sync::{Arc, Mutex as StdMutex};

        struct Counting(Arc<StdMutex<u32>>);
        impl CacheSync for Counting {
            fn sync(&self, _base: u32, _len: u32) {
                *self.0.lock().unwrap_or_else(|p| p.into_inner()) += 1;
            }
        }

        with_reset(|| {
            let count = Arc::new(StdMutex::new(0));
            set_cache_sync(Counting(count.clone()));

            let host_path = write_temp("host6", &build_host_image(None));
            dlinit(&host_path);

            let obj_path = write_temp("obj6", &build_bss_only_object());
            assert!(dlopen(&obj_path, NOW).is_some());

            assert_eq!(*count.lock().unwrap(), 1); // one allocatable section: .bss

            std::fs::remove_file(host_path).ok();
            std::fs::remove_file(obj_path).ok();
        });
    }
}

//! The symbol resolver.
//!
//! Unifies three namespaces under a single by-name lookup: the object
//! being loaded (local scope), the host image, and the exported
//! symbols of objects already resident in the live-set, in the order
//! they were loaded (first-loaded wins on a name collision).

use crate::object::SymbolScope;

/// Searches `local`, then `host`, then each of `previously_loaded` in
/// order, for an exact name match with a non-null address. Returns the
/// first hit.
pub(crate) fn resolve(
    name: &str,
    local: &dyn SymbolScope,
    host: &dyn SymbolScope,
    previously_loaded: &[&dyn SymbolScope],
) -> Option<u32> {
    local
        .find(name)
        .or_else(|| host.find(name))
        .or_else(|| previously_loaded.iter().find_map(|scope| scope.find(name)))
}

/// Same search order as [`resolve`], but returns the referent's raw
/// section-local offset rather than its runtime address. Used for the
/// `SECTOFF` relocation family.
pub(crate) fn resolve_section_offset(
    name: &str,
    local: &dyn SymbolScope,
    host: &dyn SymbolScope,
    previously_loaded: &[&dyn SymbolScope],
) -> Option<u32> {
    local
        .find_value(name)
        .or_else(|| host.find_value(name))
        .or_else(|| previously_loaded.iter().find_map(|scope| scope.find_value(name)))
}

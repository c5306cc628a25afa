//! Loaded module description.

use std::fmt;
use std::path::Path;

use super::Address;

/// A module image reported by the target.
///
/// Modules are keyed by base address. A module-load event for an address that
/// already holds a module with a different short name replaces the entry
/// instead of merging with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module
{
    /// Address reported by the module-load event
    pub address: Address,
    /// Name as reported by the target (e.g. `ntoskrnl.exe`)
    pub name: String,
    /// Lower-case file stem used for identity checks (e.g. `ntoskrnl`)
    pub short_name: String,
    /// Load base
    pub base: Address,
    /// Extent of the image; zero when symbols are unresolved
    pub size: u64,
    /// Whether a symbol table was loaded for the module
    pub resolved: bool,
}

impl Module
{
    #[must_use]
    pub fn new(name: &str, address: Address) -> Self
    {
        Self {
            address,
            name: name.to_string(),
            short_name: short_name(name),
            base: address,
            size: 0,
            resolved: false,
        }
    }

    /// Whether `address` lies inside `[base, base + size)`.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        address.offset_from(self.base).is_some_and(|offset| offset < self.size)
    }

    /// One past the last owned address.
    #[must_use]
    pub fn end(&self) -> Address
    {
        self.base.saturating_add(self.size)
    }
}

impl fmt::Display for Module
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} @ {}", self.short_name, self.base)?;
        if self.resolved {
            write!(f, " (+0x{:x})", self.size)
        } else {
            f.write_str(" (no symbols)")
        }
    }
}

/// Lower-case file stem of a module path or name.
///
/// Targets are inconsistent about case and about whether they report a path,
/// so identity is decided on this form.
#[must_use]
pub fn short_name(name: &str) -> String
{
    let file = name.rsplit(['\\', '/']).next().unwrap_or(name);
    Path::new(file)
        .file_stem()
        .map_or_else(|| file.to_string(), |stem| stem.to_string_lossy().into_owned())
        .to_lowercase()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_short_name_normalizes()
    {
        assert_eq!(short_name("NTOSKRNL.EXE"), "ntoskrnl");
        assert_eq!(short_name("\\SystemRoot\\system32\\hal.dll"), "hal");
        assert_eq!(short_name("ntoskrnl"), "ntoskrnl");
    }

    #[test]
    fn test_contains_respects_size()
    {
        let mut module = Module::new("ntoskrnl.exe", Address::from(0x1000u64));
        assert!(!module.contains(Address::from(0x1000u64)));

        module.size = 0x100;
        assert!(module.contains(Address::from(0x1000u64)));
        assert!(module.contains(Address::from(0x10ffu64)));
        assert!(!module.contains(Address::from(0x1100u64)));
        assert!(!module.contains(Address::from(0x0fffu64)));
    }
}

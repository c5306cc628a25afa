//! # Symbols
//!
//! Module table and address → source resolution for one debug session.
//!
//! [`SymbolContext`] owns every module the target has reported, keyed by base
//! address, together with the line table parsed from that module's symbol
//! file. Symbol files are looked up by name anywhere below the configured
//! output directory (the build tree of the kernel being debugged).
//!
//! ## Resolution
//!
//! [`SymbolContext::file_and_line`] runs on every stop, so it is two binary
//! searches: a `BTreeMap` range query for the module with the greatest base at
//! or below the address, then a `partition_point` in that module's sorted line
//! table. An address is only ever resolved against the module whose
//! `[base, base + size)` range contains it.
//!
//! ## Failure handling
//!
//! A module whose symbol file is missing or unreadable stays in the table as
//! unresolved. Its [`SymbolError`] is kept (see [`SymbolContext::module_error`])
//! and lookups inside it answer [`SourceLocation::unknown`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use rosdbg_core::symbols::SymbolContext;
//! use rosdbg_core::types::Address;
//!
//! let symbols = SymbolContext::new();
//! symbols.set_output_path("/home/me/reactos/output-MinGW-i386");
//! symbols.load_module("ntoskrnl.exe", Address::from(0x8040_0000));
//! println!("{}", symbols.file_and_line(Address::from(0x8040_1050)));
//! ```

mod dwarf;
mod format;
mod table;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use dwarf::DwarfImageFormat;
pub use format::{LineMapFormat, ModuleFormat, LINE_MAP_EXTENSION};
pub use table::{LineEntry, LineTable, LineTableBuilder};

use crate::error::SymbolError;
use crate::types::module::short_name;
use crate::types::{Address, Module, SourceLocation};

/// How deep below the output directory symbol files are searched for.
const MAX_INDEX_DEPTH: usize = 8;

#[derive(Debug)]
struct LoadedModule
{
    module: Module,
    table: Option<Arc<LineTable>>,
    error: Option<SymbolError>,
}

#[derive(Debug, Default)]
struct SymbolTables
{
    output_path: Option<PathBuf>,
    modules: BTreeMap<u64, LoadedModule>,
}

/// A module whose symbols have been looked up but which is not in the table
/// yet. Produced by [`SymbolContext::prepare_module`].
#[derive(Debug)]
pub struct PreparedModule(LoadedModule);

impl PreparedModule
{
    #[must_use]
    pub fn module(&self) -> &Module
    {
        &self.0.module
    }
}

/// Lower-case file name → first path found with that name.
type FileIndex = HashMap<String, PathBuf>;

/// Per-session module table and symbol cache.
///
/// All methods take `&self`; the context is shared as `Arc<SymbolContext>`
/// between the session reader thread and symbol consumers.
#[derive(Debug)]
pub struct SymbolContext
{
    tables: RwLock<SymbolTables>,
    file_index: Mutex<Option<Arc<FileIndex>>>,
    formats: Vec<Box<dyn ModuleFormat>>,
}

impl Default for SymbolContext
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SymbolContext
{
    /// Context with the built-in formats: `.lines` maps, then DWARF images.
    #[must_use]
    pub fn new() -> Self
    {
        Self::with_formats(vec![Box::new(LineMapFormat), Box::new(DwarfImageFormat)])
    }

    /// Context that tries `formats` in order.
    #[must_use]
    pub fn with_formats(formats: Vec<Box<dyn ModuleFormat>>) -> Self
    {
        Self {
            tables: RwLock::new(SymbolTables::default()),
            file_index: Mutex::new(None),
            formats,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SymbolTables>
    {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SymbolTables>
    {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset for a new session.
    ///
    /// The module table is emptied and the output directory will be re-indexed
    /// on the next load, since a rebuild may have produced new files.
    pub fn initialize(&self)
    {
        self.write().modules.clear();
        self.invalidate_index();
        tracing::debug!("Symbol context initialized");
    }

    /// Release every module and line table.
    pub fn clear(&self)
    {
        let dropped = {
            let mut tables = self.write();
            std::mem::take(&mut tables.modules)
        };
        if !dropped.is_empty() {
            tracing::debug!("Released symbols for {} modules", dropped.len());
        }
    }

    /// Set the directory searched for symbol files.
    pub fn set_output_path(&self, path: impl Into<PathBuf>)
    {
        let path = path.into();
        tracing::info!("Symbol output directory: {}", path.display());
        self.write().output_path = Some(path);
        self.invalidate_index();
    }

    #[must_use]
    pub fn output_path(&self) -> Option<PathBuf>
    {
        self.read().output_path.clone()
    }

    fn invalidate_index(&self)
    {
        *self.file_index.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Record a module reported loaded at `base`.
    ///
    /// Returns the new module, or `None` when a module with the same short
    /// name already sits at `base` (a repeated load is not a change). A module
    /// with a different name at `base` is replaced, and its line table with it.
    ///
    /// Never fails: symbol problems leave the module unresolved.
    pub fn load_module(&self, name: &str, base: Address) -> Option<Module>
    {
        let prepared = self.prepare_module(name, base)?;
        self.commit_module(prepared)
    }

    /// First half of [`load_module`](Self::load_module): find and parse the
    /// symbol file for `name` without touching the module table.
    ///
    /// Indexing and parsing may block for a long time, so callers holding
    /// their own locks should run this before taking them and only hold them
    /// across [`commit_module`](Self::commit_module).
    ///
    /// Returns `None` when the same module already sits at `base`.
    pub fn prepare_module(&self, name: &str, base: Address) -> Option<PreparedModule>
    {
        let short = short_name(name);
        let output_path = {
            let tables = self.read();
            if tables
                .modules
                .get(&base.value())
                .is_some_and(|loaded| loaded.module.short_name == short)
            {
                tracing::trace!("Module {short} already loaded at {base}");
                return None;
            }
            tables.output_path.clone()
        };

        let mut module = Module::new(name, base);
        let (table, error) = match self.resolve(&short, output_path.as_deref()) {
            Ok(table) => {
                module.size = table.size();
                module.resolved = true;
                (Some(Arc::new(table)), None)
            }
            Err(err) => {
                tracing::warn!("Symbols for {short} unavailable: {err}");
                (None, Some(err))
            }
        };
        Some(PreparedModule(LoadedModule { module, table, error }))
    }

    /// Second half of [`load_module`](Self::load_module): insert a prepared
    /// module. Only takes the module table lock.
    ///
    /// Returns `None` if the same module was loaded at that base in between.
    pub fn commit_module(&self, prepared: PreparedModule) -> Option<Module>
    {
        let PreparedModule(loaded) = prepared;
        let module = loaded.module.clone();
        let base = module.base;

        let mut tables = self.write();
        if tables
            .modules
            .get(&base.value())
            .is_some_and(|existing| existing.module.short_name == module.short_name)
        {
            return None;
        }
        if let Some(previous) = tables.modules.insert(base.value(), loaded) {
            tracing::info!(
                "Module {} at {base} replaced by {}",
                previous.module.short_name,
                module.short_name
            );
        } else {
            tracing::info!("Module loaded: {module}");
        }
        Some(module)
    }

    /// Forget the module at `base`.
    pub fn unload_module(&self, base: Address) -> Option<Module>
    {
        let removed = self.write().modules.remove(&base.value())?;
        tracing::info!("Module unloaded: {}", removed.module);
        Some(removed.module)
    }

    /// Resolve `address` to a source location, `("unknown", 0)` on a miss.
    #[must_use]
    pub fn file_and_line(&self, address: Address) -> SourceLocation
    {
        let tables = self.read();
        let Some((_, loaded)) = tables.modules.range(..=address.value()).next_back() else {
            return SourceLocation::unknown();
        };
        if !loaded.module.contains(address) {
            return SourceLocation::unknown();
        }
        let Some(table) = &loaded.table else {
            return SourceLocation::unknown();
        };
        address
            .offset_from(loaded.module.base)
            .and_then(|offset| table.lookup(offset))
            .map_or_else(SourceLocation::unknown, |(file, line)| SourceLocation::new(file, line))
    }

    /// Address of the first code generated for `file:line`.
    ///
    /// ## Errors
    ///
    /// [`SymbolError::LineNotFound`] if no resolved module has code there.
    pub fn address_for_line(&self, file: &str, line: u32) -> Result<Address, SymbolError>
    {
        let tables = self.read();
        tables
            .modules
            .values()
            .find_map(|loaded| {
                let offset = loaded.table.as_ref()?.offset_of(file, line)?;
                Some(loaded.module.base + offset)
            })
            .ok_or_else(|| SymbolError::LineNotFound {
                file: file.to_string(),
                line,
            })
    }

    /// Module whose range contains `address`.
    #[must_use]
    pub fn module_at(&self, address: Address) -> Option<Module>
    {
        let tables = self.read();
        let (_, loaded) = tables.modules.range(..=address.value()).next_back()?;
        loaded.module.contains(address).then(|| loaded.module.clone())
    }

    /// All modules, ordered by base address.
    #[must_use]
    pub fn modules(&self) -> Vec<Module>
    {
        self.read().modules.values().map(|loaded| loaded.module.clone()).collect()
    }

    /// Why the module at `base` has no symbols, if it has none.
    #[must_use]
    pub fn module_error(&self, base: Address) -> Option<SymbolError>
    {
        self.read().modules.get(&base.value())?.error.clone()
    }

    fn resolve(&self, module: &str, output_path: Option<&Path>) -> Result<LineTable, SymbolError>
    {
        let root = output_path.ok_or(SymbolError::NoOutputPath)?;
        let index = self.index(root);

        let mut last_error = None;
        for format in &self.formats {
            for candidate in format.candidates(module) {
                let Some(path) = index.get(&candidate.to_lowercase()) else {
                    continue;
                };
                tracing::debug!("Trying {} symbols for {module} from {}", format.name(), path.display());
                match format.parse(path) {
                    Ok(table) => return Ok(table),
                    Err(err) => {
                        tracing::debug!("{err}");
                        last_error = Some(err);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SymbolError::NotFound {
            module: module.to_string(),
        }))
    }

    fn index(&self, root: &Path) -> Arc<FileIndex>
    {
        let mut slot = self.file_index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = slot.as_ref() {
            return Arc::clone(index);
        }
        let mut index = FileIndex::new();
        index_directory(root, 0, &mut index);
        tracing::debug!("Indexed {} files under {}", index.len(), root.display());
        let index = Arc::new(index);
        *slot = Some(Arc::clone(&index));
        index
    }
}

fn index_directory(dir: &Path, depth: usize, index: &mut FileIndex)
{
    if depth > MAX_INDEX_DEPTH {
        return;
    }
    let mut entries: Vec<_> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(Result::ok).collect(),
        Err(err) => {
            tracing::debug!("Skipping {}: {err}", dir.display());
            return;
        }
    };
    entries.sort_by_key(fs::DirEntry::file_name);

    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry.path();
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => subdirs.push(path),
            Ok(_) => {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                index.entry(name).or_insert(path);
            }
            Err(_) => {}
        }
    }
    // Files nearer the root win over same-named files deeper down
    for subdir in subdirs {
        index_directory(&subdir, depth + 1, index);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn write_lines(dir: &Path, name: &str, contents: &str)
    {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_load_without_output_path_is_unresolved()
    {
        let symbols = SymbolContext::new();
        let module = symbols.load_module("ntoskrnl.exe", Address::from(0x1000)).unwrap();
        assert!(!module.resolved);
        assert_eq!(symbols.module_error(module.base), Some(SymbolError::NoOutputPath));
        assert_eq!(symbols.file_and_line(Address::from(0x1050)), SourceLocation::unknown());
    }

    #[test]
    fn test_load_is_idempotent_per_name()
    {
        let dir = tempfile::tempdir().unwrap();
        write_lines(dir.path(), "ntoskrnl.lines", "size 0x100\n0x0 ke/main.c 10\n");
        let symbols = SymbolContext::new();
        symbols.set_output_path(dir.path());

        assert!(symbols.load_module("ntoskrnl.exe", Address::from(0x1000)).is_some());
        assert!(symbols.load_module("NTOSKRNL.EXE", Address::from(0x1000)).is_none());
        assert_eq!(symbols.modules().len(), 1);
    }

    #[test]
    fn test_symbol_files_found_in_subdirectories()
    {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("hal").join("halx86");
        fs::create_dir_all(&nested).unwrap();
        write_lines(&nested, "hal.lines", "size 0x40\n0x0 hal/halx86/irql.c 42\n");

        let symbols = SymbolContext::new();
        symbols.set_output_path(dir.path());
        let module = symbols.load_module("hal.dll", Address::from(0x2000)).unwrap();
        assert!(module.resolved);
        assert_eq!(module.size, 0x40);
        assert_eq!(
            symbols.file_and_line(Address::from(0x2010)),
            SourceLocation::new("hal/halx86/irql.c", 42)
        );
    }

    #[test]
    fn test_unload_and_clear()
    {
        let dir = tempfile::tempdir().unwrap();
        write_lines(dir.path(), "ntoskrnl.lines", "size 0x100\n0x0 ke/main.c 10\n");
        let symbols = SymbolContext::new();
        symbols.set_output_path(dir.path());
        symbols.load_module("ntoskrnl.exe", Address::from(0x1000));
        symbols.load_module("hal.dll", Address::from(0x9000));

        let removed = symbols.unload_module(Address::from(0x1000)).unwrap();
        assert_eq!(removed.short_name, "ntoskrnl");
        assert!(symbols.unload_module(Address::from(0x1000)).is_none());
        assert_eq!(symbols.file_and_line(Address::from(0x1010)), SourceLocation::unknown());

        symbols.clear();
        assert!(symbols.modules().is_empty());
        assert_eq!(symbols.output_path().as_deref(), Some(dir.path()));
    }
}

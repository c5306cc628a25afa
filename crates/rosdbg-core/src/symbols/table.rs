//! Sorted address → line tables.

use std::collections::HashMap;
use std::path::Path;

/// One contiguous run of code belonging to a single source line.
///
/// Offsets are relative to the module base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry
{
    pub start: u64,
    pub end: u64,
    /// Index into [`LineTable::files`]
    pub file: usize,
    pub line: u32,
}

impl LineEntry
{
    #[must_use]
    pub const fn contains(&self, offset: u64) -> bool
    {
        self.start <= offset && offset < self.end
    }
}

/// Line table of one module, sorted by start offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable
{
    files: Vec<String>,
    entries: Vec<LineEntry>,
    size: u64,
}

impl LineTable
{
    /// Image extent in bytes; lookups at or past this offset miss.
    #[must_use]
    pub const fn size(&self) -> u64
    {
        self.size
    }

    #[must_use]
    pub fn files(&self) -> &[String]
    {
        &self.files
    }

    #[must_use]
    pub fn entries(&self) -> &[LineEntry]
    {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Find the entry owning `offset`.
    #[must_use]
    pub fn lookup(&self, offset: u64) -> Option<(&str, u32)>
    {
        if offset >= self.size {
            return None;
        }
        let index = self.entries.partition_point(|entry| entry.start <= offset);
        let entry = self.entries.get(index.checked_sub(1)?)?;
        if !entry.contains(offset) {
            return None;
        }
        Some((self.files[entry.file].as_str(), entry.line))
    }

    /// Lowest offset generated for `file:line`.
    ///
    /// `file` matches either the stored name exactly or its final path
    /// component, ignoring case. When the exact line has no code the next
    /// line below it that does is used, which is where a debugger would stop.
    #[must_use]
    pub fn offset_of(&self, file: &str, line: u32) -> Option<u64>
    {
        let wanted: Vec<usize> = self
            .files
            .iter()
            .enumerate()
            .filter(|(_, name)| same_file(name, file))
            .map(|(index, _)| index)
            .collect();
        if wanted.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .filter(|entry| wanted.contains(&entry.file) && entry.line >= line)
            .min_by_key(|entry| (entry.line, entry.start))
            .map(|entry| entry.start)
    }
}

fn same_file(stored: &str, wanted: &str) -> bool
{
    if stored.eq_ignore_ascii_case(wanted) {
        return true;
    }
    let stored = stored.replace('\\', "/");
    let wanted = wanted.replace('\\', "/");
    let stored = stored.to_lowercase();
    let wanted = wanted.to_lowercase();
    if stored == wanted || stored.ends_with(&format!("/{wanted}")) {
        return true;
    }
    let file_name = |path: &str| Path::new(path).file_name().map(|name| name.to_string_lossy().into_owned());
    // Only fall back to the bare name when the caller gave a bare name
    !wanted.contains('/') && file_name(&stored) == file_name(&wanted)
}

/// Incremental constructor for [`LineTable`].
#[derive(Debug, Default)]
pub struct LineTableBuilder
{
    files: Vec<String>,
    file_ids: HashMap<String, usize>,
    entries: Vec<LineEntry>,
}

impl LineTableBuilder
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Intern a file name.
    pub fn file(&mut self, name: &str) -> usize
    {
        if let Some(&id) = self.file_ids.get(name) {
            return id;
        }
        let id = self.files.len();
        self.files.push(name.to_string());
        self.file_ids.insert(name.to_string(), id);
        id
    }

    /// Add `[start, end)` for `file:line`. Empty ranges are dropped.
    pub fn push(&mut self, start: u64, end: u64, file: usize, line: u32)
    {
        if end > start {
            self.entries.push(LineEntry { start, end, file, line });
        }
    }

    /// Sort, clip overlaps and fix the table size.
    ///
    /// A `size` of zero means "up to the end of the last entry".
    #[must_use]
    pub fn finish(mut self, size: u64) -> LineTable
    {
        self.entries.sort_by_key(|entry| (entry.start, entry.end));
        self.entries.dedup_by_key(|entry| entry.start);

        // Ranges must not overlap or partition_point could pick the wrong one
        for i in 1..self.entries.len() {
            let next_start = self.entries[i].start;
            let previous = &mut self.entries[i - 1];
            previous.end = previous.end.min(next_start);
        }

        let covered = self.entries.last().map_or(0, |entry| entry.end);
        let size = if size == 0 { covered } else { size };
        for entry in &mut self.entries {
            entry.end = entry.end.min(size);
        }
        self.entries.retain(|entry| entry.end > entry.start);

        LineTable {
            files: self.files,
            entries: self.entries,
            size,
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn sample() -> LineTable
    {
        let mut builder = LineTableBuilder::new();
        let init = builder.file("ntoskrnl/ke/i386/kiinit.c");
        let main = builder.file("ntoskrnl/ke/main.c");
        builder.push(0x50, 0x60, init, 120);
        builder.push(0x00, 0x20, main, 10);
        builder.push(0x20, 0x50, main, 12);
        builder.finish(0x100)
    }

    #[test]
    fn test_lookup_finds_owning_entry()
    {
        let table = sample();
        assert_eq!(table.lookup(0x00), Some(("ntoskrnl/ke/main.c", 10)));
        assert_eq!(table.lookup(0x1f), Some(("ntoskrnl/ke/main.c", 10)));
        assert_eq!(table.lookup(0x20), Some(("ntoskrnl/ke/main.c", 12)));
        assert_eq!(table.lookup(0x55), Some(("ntoskrnl/ke/i386/kiinit.c", 120)));
    }

    #[test]
    fn test_lookup_misses_gaps_and_past_size()
    {
        let table = sample();
        assert_eq!(table.lookup(0x60), None);
        assert_eq!(table.lookup(0x100), None);
        assert_eq!(table.lookup(u64::MAX), None);
    }

    #[test]
    fn test_overlaps_are_clipped()
    {
        let mut builder = LineTableBuilder::new();
        let file = builder.file("a.c");
        builder.push(0x0, 0x40, file, 1);
        builder.push(0x10, 0x20, file, 2);
        let table = builder.finish(0);
        assert_eq!(table.size(), 0x20);
        assert_eq!(table.lookup(0x0f), Some(("a.c", 1)));
        assert_eq!(table.lookup(0x10), Some(("a.c", 2)));
        assert_eq!(table.lookup(0x30), None);
    }

    #[test]
    fn test_offset_of_matches_by_name()
    {
        let table = sample();
        assert_eq!(table.offset_of("ntoskrnl/ke/main.c", 12), Some(0x20));
        assert_eq!(table.offset_of("MAIN.C", 10), Some(0x00));
        assert_eq!(table.offset_of("ntoskrnl\\ke\\i386\\kiinit.c", 120), Some(0x50));
        // Line 11 has no code, so the next line with code wins
        assert_eq!(table.offset_of("main.c", 11), Some(0x20));
        assert_eq!(table.offset_of("main.c", 13), None);
        assert_eq!(table.offset_of("ke/main.c", 12), Some(0x20));
        assert_eq!(table.offset_of("other/main.c", 10), None);
    }
}

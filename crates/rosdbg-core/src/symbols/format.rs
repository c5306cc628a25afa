//! Symbol file formats.
//!
//! A [`ModuleFormat`] knows which file names to look for next to a module and
//! how to turn such a file into a [`LineTable`]. The symbol context tries its
//! formats in order and uses the first candidate file that exists.

use std::fmt::Debug;
use std::fs;
use std::path::Path;

use super::table::{LineTable, LineTableBuilder};
use crate::error::SymbolError;

/// A parser for one kind of symbol file.
pub trait ModuleFormat: Send + Sync + Debug
{
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// File names (no directories) that may hold symbols for `module`.
    ///
    /// `module` is the lower-case short name, e.g. `ntoskrnl`.
    fn candidates(&self, module: &str) -> Vec<String>;

    /// Parse the file at `path`.
    ///
    /// ## Errors
    ///
    /// [`SymbolError::Corrupt`] if the contents cannot be understood and
    /// [`SymbolError::Io`] if the file cannot be read.
    fn parse(&self, path: &Path) -> Result<LineTable, SymbolError>;
}

/// Plain-text line map, one file per module (`ntoskrnl.lines`).
///
/// ```text
/// # comments and blank lines are ignored
/// size 0x2000
/// 0x0000 ntoskrnl/ke/main.c 10
/// 0x0020 ntoskrnl/ke/main.c 12
/// ```
///
/// Each row covers the bytes up to the next row's offset; the last row runs to
/// `size`. Without a `size` line the last row covers a single byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineMapFormat;

/// Extension used by [`LineMapFormat`].
pub const LINE_MAP_EXTENSION: &str = "lines";

impl ModuleFormat for LineMapFormat
{
    fn name(&self) -> &'static str
    {
        "line map"
    }

    fn candidates(&self, module: &str) -> Vec<String>
    {
        vec![format!("{module}.{LINE_MAP_EXTENSION}")]
    }

    fn parse(&self, path: &Path) -> Result<LineTable, SymbolError>
    {
        let text = fs::read_to_string(path).map_err(|err| SymbolError::Io(format!("{}: {err}", path.display())))?;
        parse_line_map(&text).map_err(|reason| SymbolError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })
    }
}

fn parse_hex(text: &str) -> Option<u64>
{
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

/// Parse the text of a `.lines` file.
pub(crate) fn parse_line_map(text: &str) -> Result<LineTable, String>
{
    let mut size = 0;
    let mut rows: Vec<(u64, &str, u32)> = Vec::new();

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["size", value] => {
                size = parse_hex(value).ok_or_else(|| format!("line {}: bad size '{value}'", number + 1))?;
            }
            [offset, file, line_no] => {
                let offset = parse_hex(offset).ok_or_else(|| format!("line {}: bad offset '{offset}'", number + 1))?;
                let line_no = line_no
                    .parse::<u32>()
                    .map_err(|err| format!("line {}: bad line number '{line_no}': {err}", number + 1))?;
                rows.push((offset, file, line_no));
            }
            _ => return Err(format!("line {}: expected '<offset> <file> <line>'", number + 1)),
        }
    }

    rows.sort_by_key(|(offset, ..)| *offset);
    let mut builder = LineTableBuilder::new();
    for (index, (start, file, line)) in rows.iter().enumerate() {
        let end = match rows.get(index + 1) {
            Some((next, ..)) => *next,
            None if size > *start => size,
            None => start.saturating_add(1),
        };
        let file = builder.file(file);
        builder.push(*start, end, file, *line);
    }
    Ok(builder.finish(size))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_line_map()
    {
        let table = parse_line_map(
            "# ntoskrnl\nsize 0x100\n\n0x00 ke/main.c 10\n0x20 ke/main.c 12\n0x50 ke/i386/kiinit.c 120\n",
        )
        .unwrap();
        assert_eq!(table.size(), 0x100);
        assert_eq!(table.lookup(0x10), Some(("ke/main.c", 10)));
        assert_eq!(table.lookup(0x4f), Some(("ke/main.c", 12)));
        assert_eq!(table.lookup(0xff), Some(("ke/i386/kiinit.c", 120)));
        assert_eq!(table.lookup(0x100), None);
    }

    #[test]
    fn test_parse_without_size()
    {
        let table = parse_line_map("10 a.c 1\n0 a.c 0\n").unwrap();
        assert_eq!(table.size(), 0x11);
        assert_eq!(table.lookup(0x0f), Some(("a.c", 0)));
        assert_eq!(table.lookup(0x10), Some(("a.c", 1)));
        assert_eq!(table.lookup(0x11), None);
    }

    #[test]
    fn test_parse_rejects_garbage()
    {
        assert!(parse_line_map("this is not a line map").is_err());
        assert!(parse_line_map("0xZZ a.c 1").is_err());
        assert!(parse_line_map("size nope").is_err());
    }

    #[test]
    fn test_candidates()
    {
        assert_eq!(LineMapFormat.candidates("hal"), vec!["hal.lines".to_string()]);
    }
}

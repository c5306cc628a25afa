//! DWARF line tables from unstripped module images.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{Object, ObjectSection, ObjectSegment};

use super::format::ModuleFormat;
use super::table::{LineTable, LineTableBuilder};
use crate::error::SymbolError;

type OwnedReader = EndianArcSlice<RunTimeEndian>;

const IMAGE_EXTENSIONS: [&str; 3] = ["exe", "dll", "sys"];

/// Reads PE, ELF or Mach-O images carrying DWARF.
///
/// Offsets are image-relative: the image's preferred base is subtracted from
/// every address, so the table lines up with whatever base the target reports
/// for the module.
#[derive(Debug, Default, Clone, Copy)]
pub struct DwarfImageFormat;

impl ModuleFormat for DwarfImageFormat
{
    fn name(&self) -> &'static str
    {
        "dwarf"
    }

    fn candidates(&self, module: &str) -> Vec<String>
    {
        let mut names = Vec::with_capacity(IMAGE_EXTENSIONS.len() * 2 + 1);
        // Unstripped build outputs first, then the installed image
        names.extend(IMAGE_EXTENSIONS.iter().map(|ext| format!("{module}.nostrip.{ext}")));
        names.extend(IMAGE_EXTENSIONS.iter().map(|ext| format!("{module}.{ext}")));
        names.push(module.to_string());
        names
    }

    fn parse(&self, path: &Path) -> Result<LineTable, SymbolError>
    {
        let corrupt = |reason: String| SymbolError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = fs::read(path).map_err(|err| SymbolError::Io(format!("{}: {err}", path.display())))?;
        let file = object::File::parse(&*bytes).map_err(|err| corrupt(format!("not an object file: {err}")))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let dwarf = Dwarf::load(|id| load_section(&file, id, endian))
            .map_err(|err| corrupt(format!("failed to load DWARF: {err}")))?;
        let context = Context::from_dwarf(dwarf).map_err(|err| corrupt(format!("failed to index DWARF: {err}")))?;

        let base = file.relative_address_base();
        let mut builder = LineTableBuilder::new();
        let locations = context
            .find_location_range(0, u64::MAX)
            .map_err(|err| corrupt(format!("failed to read line programs: {err}")))?;
        for (address, length, location) in locations {
            let (Some(name), Some(offset)) = (location.file, address.checked_sub(base)) else {
                continue;
            };
            let file_id = builder.file(name);
            builder.push(offset, offset.saturating_add(length), file_id, location.line.unwrap_or(0));
        }

        let size = image_extent(&file, base);
        let table = builder.finish(size);
        if table.is_empty() {
            return Err(corrupt("no line information".to_string()));
        }
        tracing::debug!(
            "Parsed {} line entries over {} files from {}",
            table.entries().len(),
            table.files().len(),
            path.display()
        );
        Ok(table)
    }
}

fn load_section(file: &object::File<'_>, id: SectionId, endian: RunTimeEndian) -> Result<OwnedReader, gimli::Error>
{
    let name = id.name();
    let macho_name = name.strip_prefix('.').map(|rest| format!("__{rest}"));

    let data = file
        .section_by_name(name)
        .or_else(|| macho_name.as_deref().and_then(|alt| file.section_by_name(alt)))
        .and_then(|section| section.uncompressed_data().ok());

    let data: Arc<[u8]> = match data {
        Some(Cow::Borrowed(bytes)) => Arc::from(bytes),
        Some(Cow::Owned(vec)) => vec.into(),
        None => Arc::from(Vec::new()),
    };
    Ok(EndianArcSlice::new(data, endian))
}

/// Bytes spanned by the loadable segments, measured from `base`.
fn image_extent(file: &object::File<'_>, base: u64) -> u64
{
    file.segments()
        .map(|segment| segment.address().saturating_add(segment.size()))
        .max()
        .map_or(0, |end| end.saturating_sub(base))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_candidates_prefer_unstripped()
    {
        let names = DwarfImageFormat.candidates("ntoskrnl");
        assert_eq!(names.first().map(String::as_str), Some("ntoskrnl.nostrip.exe"));
        assert!(names.contains(&"ntoskrnl.sys".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("ntoskrnl"));
    }

    #[test]
    fn test_text_file_is_corrupt()
    {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not an image").unwrap();
        assert!(matches!(
            DwarfImageFormat.parse(file.path()),
            Err(SymbolError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error()
    {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DwarfImageFormat.parse(&dir.path().join("hal.dll")),
            Err(SymbolError::Io(_))
        ));
    }
}

//! Metadata section extraction, one extractor per container format.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use object::{BinaryFormat, Object, ObjectSection};
use thiserror::Error;
use tracing::trace;

use super::metadata::METADATA_MAGIC;

/// ELF section holding the record.
pub const ELF_SECTION: &str = ".jvmtool_meta";

/// Mach-O segment and section holding the record.
pub const MACHO_SEGMENT: &str = "__DATA";
pub const MACHO_SECTION: &str = "__jvmtool";

/// PE sections searched for the record, in order.
pub const PE_SECTIONS: [&str; 3] = [".jvmtool", ".data", ".rdata"];

/// Why the metadata section could not be read.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read library: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse library: {0}")]
    Parse(#[from] object::Error),

    #[error("expected a {expected} container, found {found:?}")]
    WrongFormat {
        expected: &'static str,
        found: BinaryFormat,
    },

    #[error("metadata section {section} not found")]
    SectionMissing { section: String },

    #[error("no metadata extractor for this platform ({os})")]
    Unsupported { os: &'static str },
}

/// Reads the raw bytes of the metadata section from a library.
pub trait MetadataExtractor: Send + Sync + fmt::Debug {
    /// Short name of the container format.
    fn format(&self) -> &'static str;

    /// Extracts the section from an in-memory image.
    fn extract_from(&self, image: &[u8]) -> Result<Vec<u8>, ExtractionError>;

    /// Extracts the section from a file on disk.
    fn extract(&self, path: &Path) -> Result<Vec<u8>, ExtractionError> {
        let image = std::fs::read(path)?;
        trace!(path = %path.display(), bytes = image.len(), format = self.format(), "Read library");
        self.extract_from(&image)
    }
}

fn parse<'a>(
    image: &'a [u8],
    expected: &'static str,
    accepts: &[BinaryFormat],
) -> Result<object::File<'a>, ExtractionError> {
    let file = object::File::parse(image)?;
    if !accepts.contains(&file.format()) {
        return Err(ExtractionError::WrongFormat {
            expected,
            found: file.format(),
        });
    }
    Ok(file)
}

fn section_bytes(section: &object::Section<'_, '_>) -> Result<Vec<u8>, ExtractionError> {
    Ok(section.data()?.to_vec())
}

/// Linux shared objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfExtractor;

impl MetadataExtractor for ElfExtractor {
    fn format(&self) -> &'static str {
        "ELF"
    }

    fn extract_from(&self, image: &[u8]) -> Result<Vec<u8>, ExtractionError> {
        let file = parse(image, self.format(), &[BinaryFormat::Elf])?;
        let section =
            file.section_by_name(ELF_SECTION)
                .ok_or_else(|| ExtractionError::SectionMissing {
                    section: ELF_SECTION.to_string(),
                })?;
        section_bytes(&section)
    }
}

/// macOS dylibs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MachOExtractor;

impl MetadataExtractor for MachOExtractor {
    fn format(&self) -> &'static str {
        "Mach-O"
    }

    fn extract_from(&self, image: &[u8]) -> Result<Vec<u8>, ExtractionError> {
        let file = parse(image, self.format(), &[BinaryFormat::MachO])?;
        let section = file
            .sections()
            .find(|s| {
                s.segment_name().ok().flatten() == Some(MACHO_SEGMENT)
                    && s.name().ok() == Some(MACHO_SECTION)
            })
            .ok_or_else(|| ExtractionError::SectionMissing {
                section: format!("{MACHO_SEGMENT},{MACHO_SECTION}"),
            })?;
        section_bytes(&section)
    }
}

/// Windows DLLs.
///
/// The record may have been placed in a dedicated section or merged into a
/// data section by the linker. The first candidate starting with the magic
/// wins; otherwise the first candidate present is returned and fails
/// signature validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeExtractor;

impl MetadataExtractor for PeExtractor {
    fn format(&self) -> &'static str {
        "PE"
    }

    fn extract_from(&self, image: &[u8]) -> Result<Vec<u8>, ExtractionError> {
        let file = parse(image, self.format(), &[BinaryFormat::Pe, BinaryFormat::Coff])?;

        let mut fallback = None;
        for name in PE_SECTIONS {
            let Some(section) = file.section_by_name(name) else {
                continue;
            };
            let Ok(data) = section.data() else {
                continue;
            };
            if data.starts_with(&METADATA_MAGIC) {
                trace!(section = name, "Found metadata in PE section");
                return Ok(data.to_vec());
            }
            if fallback.is_none() {
                fallback = Some(data.to_vec());
            }
        }

        fallback.ok_or_else(|| ExtractionError::SectionMissing {
            section: PE_SECTIONS.join("|"),
        })
    }
}

/// Hosts without a known container format.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedExtractor;

impl MetadataExtractor for UnsupportedExtractor {
    fn format(&self) -> &'static str {
        "unsupported"
    }

    fn extract_from(&self, _image: &[u8]) -> Result<Vec<u8>, ExtractionError> {
        Err(ExtractionError::Unsupported {
            os: std::env::consts::OS,
        })
    }
}

/// Returns the extractor for the platform this binary runs on.
pub fn host_extractor() -> Arc<dyn MetadataExtractor> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ElfExtractor)
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(MachOExtractor)
    }
    #[cfg(target_os = "windows")]
    {
        Arc::new(PeExtractor)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Arc::new(UnsupportedExtractor)
    }
}

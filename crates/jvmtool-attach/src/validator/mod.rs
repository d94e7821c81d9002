//! Agent library validation.
//!
//! Before anything is injected into a target, the native library must
//! prove it is an authentic jvmtool build: it carries a 20-byte metadata
//! record in a dedicated section whose checksum matches the
//! [`BuildIdentity`] this binary was compiled with.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. the section can be extracted (`Extraction`)
//! 2. it holds at least a full record (`TooSmall`)
//! 3. it starts with the magic (`InvalidSignature`)
//! 4. the stored checksum matches (`ChecksumMismatch`)
//!
//! A successful validation yields a [`ValidatedLibrary`], the only form in
//! which a library can be handed to `AttachSession::load_agent`.

mod extractor;
mod metadata;

pub use extractor::{
    host_extractor, ElfExtractor, ExtractionError, MachOExtractor, MetadataExtractor,
    PeExtractor, UnsupportedExtractor, ELF_SECTION, MACHO_SECTION, MACHO_SEGMENT, PE_SECTIONS,
};
pub use metadata::{
    BuildIdentity, MetadataRecord, RecordError, METADATA_MAGIC, METADATA_RECORD_SIZE,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::reporter::{tracing_reporter, AttachEvent, SharedReporter};

/// Why a library was refused.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to extract agent metadata from {path}: {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractionError,
    },

    #[error(
        "agent metadata in {path} too small: got {len} bytes, need at least {}",
        METADATA_RECORD_SIZE
    )]
    TooSmall { path: PathBuf, len: usize },

    #[error("invalid agent metadata signature in {path}: {found:?}")]
    InvalidSignature { path: PathBuf, found: String },

    #[error("agent checksum mismatch in {path}: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },
}

/// A library that passed validation.
///
/// Can only be obtained from [`AgentLibraryValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLibrary {
    path: PathBuf,
    checksum: u32,
}

impl ValidatedLibrary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }
}

/// Checks agent libraries against the compiled-in build identity.
#[derive(Clone)]
pub struct AgentLibraryValidator {
    extractor: Arc<dyn MetadataExtractor>,
    identity: BuildIdentity,
    reporter: SharedReporter,
}

impl Default for AgentLibraryValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentLibraryValidator {
    /// Host extractor, compiled identity, tracing reporter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractor: host_extractor(),
            identity: BuildIdentity::compiled(),
            reporter: tracing_reporter(),
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: BuildIdentity) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn identity(&self) -> &BuildIdentity {
        &self.identity
    }

    /// Validates the library at `path`. Reads the file; nothing else.
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<ValidatedLibrary, ValidationError> {
        let path = path.as_ref();
        let result = self.check(path);
        match &result {
            Ok(library) => self.reporter.report(AttachEvent::LibraryAccepted {
                path: library.path.clone(),
            }),
            Err(e) => self.reporter.report(AttachEvent::LibraryRejected {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
        result
    }

    fn check(&self, path: &Path) -> Result<ValidatedLibrary, ValidationError> {
        let section = self
            .extractor
            .extract(path)
            .map_err(|source| ValidationError::Extraction {
                path: path.to_path_buf(),
                source,
            })?;

        let record = MetadataRecord::from_bytes(&section).map_err(|e| match e {
            RecordError::TooSmall { len } => ValidationError::TooSmall {
                path: path.to_path_buf(),
                len,
            },
            RecordError::InvalidSignature { found } => ValidationError::InvalidSignature {
                path: path.to_path_buf(),
                found: String::from_utf8_lossy(&found).into_owned(),
            },
        })?;

        let expected = self.identity.checksum();
        if record.checksum() != expected {
            return Err(ValidationError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected,
                found: record.checksum(),
            });
        }

        debug!(
            path = %path.display(),
            format = self.extractor.format(),
            checksum = record.checksum(),
            "Agent metadata verified"
        );
        Ok(ValidatedLibrary {
            path: path.to_path_buf(),
            checksum: record.checksum(),
        })
    }
}

impl std::fmt::Debug for AgentLibraryValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLibraryValidator")
            .field("extractor", &self.extractor)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{ChannelReporter, NullReporter};

    /// Returns canned section bytes for any path.
    #[derive(Debug)]
    struct FixedExtractor(Vec<u8>);

    impl MetadataExtractor for FixedExtractor {
        fn format(&self) -> &'static str {
            "fixed"
        }

        fn extract_from(&self, _image: &[u8]) -> Result<Vec<u8>, ExtractionError> {
            Ok(self.0.clone())
        }

        fn extract(&self, _path: &Path) -> Result<Vec<u8>, ExtractionError> {
            Ok(self.0.clone())
        }
    }

    fn identity() -> BuildIdentity {
        BuildIdentity::new("1.0.0", "testsalt123", "2025-01-01T00:00:00Z")
    }

    fn validator(section: Vec<u8>) -> AgentLibraryValidator {
        AgentLibraryValidator::new()
            .with_extractor(Arc::new(FixedExtractor(section)))
            .with_identity(identity())
            .with_reporter(Arc::new(NullReporter))
    }

    #[test]
    fn test_matching_checksum_accepted() {
        let record = MetadataRecord::for_identity(&identity()).to_bytes().to_vec();
        let library = validator(record).validate("/opt/libagent.so").unwrap();
        assert_eq!(library.path(), Path::new("/opt/libagent.so"));
        assert_eq!(library.checksum(), identity().checksum());
    }

    #[test]
    fn test_checksum_mismatch() {
        let record = MetadataRecord::new(12345).to_bytes().to_vec();
        let err = validator(record).validate("/opt/libagent.so").unwrap_err();
        match err {
            ValidationError::ChecksumMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, identity().checksum());
                assert_eq!(found, 12345);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_magic_wins_over_checksum() {
        let mut record = MetadataRecord::for_identity(&identity()).to_bytes();
        record[..16].copy_from_slice(b"INVALID_MAGIC123");
        let err = validator(record.to_vec()).validate("/x").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSignature { .. }));
    }

    #[test]
    fn test_short_section() {
        let err = validator(vec![0u8; 10]).validate("/x").unwrap_err();
        assert!(matches!(err, ValidationError::TooSmall { len: 10, .. }));
    }

    #[test]
    fn test_extraction_failure() {
        let validator = AgentLibraryValidator::new()
            .with_extractor(Arc::new(UnsupportedExtractor))
            .with_reporter(Arc::new(NullReporter));
        let err = validator.validate("/x").unwrap_err();
        assert!(matches!(err, ValidationError::Extraction { .. }));
    }

    #[test]
    fn test_outcome_reported() {
        let (reporter, mut rx) = ChannelReporter::new();
        let validator = validator(vec![]).with_reporter(Arc::new(reporter));
        let _ = validator.validate("/x");
        assert!(matches!(
            rx.try_recv().unwrap(),
            AttachEvent::LibraryRejected { .. }
        ));
    }
}

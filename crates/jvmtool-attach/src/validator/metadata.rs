//! Embedded agent metadata record and build identity.

use std::fmt;

/// Signature at the start of every metadata record.
pub const METADATA_MAGIC: [u8; 16] = *b"JVMTOOLLOOTMVJ\0\0";

/// Size of the record: magic followed by a little-endian `u32` checksum.
pub const METADATA_RECORD_SIZE: usize = 20;

const FIELD_SEPARATOR: &[u8] = b"|";

/// The three strings an agent build is stamped with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    pub version: String,
    pub salt: String,
    pub build_time: String,
}

impl BuildIdentity {
    pub fn new(
        version: impl Into<String>,
        salt: impl Into<String>,
        build_time: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            salt: salt.into(),
            build_time: build_time.into(),
        }
    }

    /// The identity baked in when this crate was compiled.
    pub fn compiled() -> Self {
        Self::new(
            env!("JVMTOOL_AGENT_VERSION"),
            env!("JVMTOOL_AGENT_SALT"),
            env!("JVMTOOL_AGENT_BUILD"),
        )
    }

    /// CRC-32 (IEEE) over `version|salt|build_time`.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(self.version.as_bytes());
        hasher.update(FIELD_SEPARATOR);
        hasher.update(self.salt.as_bytes());
        hasher.update(FIELD_SEPARATOR);
        hasher.update(self.build_time.as_bytes());
        hasher.finalize()
    }
}

impl fmt::Display for BuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.build_time)
    }
}

/// Why raw section bytes are not a metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    TooSmall { len: usize },
    InvalidSignature { found: [u8; 16] },
}

/// A decoded metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataRecord {
    checksum: u32,
}

impl MetadataRecord {
    pub fn new(checksum: u32) -> Self {
        Self { checksum }
    }

    /// Builds the record an agent stamped with `identity` carries.
    pub fn for_identity(identity: &BuildIdentity) -> Self {
        Self::new(identity.checksum())
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Decodes a record from the start of `bytes`. Trailing bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let (Some(magic), Some(checksum)) = (
            bytes.get(..METADATA_MAGIC.len()),
            bytes.get(METADATA_MAGIC.len()..METADATA_RECORD_SIZE),
        ) else {
            return Err(RecordError::TooSmall { len: bytes.len() });
        };

        if magic != METADATA_MAGIC {
            let mut found = [0u8; 16];
            found.copy_from_slice(magic);
            return Err(RecordError::InvalidSignature { found });
        }

        let mut raw = [0u8; 4];
        raw.copy_from_slice(checksum);
        Ok(Self::new(u32::from_le_bytes(raw)))
    }

    /// Encodes the record as it appears inside the library.
    pub fn to_bytes(&self) -> [u8; METADATA_RECORD_SIZE] {
        let mut out = [0u8; METADATA_RECORD_SIZE];
        let (magic, checksum) = out.split_at_mut(METADATA_MAGIC.len());
        magic.copy_from_slice(&METADATA_MAGIC);
        checksum.copy_from_slice(&self.checksum.to_le_bytes());
        out
    }
}

/// File format versions for BurrowDB
///
/// This module defines version constants for all file formats to ensure
/// forward/backward compatibility and safe upgrades.
/// Transaction-log record format version
pub const LOG_FORMAT_VERSION: u8 = 1;

/// Pure-value file format version
pub const PURE_VALUE_FORMAT_VERSION: u8 = 1;

/// Key-value-index snapshot format version
pub const KVI_FORMAT_VERSION: u8 = 1;

/// Magic number at the start of every collection file: "BRWD"
pub const FILE_MAGIC: [u8; 4] = *b"BRWD";

/// Version compatibility information
pub struct FormatVersion {
    /// Current version of this format
    pub current: u8,
    /// Minimum supported version for reading
    pub min_read: u8,
}

impl FormatVersion {
    /// Check if a version can be read
    pub fn can_read(&self, version: u8) -> bool {
        version >= self.min_read && version <= self.current
    }
}

/// Transaction-log format version info
pub fn log_version() -> FormatVersion {
    FormatVersion {
        current: LOG_FORMAT_VERSION,
        min_read: 1,
    }
}

/// KVI format version info
pub fn kvi_version() -> FormatVersion {
    FormatVersion {
        current: KVI_FORMAT_VERSION,
        min_read: 1,
    }
}

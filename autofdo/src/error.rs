//! Errors raised while loading an AutoFDO profile.
//!
//! Every variant is fatal for profile-guided mode: the caller reports one
//! diagnostic and compiles without the profile. Unresolved declarations or
//! call sites are never errors, they simply have no profile data.

use diagnostics::{Diagnostic, DiagnosticBuilder};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ProfileError {
    /// The profile file could not be opened.
    MissingProfileFile {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The first word is not the gcov data magic in either byte order.
    BadMagic { found: u32 },
    /// A section did not start with the tag the format requires at that point.
    UnexpectedTag {
        section: &'static str,
        expected: u32,
        found: u32,
    },
    /// The stream ended inside a word, counter or string.
    Truncated { offset: usize, needed: usize },
    /// A string payload is not valid UTF-8.
    InvalidString { offset: usize },
    /// Inlined callees nest deeper than the reader accepts.
    InlineTooDeep { offset: usize, limit: usize },
    /// An indirect-call target is not a string table index.
    InvalidTarget { offset: usize, target: u64 },
    Io(std::io::Error),
}

impl ProfileError {
    /// Whether the file was read but its contents are not a usable profile.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProfileError::BadMagic { .. }
                | ProfileError::UnexpectedTag { .. }
                | ProfileError::Truncated { .. }
                | ProfileError::InvalidString { .. }
                | ProfileError::InlineTooDeep { .. }
                | ProfileError::InvalidTarget { .. }
        )
    }

    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            ProfileError::MissingProfileFile { .. } => "AFDO0001",
            ProfileError::BadMagic { .. } => "AFDO0002",
            ProfileError::UnexpectedTag { .. } => "AFDO0003",
            ProfileError::Truncated { .. } => "AFDO0004",
            ProfileError::InvalidString { .. } => "AFDO0005",
            ProfileError::Io(_) => "AFDO0006",
            ProfileError::InlineTooDeep { .. } => "AFDO0007",
            ProfileError::InvalidTarget { .. } => "AFDO0008",
        }
    }

    /// The single diagnostic reported when profile loading fails.
    pub fn to_diagnostic(&self, origin: impl Into<String>) -> Diagnostic {
        DiagnosticBuilder::error(self.to_string())
            .code(self.code())
            .origin(origin)
            .note("compiling without profile feedback")
            .build()
    }
}

impl std::fmt::Display for ProfileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileError::MissingProfileFile { path, source } => {
                write!(f, "cannot open profile file {}: {}", path.display(), source)
            }
            ProfileError::BadMagic { found } => write!(
                f,
                "AutoFDO profile magic number does not match (found {:#010x})",
                found
            ),
            ProfileError::UnexpectedTag {
                section,
                expected,
                found,
            } => write!(
                f,
                "cannot read {} section: expected tag {:#010x}, found {:#010x}",
                section, expected, found
            ),
            ProfileError::Truncated { offset, needed } => write!(
                f,
                "profile truncated at byte {} ({} more bytes needed)",
                offset, needed
            ),
            ProfileError::InvalidString { offset } => {
                write!(f, "string at byte {} is not valid UTF-8", offset)
            }
            ProfileError::InlineTooDeep { offset, limit } => write!(
                f,
                "inlined callees at byte {} nest deeper than {} levels",
                offset, limit
            ),
            ProfileError::InvalidTarget { offset, target } => write!(
                f,
                "indirect-call target {} at byte {} is not a name index",
                target, offset
            ),
            ProfileError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProfileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProfileError::MissingProfileFile { source, .. } => Some(source),
            ProfileError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProfileError {
    fn from(e: std::io::Error) -> Self {
        ProfileError::Io(e)
    }
}

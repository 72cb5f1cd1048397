//! Profile loading.
//!
//! A profile is all-or-nothing: any malformed section fails the whole load.

use super::gcov::GcovReader;
use super::{ModuleProfile, Profile, ProfileSummary, SourceProfile, StringTable};
use crate::error::ProfileError;
use std::path::Path;

/// Parse a complete profile image.
pub fn read_profile(data: &[u8]) -> Result<Profile, ProfileError> {
    let mut reader = GcovReader::new(data)?;
    let mut summary = ProfileSummary::new();

    let strings = StringTable::read(&mut reader)?;
    let source = SourceProfile::read(&mut reader, &mut summary)?;
    let modules = ModuleProfile::read(&mut reader)?;
    summary.read_working_set(&mut reader)?;

    if !reader.is_at_end() {
        log::warn!(
            "ignoring {} trailing bytes after the working set",
            data.len() - reader.offset()
        );
    }

    tracing::debug!(
        names = strings.len(),
        functions = source.len(),
        modules = modules.len(),
        sum_all = summary.sum_all,
        "read AutoFDO profile"
    );

    Ok(Profile {
        strings,
        source,
        modules,
        summary,
    })
}

/// Read and parse the profile at `path`.
pub fn read_profile_file(path: &Path) -> Result<Profile, ProfileError> {
    let data = std::fs::read(path).map_err(|source| ProfileError::MissingProfileFile {
        path: path.to_path_buf(),
        source,
    })?;
    read_profile(&data)
}

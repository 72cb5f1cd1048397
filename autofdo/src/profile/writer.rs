//! Serializes a [`Profile`] in the format [`read_profile`](super::read_profile)
//! accepts. Used to synthesize profiles for tests, benches and tooling.

use super::gcov::{ByteOrder, GcovWriter};
use super::Profile;
use crate::error::ProfileError;
use std::path::Path;

pub struct ProfileWriter {
    order: ByteOrder,
}

impl Default for ProfileWriter {
    fn default() -> Self {
        Self::new(ByteOrder::Little)
    }
}

impl ProfileWriter {
    pub fn new(order: ByteOrder) -> Self {
        ProfileWriter { order }
    }

    pub fn to_bytes(&self, profile: &Profile) -> Vec<u8> {
        let mut writer = GcovWriter::new(self.order);
        profile.strings.write(&mut writer);
        profile.source.write(&mut writer);
        profile.modules.write(&mut writer);
        profile.summary.write_working_set(&mut writer);
        writer.into_bytes()
    }

    /// Write the complete profile to disk.
    pub fn write(&self, profile: &Profile, output: &Path) -> Result<(), ProfileError> {
        std::fs::write(output, self.to_bytes(profile))?;
        Ok(())
    }
}

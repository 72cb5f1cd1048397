//! The profile forest: one root instance per top-level function.

use super::gcov::{GcovReader, GcovWriter, GCOV_TAG_AFDO_FUNCTION};
use super::instance::FunctionInstance;
use super::summary::ProfileSummary;
use crate::error::ProfileError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct SourceProfile {
    roots: BTreeMap<u32, FunctionInstance>,
}

impl SourceProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root; a later root with the same name replaces the earlier one.
    pub fn insert_root(&mut self, root: FunctionInstance) {
        self.roots.insert(root.name(), root);
    }

    pub fn root(&self, name: u32) -> Option<&FunctionInstance> {
        self.roots.get(&name)
    }

    /// Roots in name index order.
    pub fn roots(&self) -> impl Iterator<Item = &FunctionInstance> {
        self.roots.values()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Descend from the root named `root` through the callsite `keys`,
    /// outermost first.
    pub fn find_instance<I>(&self, root: u32, keys: I) -> Option<&FunctionInstance>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut instance = self.root(root)?;
        for key in keys {
            instance = instance.child(key)?;
        }
        Some(instance)
    }

    /// Read the functions section, adding each root's total into `summary`.
    pub fn read(
        reader: &mut GcovReader<'_>,
        summary: &mut ProfileSummary,
    ) -> Result<Self, ProfileError> {
        reader.expect_tag("function", GCOV_TAG_AFDO_FUNCTION)?;
        let count = reader.read_unsigned()?;
        let mut profile = SourceProfile::new();
        for _ in 0..count {
            let head_count = reader.read_counter()?;
            let root = FunctionInstance::read(reader, head_count)?;
            summary.sum_all += root.total_count();
            profile.insert_root(root);
        }
        Ok(profile)
    }

    pub fn write(&self, writer: &mut GcovWriter) {
        let at = writer.begin_section(GCOV_TAG_AFDO_FUNCTION);
        writer.write_unsigned(self.roots.len() as u32);
        for root in self.roots.values() {
            writer.write_counter(root.head_count());
            root.write(writer);
        }
        writer.end_section(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::instance::CountInfo;

    #[test]
    fn find_along_keys() {
        let mut leaf = FunctionInstance::new(2, 0);
        leaf.add_position(0, CountInfo::new(3));
        let mut mid = FunctionInstance::new(1, 0);
        mid.add_callsite(0x20000, leaf);
        let mut root = FunctionInstance::new(0, 9);
        root.add_callsite(0x10000, mid);

        let mut profile = SourceProfile::new();
        profile.insert_root(root);

        assert_eq!(profile.find_instance(0, []).unwrap().name(), 0);
        assert_eq!(profile.find_instance(0, [0x10000, 0x20000]).unwrap().name(), 2);
        assert!(profile.find_instance(0, [0x20000]).is_none());
        assert!(profile.find_instance(5, []).is_none());
        assert_eq!(profile.root(0).unwrap().total_count(), 3);
    }
}

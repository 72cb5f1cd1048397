//! The inlined call tree recorded by the profile.
//!
//! A [`FunctionInstance`] is one function body as it existed in the profiled
//! binary: its own sampled positions plus one child per call site that had
//! been inlined into it. Keys are combined locations (line offset from the
//! function start in the high 16 bits, discriminator in the low 16 bits).

use super::gcov::{GcovReader, GcovWriter};
use crate::error::ProfileError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Deepest inlined-callee nesting accepted when reading a profile.
pub const MAX_INLINE_DEPTH: usize = 256;

/// Samples recorded at one source position.
#[derive(Debug, Default, Serialize)]
pub struct CountInfo {
    pub count: u64,
    /// Indirect-call targets: callee name index to sampled count.
    pub targets: BTreeMap<u32, u64>,
    #[serde(skip)]
    annotated: AtomicBool,
}

impl Clone for CountInfo {
    fn clone(&self) -> Self {
        CountInfo {
            count: self.count,
            targets: self.targets.clone(),
            annotated: AtomicBool::new(self.is_annotated()),
        }
    }
}

impl CountInfo {
    pub fn new(count: u64) -> Self {
        CountInfo {
            count,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, callee: u32, count: u64) -> Self {
        self.targets.insert(callee, count);
        self
    }

    pub fn is_annotated(&self) -> bool {
        self.annotated.load(Ordering::Relaxed)
    }

    /// Set the annotated flag; returns whether this call was the one that set it.
    pub fn mark_annotated(&self) -> bool {
        !self.annotated.swap(true, Ordering::Relaxed)
    }

    pub fn targets_total(&self) -> u64 {
        self.targets.values().sum()
    }
}

/// A function body in the profiled binary, with its inlined callees.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionInstance {
    name: u32,
    head_count: u64,
    total_count: u64,
    positions: BTreeMap<u32, CountInfo>,
    callsites: BTreeMap<u32, FunctionInstance>,
}

impl FunctionInstance {
    pub fn new(name: u32, head_count: u64) -> Self {
        FunctionInstance {
            name,
            head_count,
            total_count: 0,
            positions: BTreeMap::new(),
            callsites: BTreeMap::new(),
        }
    }

    /// Name index in the string table.
    pub fn name(&self) -> u32 {
        self.name
    }

    /// Entry count; only meaningful on a root.
    pub fn head_count(&self) -> u64 {
        self.head_count
    }

    /// Sum of every sampled count in this subtree.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn positions(&self) -> &BTreeMap<u32, CountInfo> {
        &self.positions
    }

    pub fn callsites(&self) -> &BTreeMap<u32, FunctionInstance> {
        &self.callsites
    }

    /// Record a position, keeping `total_count` equal to the subtree sum.
    pub fn add_position(&mut self, key: u32, info: CountInfo) {
        self.total_count += info.count;
        if let Some(old) = self.positions.insert(key, info) {
            self.total_count -= old.count;
        }
    }

    /// Attach an inlined callee, keeping `total_count` equal to the subtree sum.
    pub fn add_callsite(&mut self, key: u32, child: FunctionInstance) {
        self.total_count += child.total_count;
        if let Some(old) = self.callsites.insert(key, child) {
            self.total_count -= old.total_count;
        }
    }

    pub fn child(&self, key: u32) -> Option<&FunctionInstance> {
        self.callsites.get(&key)
    }

    pub fn count_info(&self, key: u32) -> Option<&CountInfo> {
        self.positions.get(&key)
    }

    /// Mark the position at `key` annotated; no-op when it does not exist.
    pub fn mark_annotated(&self, key: u32) {
        if let Some(info) = self.positions.get(&key) {
            info.mark_annotated();
        }
    }

    /// Sum of annotated sampled counts in this subtree.
    pub fn total_annotated_count(&self) -> u64 {
        let own: u64 = self
            .positions
            .values()
            .filter(|info| info.is_annotated())
            .map(|info| info.count)
            .sum();
        own + self
            .callsites
            .values()
            .map(FunctionInstance::total_annotated_count)
            .sum::<u64>()
    }

    /// Total of the callee inlined at `key`, else the sampled count there.
    pub fn total_count_at(&self, key: u32) -> Option<u64> {
        self.child(key)
            .map(FunctionInstance::total_count)
            .or_else(|| self.count_info(key).map(|info| info.count))
    }

    /// Read one instance and, recursively, its inlined callees.
    pub fn read(reader: &mut GcovReader<'_>, head_count: u64) -> Result<Self, ProfileError> {
        Self::read_at_depth(reader, head_count, 0)
    }

    fn read_at_depth(
        reader: &mut GcovReader<'_>,
        head_count: u64,
        depth: usize,
    ) -> Result<Self, ProfileError> {
        if depth > MAX_INLINE_DEPTH {
            return Err(ProfileError::InlineTooDeep {
                offset: reader.offset(),
                limit: MAX_INLINE_DEPTH,
            });
        }
        let name = reader.read_unsigned()?;
        let num_positions = reader.read_unsigned()?;
        let num_callsites = reader.read_unsigned()?;
        let mut instance = FunctionInstance::new(name, head_count);

        for _ in 0..num_positions {
            let key = reader.read_unsigned()?;
            let num_targets = reader.read_unsigned()?;
            let mut info = CountInfo::new(reader.read_counter()?);
            for _ in 0..num_targets {
                // Histogram kind; only indirect-call targets exist.
                reader.read_unsigned()?;
                let offset = reader.offset();
                let target = reader.read_counter()?;
                let target = u32::try_from(target)
                    .map_err(|_| ProfileError::InvalidTarget { offset, target })?;
                let count = reader.read_counter()?;
                info.targets.insert(target, count);
            }
            instance.add_position(key, info);
        }

        for _ in 0..num_callsites {
            let key = reader.read_unsigned()?;
            let child = FunctionInstance::read_at_depth(reader, 0, depth + 1)?;
            instance.add_callsite(key, child);
        }

        Ok(instance)
    }

    /// Write this instance (without its head count) and its callees.
    pub fn write(&self, writer: &mut GcovWriter) {
        writer.write_unsigned(self.name);
        writer.write_unsigned(self.positions.len() as u32);
        writer.write_unsigned(self.callsites.len() as u32);
        for (&key, info) in &self.positions {
            writer.write_unsigned(key);
            writer.write_unsigned(info.targets.len() as u32);
            writer.write_counter(info.count);
            for (&target, &count) in &info.targets {
                writer.write_unsigned(0);
                writer.write_counter(target as u64);
                writer.write_counter(count);
            }
        }
        for (&key, child) in &self.callsites {
            writer.write_unsigned(key);
            child.write(writer);
        }
    }
}

/// Combined location key from a line offset and a discriminator.
pub fn location_key(line_offset: u32, discriminator: u32) -> u32 {
    (line_offset << 16) | (discriminator & 0xffff)
}

//! Symbol names referenced by the profile.

use super::gcov::{GcovReader, GcovWriter, GCOV_TAG_AFDO_FILE_NAMES};
use crate::error::ProfileError;
use crate::ir::{DeclId, Program};
use fxhash::FxHashMap;

/// Strip any clone/version suffix: everything from the first `.` on.
pub fn original_name(name: &str) -> &str {
    match name.find('.') {
        Some(dot) => &name[..dot],
        None => name,
    }
}

/// Interned, normalized names indexed by their position in the profile.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    names: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a name. A name that normalizes like an earlier one takes over
    /// the name-to-index direction.
    pub fn push(&mut self, raw: &str) -> u32 {
        let name = original_name(raw).to_string();
        let idx = self.names.len() as u32;
        self.index.insert(name.clone(), idx);
        self.names.push(name);
        idx
    }

    /// Index of `raw`, appending it when it is not known yet.
    pub fn intern(&mut self, raw: &str) -> u32 {
        match self.get_index(raw) {
            Some(idx) => idx,
            None => self.push(raw),
        }
    }

    /// Look a name up after normalization.
    pub fn get_index(&self, name: &str) -> Option<u32> {
        self.index.get(original_name(name)).copied()
    }

    pub fn get_name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (i as u32, n.as_str()))
    }

    /// Profile index of a declaration: its assembler name, then its debug
    /// name, then whatever its abstract origin resolves to.
    pub fn index_by_decl(&self, program: &Program, decl: DeclId) -> Option<u32> {
        let mut current = Some(decl);
        // An origin chain longer than the declaration count is a cycle.
        for _ in 0..=program.decl_count() {
            let d = program.decl(current?);
            if let Some(idx) = self.get_index(&d.assembler_name) {
                return Some(idx);
            }
            if let Some(idx) = d.debug_name.as_deref().and_then(|n| self.get_index(n)) {
                return Some(idx);
            }
            current = d.abstract_origin;
        }
        None
    }

    pub fn read(reader: &mut GcovReader<'_>) -> Result<Self, ProfileError> {
        reader.expect_tag("string table", GCOV_TAG_AFDO_FILE_NAMES)?;
        let count = reader.read_unsigned()?;
        let mut table = StringTable::new();
        for _ in 0..count {
            let name = reader.read_string()?;
            table.push(&name);
        }
        Ok(table)
    }

    pub fn write(&self, writer: &mut GcovWriter) {
        let at = writer.begin_section(GCOV_TAG_AFDO_FILE_NAMES);
        writer.write_unsigned(self.names.len() as u32);
        for name in &self.names {
            writer.write_string(name);
        }
        writer.end_section(at);
    }
}

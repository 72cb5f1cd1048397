//! Module grouping: which auxiliary translation units a primary module
//! imports for cross-module optimization.

use super::gcov::{GcovReader, GcovWriter, GCOV_TAG_AFDO_MODULE_GROUPING};
use crate::error::ProfileError;
use diagnostics::{DiagnosticBuilder, Diagnostics};
use indexmap::IndexMap;
use serde::Serialize;
use source_map::SourceFile;

/// Low half of the language word: the source language.
pub const MODULE_LANG_MASK: u32 = 0xffff;
/// Language word flag: the module contains assembler statements.
pub const MODULE_ASM_STMTS: u32 = 1 << 16;

/// Per translation unit metadata recorded by the profiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    /// 1-based position in the profile
    pub ident: u32,
    pub exported: u32,
    pub lang: u32,
    pub ggc_memory: u32,
    pub aux_modules: Vec<String>,
    pub quote_paths: Vec<String>,
    pub bracket_paths: Vec<String>,
    pub system_paths: Vec<String>,
    pub cpp_defines: Vec<String>,
    pub cpp_includes: Vec<String>,
    pub cl_args: Vec<String>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>, lang: u32) -> Self {
        ModuleInfo {
            name: name.into(),
            lang,
            ..Default::default()
        }
    }

    pub fn language(&self) -> u32 {
        self.lang & MODULE_LANG_MASK
    }

    pub fn has_asm_stmts(&self) -> bool {
        self.lang & MODULE_ASM_STMTS != 0
    }

    /// Module flags as seen from a compilation whose primary is `primary`.
    pub fn flags(&self, primary: &str) -> u32 {
        if self.name == primary {
            self.exported
        } else {
            1
        }
    }

    /// The string arrays after the aux-module list, in file order.
    fn string_arrays(&self) -> [&Vec<String>; 6] {
        [
            &self.quote_paths,
            &self.bracket_paths,
            &self.system_paths,
            &self.cpp_defines,
            &self.cpp_includes,
            &self.cl_args,
        ]
    }

    fn string_arrays_mut(&mut self) -> [&mut Vec<String>; 6] {
        [
            &mut self.quote_paths,
            &mut self.bracket_paths,
            &mut self.system_paths,
            &mut self.cpp_defines,
            &mut self.cpp_includes,
            &mut self.cl_args,
        ]
    }
}

/// Command-line arguments that must agree between modules of one group.
fn significant_cl_args(module: &ModuleInfo) -> (Option<&str>, Vec<&str>) {
    let std = module
        .cl_args
        .iter()
        .rev()
        .find(|arg| arg.starts_with("-std="))
        .map(String::as_str);
    let mut flags: Vec<&str> = module
        .cl_args
        .iter()
        .map(String::as_str)
        .filter(|arg| {
            matches!(
                *arg,
                "-fexceptions" | "-fno-exceptions" | "-frtti" | "-fno-rtti"
            )
        })
        .collect();
    flags.sort_unstable();
    flags.dedup();
    (std, flags)
}

/// Modules differ in language standard or in exception/RTTI settings.
pub fn incompatible_cl_args(primary: &ModuleInfo, aux: &ModuleInfo) -> bool {
    significant_cl_args(primary) != significant_cl_args(aux)
}

/// Options that bound auxiliary module selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuxModuleLimits {
    /// Maximum group size including the primary (0 = unlimited)
    pub max_group_size: u32,
    pub disallow_asm_modules: bool,
}

/// A module accepted into the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub ident: u32,
    pub name: String,
    pub base_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleGroup {
    pub primary: GroupMember,
    pub aux: Vec<GroupMember>,
}

fn member(module: &ModuleInfo) -> GroupMember {
    GroupMember {
        ident: module.ident,
        name: module.name.clone(),
        base_name: SourceFile::named(module.name.as_str()).base_name().to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleProfile {
    modules: IndexMap<String, ModuleInfo>,
}

impl ModuleProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module; its ident becomes its 1-based position.
    pub fn insert(&mut self, mut module: ModuleInfo) {
        if let Some(existing) = self.modules.get(&module.name) {
            log::warn!("duplicate module {} in profile, keeping the later one", module.name);
            module.ident = existing.ident;
        } else {
            module.ident = self.modules.len() as u32 + 1;
        }
        self.modules.insert(module.name.clone(), module);
    }

    pub fn get_module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    pub fn aux_modules(&self, name: &str) -> Option<&[String]> {
        self.modules.get(name).map(|m| m.aux_modules.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Pick the auxiliary modules `primary` imports. Rejections are reported
    /// as informational diagnostics. `None` when `primary` is not in the profile.
    pub fn select_aux_modules(
        &self,
        primary: &str,
        limits: AuxModuleLimits,
        diags: &mut Diagnostics,
    ) -> Option<ModuleGroup> {
        let module = self.get_module(primary)?;
        let mut group = ModuleGroup {
            primary: member(module),
            aux: Vec::new(),
        };

        let mut reject = |name: &str, why: &str| {
            log::info!("Not importing {}: {}", name, why);
            diags.push(
                DiagnosticBuilder::info(format!("Not importing {}: {}", name, why))
                    .origin(primary)
                    .build(),
            );
        };

        let mut curr_module = 1u32;
        for name in &module.aux_modules {
            let Some(aux) = self.get_module(name) else {
                reject(name, "aux module cannot be found");
                continue;
            };
            if aux.name == module.name {
                continue;
            }
            if aux.language() != module.language() {
                reject(
                    name,
                    "source language different from primary module's source language",
                );
                continue;
            }
            if aux.has_asm_stmts() && limits.disallow_asm_modules {
                reject(name, "contains assembler statements");
                continue;
            }
            if limits.max_group_size != 0 && curr_module >= limits.max_group_size {
                reject(name, "maximum group size reached");
                continue;
            }
            if incompatible_cl_args(module, aux) {
                reject(
                    name,
                    "command-line arguments not compatible with primary module",
                );
                continue;
            }
            curr_module += 1;
            group.aux.push(member(aux));
        }

        Some(group)
    }

    pub fn read(reader: &mut GcovReader<'_>) -> Result<Self, ProfileError> {
        reader.expect_tag("module grouping", GCOV_TAG_AFDO_MODULE_GROUPING)?;
        let count = reader.read_unsigned()?;
        let mut profile = ModuleProfile::new();
        for _ in 0..count {
            let mut module = ModuleInfo::new(reader.read_string()?, 0);
            module.exported = reader.read_unsigned()?;
            module.lang = reader.read_unsigned()?;
            module.ggc_memory = reader.read_unsigned()?;

            let mut counts = [0u32; 7];
            for c in counts.iter_mut() {
                *c = reader.read_unsigned()?;
            }
            for _ in 0..counts[0] {
                module.aux_modules.push(reader.read_string()?);
            }
            for (array, &n) in module.string_arrays_mut().into_iter().zip(&counts[1..]) {
                for _ in 0..n {
                    array.push(reader.read_string()?);
                }
            }
            profile.insert(module);
        }
        Ok(profile)
    }

    pub fn write(&self, writer: &mut GcovWriter) {
        let at = writer.begin_section(GCOV_TAG_AFDO_MODULE_GROUPING);
        writer.write_unsigned(self.modules.len() as u32);
        for module in self.modules.values() {
            writer.write_string(&module.name);
            writer.write_unsigned(module.exported);
            writer.write_unsigned(module.lang);
            writer.write_unsigned(module.ggc_memory);
            writer.write_unsigned(module.aux_modules.len() as u32);
            for array in module.string_arrays() {
                writer.write_unsigned(array.len() as u32);
            }
            for name in &module.aux_modules {
                writer.write_string(name);
            }
            for array in module.string_arrays() {
                for s in array {
                    writer.write_string(s);
                }
            }
        }
        writer.end_section(at);
    }
}

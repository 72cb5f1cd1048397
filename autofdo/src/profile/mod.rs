//! AutoFDO profile: string table, inlined call-tree forest, module grouping
//! and working set, as read from (and written to) a gcov word stream.
//!
//! # Layout
//!
//! ```text
//! magic  version  reserved
//! 0xaa000000 len  count  string*                      names
//! 0xac000000 len  count  (head_count instance)*       functions
//! 0xae000000 len  count  module*                      module grouping
//! 0xaf000000 len  (num_counters min_counter)*128      working set
//! ```

pub mod gcov;
pub mod instance;
pub mod module;
pub mod reader;
pub mod source;
pub mod string_table;
pub mod summary;
pub mod writer;

pub use gcov::ByteOrder;
pub use instance::{location_key, CountInfo, FunctionInstance, MAX_INLINE_DEPTH};
pub use module::{AuxModuleLimits, ModuleGroup, ModuleInfo, ModuleProfile};
pub use reader::{read_profile, read_profile_file};
pub use source::SourceProfile;
pub use string_table::StringTable;
pub use summary::{ProfileSummary, WorkingSetEntry};
pub use writer::ProfileWriter;

/// Everything read from one profile file.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub strings: StringTable,
    pub source: SourceProfile,
    pub modules: ModuleProfile,
    pub summary: ProfileSummary,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root instance for a function name, after normalization.
    pub fn root_by_name(&self, name: &str) -> Option<&FunctionInstance> {
        self.strings
            .get_index(name)
            .and_then(|idx| self.source.root(idx))
    }

    /// Name of an instance, or `"<unknown>"` for an index outside the table.
    pub fn instance_name(&self, instance: &FunctionInstance) -> &str {
        self.strings.get_name(instance.name()).unwrap_or("<unknown>")
    }

    /// Add a root and account for it in the summary, as the reader does.
    pub fn add_root(&mut self, root: FunctionInstance) {
        self.summary.sum_all += root.total_count();
        self.source.insert_root(root);
    }

    /// JSON view with every root labeled by its name.
    pub fn to_json(&self) -> serde_json::Value {
        let functions: Vec<serde_json::Value> = self
            .source
            .roots()
            .map(|root| {
                serde_json::json!({
                    "name": self.instance_name(root),
                    "instance": root,
                })
            })
            .collect();
        serde_json::json!({
            "names": self.strings.iter().map(|(_, name)| name).collect::<Vec<_>>(),
            "functions": functions,
            "modules": self.modules.iter().collect::<Vec<_>>(),
            "summary": self.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_view_names_roots() {
        let mut profile = Profile::new();
        let main = profile.strings.intern("main");
        let mut root = FunctionInstance::new(main, 2);
        root.add_position(location_key(1, 0), CountInfo::new(9));
        profile.add_root(root);

        let json = profile.to_json();
        assert_eq!(json["names"][0], "main");
        assert_eq!(json["functions"][0]["name"], "main");
        assert_eq!(json["functions"][0]["instance"]["total_count"], 9);
        assert_eq!(json["summary"]["sum_all"], 9);
    }
}

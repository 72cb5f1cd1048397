//! Profile summary and working-set histogram.
//!
//! The working set has one bucket per fraction of the total sample mass:
//! bucket `i` holds the number of counters needed to cover that fraction and
//! the smallest counter among them. The hot count threshold is read off the
//! bucket selected by a permille.

use super::gcov::{GcovReader, GcovWriter, GCOV_TAG_AFDO_WORKING_SET};
use crate::error::ProfileError;
use serde::Serialize;

pub const NUM_WORKING_SETS: usize = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkingSetEntry {
    pub num_counters: u32,
    pub min_counter: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    /// Always 1: a sampled profile counts as a single run.
    pub runs: u32,
    /// Sum of the root instances' total counts
    pub sum_all: u64,
    pub sum_max: u64,
    pub working_set: Vec<WorkingSetEntry>,
}

impl Default for ProfileSummary {
    fn default() -> Self {
        ProfileSummary {
            runs: 1,
            sum_all: 0,
            sum_max: 0,
            working_set: vec![WorkingSetEntry::default(); NUM_WORKING_SETS],
        }
    }
}

impl ProfileSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket selected by a permille of the sample mass.
    pub fn working_set_for(&self, permille: u32) -> &WorkingSetEntry {
        let last = NUM_WORKING_SETS - 1;
        if permille >= 999 {
            return &self.working_set[last];
        }
        let i = (permille as usize * NUM_WORKING_SETS) / 1000;
        if i == 0 {
            &self.working_set[0]
        } else {
            &self.working_set[(i - 1).min(last)]
        }
    }

    pub fn hot_count_threshold(&self, permille: u32) -> u64 {
        self.working_set_for(permille).min_counter
    }

    /// A count is hot when it exceeds the run count and reaches the threshold.
    pub fn maybe_hot_count(&self, count: u64, permille: u32) -> bool {
        if self.runs as u64 >= count {
            return false;
        }
        count >= self.hot_count_threshold(permille)
    }

    pub fn read_working_set(&mut self, reader: &mut GcovReader<'_>) -> Result<(), ProfileError> {
        reader.expect_tag("working set", GCOV_TAG_AFDO_WORKING_SET)?;
        let mut working_set = Vec::with_capacity(NUM_WORKING_SETS);
        for _ in 0..NUM_WORKING_SETS {
            let num_counters = reader.read_unsigned()?;
            let min_counter = reader.read_counter()?;
            working_set.push(WorkingSetEntry {
                num_counters,
                min_counter,
            });
        }
        self.working_set = working_set;
        Ok(())
    }

    pub fn write_working_set(&self, writer: &mut GcovWriter) {
        let at = writer.begin_section(GCOV_TAG_AFDO_WORKING_SET);
        for i in 0..NUM_WORKING_SETS {
            let entry = self.working_set.get(i).copied().unwrap_or_default();
            writer.write_unsigned(entry.num_counters);
            writer.write_counter(entry.min_counter);
        }
        writer.end_section(at);
    }
}

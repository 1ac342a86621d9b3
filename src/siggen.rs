//! End-to-end signature generation from a set of diff-result files and
//! the associated disassembly exports.
//!
//! For the generation to work, the diffed samples must form a chain: the
//! second sample of diff *i* is the first sample of diff *i + 1*. Use
//! like this:
//!
//! ```no_run
//! use sigforge::siggen::SignatureGenerator;
//! use sigforge::types::Signature;
//!
//! let mut signature = Signature::default();
//! let mut generator = SignatureGenerator::new();
//! generator.add_diff_results(["a_vs_b.matches.json", "b_vs_c.matches.json"]);
//! generator.generate(&mut signature).unwrap();
//! ```

use std::path::PathBuf;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::candidates::{
    compute_basic_block_candidates, compute_function_candidates, filter_basic_block_overlaps,
};
use crate::error::{Result, SigforgeError};
use crate::generic_signature::generic_signature_from_matches;
use crate::match_chain::{
    add_diff_result, add_function_data, build_id_indices, propagate_ids, MatchChainColumn,
    MatchChainTable,
};
use crate::types::{Address, IdentSequence, MetaEntry, Signature};

/// Extension of per-sample disassembly exports, resolved next to the
/// diff-result files.
const DISASSEMBLY_SUFFIX: &str = ".disasm.json";

/// Drives the whole signature generation pipeline: parse diff results,
/// load disassembly metadata, select candidates and synthesize the raw
/// signature.
#[derive(Default)]
pub struct SignatureGenerator {
    /// Filenames of the diff-result files to work on.
    diff_results: Vec<PathBuf>,
    /// The core data structure holding all loaded matches.
    table: MatchChainTable,
    /// Basic-block ids considered for inclusion in the final signature.
    bb_candidate_ids: IdentSequence,
    /// Per-sample-per-function prevalence; empty unless a corpus backend
    /// filled it in.
    occurrence_counts: FxHashMap<(String, Address), u32>,
    /// Whether to log the internal state of the match chain table.
    debug_match_chain: bool,
}

impl SignatureGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_debug_match_chain(&mut self, value: bool) -> &mut Self {
        self.debug_match_chain = value;
        self
    }

    /// Installs per-sample-per-function occurrence counts, keyed by
    /// (sample sha256, function address). Functions found in the map get
    /// their basic blocks weighted by rarity.
    pub fn set_occurrence_counts(
        &mut self,
        counts: FxHashMap<(String, Address), u32>,
    ) -> &mut Self {
        self.occurrence_counts = counts;
        self
    }

    /// Sets the diff-result files to work on, replacing any previous
    /// set.
    pub fn add_diff_results<I, P>(&mut self, files: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.diff_results = files.into_iter().map(Into::into).collect();
    }

    /// Parses all diff-result files into the table and verifies that
    /// they form a chain of diffs.
    fn parse_diff_results(&mut self) -> Result<()> {
        info!("parsing diff results");
        let num_diffs = self.diff_results.len();
        let mut diff_file_pairs = Vec::with_capacity(num_diffs);
        for i in 0..num_diffs {
            let (head, tail) = self.table.split_at_mut(i + 1);
            diff_file_pairs.push(add_diff_result(
                &self.diff_results[i],
                i + 1 == num_diffs,
                &mut head[i],
                &mut tail[0],
            )?);
        }
        for (i, (first, second)) in diff_file_pairs.iter().enumerate() {
            if self.table[i].filename() != first || self.table[i + 1].filename() != second {
                return Err(SigforgeError::failed_precondition(
                    "Input files do not form a chain of diffs",
                ));
            }
        }
        Ok(())
    }

    /// Loads function metadata and instruction data for every column.
    fn load_column_data(&mut self) -> Result<()> {
        info!("loading function metadata and instruction data");
        for column in &mut self.table {
            let path = column
                .diff_directory()
                .join(format!("{}{DISASSEMBLY_SUFFIX}", column.filename()));
            add_function_data(&path, column)?;
        }
        Ok(())
    }

    /// Converts function occurrence counts into basic-block weights:
    /// the rarer a function, the higher the weight of its blocks.
    fn set_function_weights(&mut self, function_candidate_ids: &IdentSequence) {
        if self.occurrence_counts.is_empty() {
            return;
        }
        for &candidate in function_candidate_ids {
            for column in &mut self.table {
                let Some(function_index) = column.function_index_by_id(candidate) else {
                    continue;
                };
                let key = (
                    column.sha256().to_string(),
                    column.function(function_index).matched.address,
                );
                let Some(&count) = self.occurrence_counts.get(&key) else {
                    continue;
                };
                column.set_function_basic_block_weights(function_index, u32::MAX - count);
            }
        }
    }

    /// Computes function and basic-block candidates: entities that
    /// appear in all matched samples in the same order.
    fn compute_candidates(&mut self) -> Result<()> {
        info!("building id chains and indices");
        propagate_ids(&mut self.table);
        build_id_indices(&mut self.table);

        info!("computing function candidates");
        let function_candidate_ids = compute_function_candidates(&self.table);
        if function_candidate_ids.is_empty() {
            if self.debug_match_chain {
                // This won't help directly, but the logs allow examining
                // what went wrong.
                self.dump_match_chain_table(&function_candidate_ids);
            }
            return Err(SigforgeError::failed_precondition(
                "no function candidates found",
            ));
        }
        info!("  function candidates found: {}", function_candidate_ids.len());
        if self.debug_match_chain {
            self.dump_match_chain_table(&function_candidate_ids);
        }

        self.set_function_weights(&function_candidate_ids);

        info!("computing basic block candidates");
        self.bb_candidate_ids =
            compute_basic_block_candidates(&self.table, &function_candidate_ids)?;
        if self.bb_candidate_ids.is_empty() {
            return Err(SigforgeError::failed_precondition(
                "no basic block candidates found",
            ));
        }
        info!("  basic block candidates found: {}", self.bb_candidate_ids.len());
        Ok(())
    }

    /// Logs a table of function matches, one block per column, with
    /// chain ids and candidate sequence numbers.
    fn dump_match_chain_table(&self, candidates: &IdentSequence) {
        for (index, column) in self.table.iter().enumerate() {
            debug!("column {index}: {}", column.filename());
            let mut candidate_seq = 0;
            for function in column.functions() {
                let marker = if candidates.binary_search(&function.matched.id).is_ok() {
                    candidate_seq += 1;
                    format!("{candidate_seq:03}")
                } else {
                    "   ".to_string()
                };
                debug!(
                    "  {:08x} ({:03} {marker}) -> {:08x}",
                    function.matched.address,
                    function.matched.id,
                    function.matched.address_in_next
                );
            }
        }
    }

    /// Generates the signature: parses diff results, loads metadata and
    /// computes a generic byte pattern suitable for formatting into the
    /// requested output format. `signature.definition` configures the
    /// run; `add_diff_results` must have been called before.
    pub fn generate(&mut self, signature: &mut Signature) -> Result<()> {
        if self.diff_results.is_empty() {
            return Err(SigforgeError::failed_precondition(
                "no diff results; call add_diff_results() first",
            ));
        }
        let definition = signature.definition.clone();

        // One more column than there are diffs.
        self.table.clear();
        self.table
            .resize_with(self.diff_results.len() + 1, MatchChainColumn::new);

        // The function filter applies to the first sample only.
        let column = &mut self.table[0];
        column.set_function_filter(definition.function_filter);
        for &address in &definition.filtered_function_addresses {
            column.add_filtered_function(address);
        }

        self.parse_diff_results()?;
        self.load_column_data()?;
        self.compute_candidates()?;

        info!("filtering basic block overlaps");
        let size_before = self.bb_candidate_ids.len();
        filter_basic_block_overlaps(&self.table, &mut self.bb_candidate_ids)?;
        info!(
            "  removed {}, {} remain",
            size_before - self.bb_candidate_ids.len(),
            self.bb_candidate_ids.len()
        );
        if self.bb_candidate_ids.is_empty() {
            return Err(SigforgeError::failed_precondition(
                "all basic blocks overlap, input data is probably bad",
            ));
        }

        info!("constructing regular expression");
        let raw_signature = generic_signature_from_matches(
            &self.table,
            &self.bb_candidate_ids,
            definition.disable_nibble_masking,
            definition.min_piece_length,
        )?;
        info!(
            "  regex: {} raw bytes (not counting wildcards)",
            raw_signature.byte_len()
        );

        signature.clam_av_signature = None;
        signature.yara_signature = None;
        signature.raw_signature = raw_signature;
        fill_signature_metadata(signature);
        Ok(())
    }
}

/// Stamps generator metadata into the definition: the build date, the
/// task id when one is set and one `rs<i>` entry per sample identifier.
fn fill_signature_metadata(signature: &mut Signature) {
    let definition = &mut signature.definition;

    definition
        .meta
        .push(MetaEntry::string("vxsig_build", env!("SIGFORGE_BUILD_DATE")));

    if !definition.unique_signature_id.is_empty() {
        let task_id = definition.unique_signature_id.clone();
        definition.meta.push(MetaEntry::string("vxsig_taskid", task_id));
    }

    let item_ids = definition.item_ids.clone();
    for (index, item_id) in item_ids.into_iter().enumerate() {
        definition
            .meta
            .push(MetaEntry::string(format!("rs{}", index + 1), item_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetaValue;

    #[test]
    fn test_generate_without_diff_results_fails() {
        let mut signature = Signature::default();
        let result = SignatureGenerator::new().generate(&mut signature);
        assert!(matches!(result, Err(SigforgeError::FailedPrecondition(_))));
    }

    #[test]
    fn test_fill_signature_metadata() {
        let mut signature = Signature::default();
        signature.definition.unique_signature_id = "task-4711".into();
        signature.definition.item_ids = vec!["item0".into(), "item1".into()];
        fill_signature_metadata(&mut signature);

        let keys: Vec<&str> = signature
            .definition
            .meta
            .iter()
            .map(|entry| entry.key.as_str())
            .collect();
        assert_eq!(keys, vec!["vxsig_build", "vxsig_taskid", "rs1", "rs2"]);
        assert_eq!(
            signature.definition.meta[1].value,
            MetaValue::String("task-4711".into())
        );
        assert_eq!(
            signature.definition.meta[3].value,
            MetaValue::String("item1".into())
        );
    }
}

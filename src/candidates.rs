//! Selection of function and basic-block candidates from a match chain
//! table. Candidates are entities that appear in every sample in a
//! consistent order.

use crate::common_subsequence::common_subsequence;
use crate::error::{Result, SigforgeError};
use crate::match_chain::{BasicBlockIndex, MatchChainTable, MatchedBasicBlock, MatchedFunction};
use crate::types::{Address, FunctionType, IdentSequence};

fn is_candidate_function(function: &MatchedFunction) -> bool {
    function.kind == FunctionType::Normal && !function.basic_blocks.is_empty()
}

fn is_candidate_basic_block(bb: &MatchedBasicBlock) -> bool {
    bb.matched.id != 0 && !bb.instructions.is_empty()
}

/// Computes the ordered list of function candidates: the identifiers of
/// normal, non-empty functions that occur in every column in the same
/// order.
pub fn compute_function_candidates(table: &MatchChainTable) -> IdentSequence {
    let mut function_ids: Vec<IdentSequence> = Vec::with_capacity(table.len());
    for column in table {
        function_ids.push(
            column
                .functions()
                .filter(|function| is_candidate_function(function))
                .map(|function| function.matched.id)
                .collect(),
        );
    }

    // Solve k-LCS on the resulting permutations to obtain a stable
    // function order.
    common_subsequence(&function_ids)
}

/// Computes the ordered basic-block candidates for the basic blocks of
/// the given candidate functions.
pub fn compute_basic_block_candidates(
    table: &MatchChainTable,
    function_candidate_ids: &IdentSequence,
) -> Result<IdentSequence> {
    let mut bb_ids: Vec<IdentSequence> = Vec::with_capacity(table.len());

    for column in table {
        // Build a basic-block "word": the concatenated blocks of every
        // candidate function, in candidate order.
        let mut bb_word: Vec<BasicBlockIndex> = Vec::new();
        for &candidate in function_candidate_ids {
            let function_index = column.function_index_by_id(candidate).ok_or_else(|| {
                SigforgeError::internal(format!("no function for candidate id {candidate}"))
            })?;
            bb_word.extend(column.function(function_index).basic_blocks.values());
        }

        // Basic-block sharing and function overlaps can break the order,
        // so the word is sorted again by address (ties by id).
        bb_word.sort_by_key(|&index| {
            let bb = column.basic_block(index);
            (bb.matched.address, bb.matched.id)
        });

        bb_ids.push(
            bb_word
                .into_iter()
                .map(|index| column.basic_block(index))
                .filter(|bb| is_candidate_basic_block(bb))
                .map(|bb| bb.matched.id)
                .collect(),
        );
    }

    // Solve k-LCS on the resulting permutations to obtain a stable basic
    // block order.
    Ok(common_subsequence(&bb_ids))
}

/// Removes candidates whose instruction addresses overlap the coverage
/// of an earlier candidate in any column.
///
/// This strategy is intentionally aggressive: an overlapping candidate is
/// dropped rather than re-optimized, which keeps the output identical to
/// historical signatures. A maximum-cardinality selection could retain
/// more candidates at the price of changing existing outputs.
pub fn filter_basic_block_overlaps(
    table: &MatchChainTable,
    bb_candidate_ids: &mut IdentSequence,
) -> Result<()> {
    for column in table {
        let mut last_address: Address = 0;
        let mut keep = Vec::with_capacity(bb_candidate_ids.len());
        for &id in bb_candidate_ids.iter() {
            let bb = column.basic_block_by_id(id).ok_or_else(|| {
                SigforgeError::internal(format!("no basic block for candidate id {id}"))
            })?;

            let mut skip = false;
            for &address in bb.instructions.keys() {
                if address <= last_address {
                    skip = true;
                    break;
                }
                last_address = address;
            }
            if !skip {
                keep.push(id);
            }
        }
        *bb_candidate_ids = keep;
    }
    Ok(())
}

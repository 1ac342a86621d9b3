//! Reader for pairwise diff-result documents.
//!
//! A diff result describes how one sample maps onto the next: function
//! matches, their basic-block matches and their instruction matches, in
//! join order. The reader walks the document and delivers the matches as
//! three ordered streams through a [`MatchVisitor`], so consumers can
//! attach child matches to the right parent without ever seeing the
//! storage format.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SigforgeError};
use crate::types::{Address, AddressPair};

/// Metadata of one side of a diff result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiffFileMetadata {
    /// Sample identifier; also the stem of the disassembly export file.
    pub filename: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Deserialize)]
struct DiffDocument {
    file1: DiffFileMetadata,
    file2: DiffFileMetadata,
    #[serde(default)]
    function_matches: Vec<FunctionMatchEntry>,
}

#[derive(Debug, Deserialize)]
struct FunctionMatchEntry {
    address1: Address,
    address2: Address,
    #[serde(default)]
    basic_blocks: Vec<BasicBlockMatchEntry>,
}

#[derive(Debug, Deserialize)]
struct BasicBlockMatchEntry {
    address1: Address,
    address2: Address,
    #[serde(default)]
    instructions: Vec<InstructionMatchEntry>,
}

#[derive(Debug, Deserialize)]
struct InstructionMatchEntry {
    address1: Address,
    address2: Address,
}

/// Receiver for the three match streams of a diff result.
///
/// Calls arrive in stream order: every function match is followed by its
/// basic-block matches, each followed by its instruction matches.
pub trait MatchVisitor {
    fn on_function_match(&mut self, matched: AddressPair);
    fn on_basic_block_match(&mut self, matched: AddressPair);
    fn on_instruction_match(&mut self, matched: AddressPair);
}

/// Parses the diff result at `path`, feeding all matches to `visitor`.
///
/// Returns the metadata of the two diffed samples.
pub fn read_diff_result(
    path: &Path,
    visitor: &mut dyn MatchVisitor,
) -> Result<(DiffFileMetadata, DiffFileMetadata)> {
    let raw = fs::read_to_string(path).map_err(|source| SigforgeError::io(path, source))?;
    let document: DiffDocument =
        serde_json::from_str(&raw).map_err(|source| SigforgeError::json(path, source))?;

    for function in &document.function_matches {
        visitor.on_function_match((function.address1, function.address2));
        for basic_block in &function.basic_blocks {
            visitor.on_basic_block_match((basic_block.address1, basic_block.address2));
            for instruction in &basic_block.instructions {
                visitor.on_instruction_match((instruction.address1, instruction.address2));
            }
        }
    }
    Ok((document.file1, document.file2))
}

//! The match-chain table: one column per sample, fused from pairwise
//! diff results.
//!
//! Each column owns arena-allocated function, basic-block and instruction
//! records. Parents refer to children by arena index, so instructions can
//! be shared between basic blocks (and basic blocks between functions)
//! without ownership cycles. Address-indexed maps provide ordered
//! iteration; id-indexed maps are built after identifier propagation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::diff_reader::{read_diff_result, MatchVisitor};
use crate::disasm_reader::{read_disassembly, DisassemblyVisitor};
use crate::error::{Result, SigforgeError};
use crate::types::{
    Address, AddressPair, FunctionFilter, FunctionType, Ident, Immediate, Match,
};

/// Handle of a function record within its column.
pub type FunctionIndex = usize;
/// Handle of a basic-block record within its column.
pub type BasicBlockIndex = usize;
/// Handle of an instruction record within its column.
pub type InstructionIndex = usize;

/// An instruction match, enriched with raw bytes, disassembly text and
/// immediate operands once the disassembly export has been loaded.
#[derive(Debug, Default)]
pub struct MatchedInstruction {
    pub matched: Match,
    pub raw_bytes: Vec<u8>,
    pub disassembly: String,
    pub immediates: Vec<Immediate>,
}

/// A basic-block match together with its instructions, ordered by
/// address. Instructions may be linked into several basic blocks of the
/// same column (shared tails), but each address maps to one record.
#[derive(Debug)]
pub struct MatchedBasicBlock {
    pub matched: Match,
    pub weight: u32,
    pub instructions: BTreeMap<Address, InstructionIndex>,
}

/// A function match together with its basic blocks, ordered by address.
#[derive(Debug)]
pub struct MatchedFunction {
    pub matched: Match,
    pub kind: FunctionType,
    pub basic_blocks: BTreeMap<Address, BasicBlockIndex>,
}

/// One sample's worth of matched entities.
#[derive(Debug, Default)]
pub struct MatchChainColumn {
    filename: String,
    diff_directory: PathBuf,
    sha256: String,
    function_filter: FunctionFilter,
    filtered_functions: BTreeSet<Address>,

    functions: Vec<MatchedFunction>,
    basic_blocks: Vec<MatchedBasicBlock>,
    instructions: Vec<MatchedInstruction>,

    functions_by_address: BTreeMap<Address, FunctionIndex>,
    basic_blocks_by_address: BTreeMap<Address, BasicBlockIndex>,
    instructions_by_address: BTreeMap<Address, InstructionIndex>,

    functions_by_id: FxHashMap<Ident, FunctionIndex>,
    basic_blocks_by_id: FxHashMap<Ident, BasicBlockIndex>,
}

/// The full table; one column per sample, N + 1 columns for N diffs.
pub type MatchChainTable = Vec<MatchChainColumn>;

impl MatchChainColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = filename.into();
    }

    pub fn diff_directory(&self) -> &Path {
        &self.diff_directory
    }

    pub fn set_diff_directory(&mut self, directory: impl Into<PathBuf>) {
        self.diff_directory = directory.into();
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn set_sha256(&mut self, sha256: impl Into<String>) {
        self.sha256 = sha256.into();
    }

    pub fn set_function_filter(&mut self, filter: FunctionFilter) {
        self.function_filter = filter;
    }

    pub fn add_filtered_function(&mut self, address: Address) {
        self.filtered_functions.insert(address);
    }

    /// Inserts a function match, or returns the existing record's handle
    /// for a duplicate address. Returns `None` when the column's function
    /// filter rejects the address.
    pub fn insert_function_match(&mut self, matched: AddressPair) -> Option<FunctionIndex> {
        if self.function_filter != FunctionFilter::None {
            let address_in_filter = self.filtered_functions.contains(&matched.0);
            if (self.function_filter == FunctionFilter::Include && !address_in_filter)
                || (self.function_filter == FunctionFilter::Exclude && address_in_filter)
            {
                return None;
            }
        }

        let index = match self.functions_by_address.get(&matched.0) {
            Some(&existing) => existing,
            None => {
                let index = self.functions.len();
                self.functions.push(MatchedFunction {
                    matched: Match::new(matched),
                    kind: FunctionType::default(),
                    basic_blocks: BTreeMap::new(),
                });
                self.functions_by_address.insert(matched.0, index);
                index
            }
        };
        Some(index)
    }

    /// Inserts a basic-block match and links it into `function`. A block
    /// already present in the column is shared, not duplicated.
    pub fn insert_basic_block_match(
        &mut self,
        function: FunctionIndex,
        matched: AddressPair,
    ) -> BasicBlockIndex {
        let index = match self.basic_blocks_by_address.get(&matched.0) {
            Some(&existing) => existing,
            None => {
                let index = self.basic_blocks.len();
                self.basic_blocks.push(MatchedBasicBlock {
                    matched: Match::new(matched),
                    weight: 1,
                    instructions: BTreeMap::new(),
                });
                self.basic_blocks_by_address.insert(matched.0, index);
                index
            }
        };
        self.functions[function].basic_blocks.insert(matched.0, index);
        index
    }

    /// Inserts an instruction match and links it into `basic_block`.
    /// Instructions are shared often: two functions ending in the same
    /// call-and-return tail legitimately reference the same record.
    pub fn insert_instruction_match(
        &mut self,
        basic_block: BasicBlockIndex,
        matched: AddressPair,
    ) -> InstructionIndex {
        let index = match self.instructions_by_address.get(&matched.0) {
            Some(&existing) => existing,
            None => {
                let index = self.instructions.len();
                self.instructions.push(MatchedInstruction {
                    matched: Match::new(matched),
                    ..Default::default()
                });
                self.instructions_by_address.insert(matched.0, index);
                index
            }
        };
        self.basic_blocks[basic_block].instructions.insert(matched.0, index);
        index
    }

    pub fn function(&self, index: FunctionIndex) -> &MatchedFunction {
        &self.functions[index]
    }

    pub fn function_mut(&mut self, index: FunctionIndex) -> &mut MatchedFunction {
        &mut self.functions[index]
    }

    pub fn basic_block(&self, index: BasicBlockIndex) -> &MatchedBasicBlock {
        &self.basic_blocks[index]
    }

    pub fn basic_block_mut(&mut self, index: BasicBlockIndex) -> &mut MatchedBasicBlock {
        &mut self.basic_blocks[index]
    }

    pub fn instruction(&self, index: InstructionIndex) -> &MatchedInstruction {
        &self.instructions[index]
    }

    pub fn instruction_mut(&mut self, index: InstructionIndex) -> &mut MatchedInstruction {
        &mut self.instructions[index]
    }

    pub fn function_index_by_address(&self, address: Address) -> Option<FunctionIndex> {
        self.functions_by_address.get(&address).copied()
    }

    pub fn basic_block_index_by_address(&self, address: Address) -> Option<BasicBlockIndex> {
        self.basic_blocks_by_address.get(&address).copied()
    }

    pub fn instruction_index_by_address(&self, address: Address) -> Option<InstructionIndex> {
        self.instructions_by_address.get(&address).copied()
    }

    pub fn function_by_id(&self, id: Ident) -> Option<&MatchedFunction> {
        self.functions_by_id.get(&id).map(|&index| &self.functions[index])
    }

    pub fn function_index_by_id(&self, id: Ident) -> Option<FunctionIndex> {
        self.functions_by_id.get(&id).copied()
    }

    pub fn basic_block_by_id(&self, id: Ident) -> Option<&MatchedBasicBlock> {
        self.basic_blocks_by_id.get(&id).map(|&index| &self.basic_blocks[index])
    }

    /// Iterates functions in ascending address order.
    pub fn functions(&self) -> impl Iterator<Item = &MatchedFunction> {
        self.functions_by_address.values().map(|&index| &self.functions[index])
    }

    pub fn function_count(&self) -> usize {
        self.functions_by_address.len()
    }

    pub fn basic_block_count(&self) -> usize {
        self.basic_blocks_by_address.len()
    }

    /// Sets the weight of every basic block of `function`.
    pub fn set_function_basic_block_weights(&mut self, function: FunctionIndex, weight: u32) {
        let indices: Vec<BasicBlockIndex> =
            self.functions[function].basic_blocks.values().copied().collect();
        for index in indices {
            self.basic_blocks[index].weight = weight;
        }
    }

    /// Synthesizes this column as the final one of the chain: every
    /// record of `prev` gets a counterpart at its `address_in_next`, with
    /// the successor address set to zero so every chain terminates
    /// cleanly. The zero value is never followed.
    pub fn finish_chain(&mut self, prev: &MatchChainColumn) {
        for function in prev.functions() {
            let new_function = self
                .insert_function_match((function.matched.address_in_next, 0))
                .expect("the final column must not carry a function filter");

            for &bb_index in function.basic_blocks.values() {
                let bb = &prev.basic_blocks[bb_index];
                let new_bb = self
                    .insert_basic_block_match(new_function, (bb.matched.address_in_next, 0));

                for &instruction_index in bb.instructions.values() {
                    let instruction = &prev.instructions[instruction_index];
                    self.insert_instruction_match(
                        new_bb,
                        (instruction.matched.address_in_next, 0),
                    );
                }
            }
        }
    }

    /// Builds the id-indexed views. Records without a chain id are left
    /// out; id 0 is never looked up.
    pub fn build_id_indices(&mut self) {
        self.functions_by_id.clear();
        for &index in self.functions_by_address.values() {
            let id = self.functions[index].matched.id;
            if id != 0 {
                self.functions_by_id.insert(id, index);
            }
        }
        self.basic_blocks_by_id.clear();
        for &index in self.basic_blocks_by_address.values() {
            let id = self.basic_blocks[index].matched.id;
            if id != 0 {
                self.basic_blocks_by_id.insert(id, index);
            }
        }
    }
}

/// Stateful inserter that threads the match streams of one diff result
/// into a column, attaching child matches to the current parent.
struct MatchChainInserter<'a> {
    column: &'a mut MatchChainColumn,
    current_function: Option<FunctionIndex>,
    current_basic_block: Option<BasicBlockIndex>,
}

impl<'a> MatchChainInserter<'a> {
    fn new(column: &'a mut MatchChainColumn) -> Self {
        Self { column, current_function: None, current_basic_block: None }
    }
}

impl MatchVisitor for MatchChainInserter<'_> {
    fn on_function_match(&mut self, matched: AddressPair) {
        self.current_function = self.column.insert_function_match(matched);
        // Children of a filtered function are dropped along with it.
        self.current_basic_block = None;
    }

    fn on_basic_block_match(&mut self, matched: AddressPair) {
        if let Some(function) = self.current_function {
            self.current_basic_block =
                Some(self.column.insert_basic_block_match(function, matched));
        }
    }

    fn on_instruction_match(&mut self, matched: AddressPair) {
        if let Some(basic_block) = self.current_basic_block {
            self.column.insert_instruction_match(basic_block, matched);
        }
    }
}

/// Loads one diff result into `column`. On the last diff of the chain,
/// the `next` column is stamped with the paired sample's name and
/// finalized with sentinel successors.
///
/// Returns the pair of sample filenames named by the diff, used by the
/// orchestrator to validate that the inputs form a chain.
pub fn add_diff_result(
    path: &Path,
    last: bool,
    column: &mut MatchChainColumn,
    next: &mut MatchChainColumn,
) -> Result<(String, String)> {
    let metadata = {
        let mut inserter = MatchChainInserter::new(column);
        read_diff_result(path, &mut inserter)?
    };

    let diff_directory = path.parent().unwrap_or_else(|| Path::new(""));
    column.set_filename(metadata.0.filename.clone());
    column.set_diff_directory(diff_directory);
    if last {
        next.set_filename(metadata.1.filename.clone());
        next.set_diff_directory(diff_directory);
        next.finish_chain(column);
    }
    Ok((metadata.0.filename, metadata.1.filename))
}

/// Stamps disassembly metadata onto the matched records of one column.
struct MetadataStamper<'a> {
    column: &'a mut MatchChainColumn,
}

impl DisassemblyVisitor for MetadataStamper<'_> {
    fn on_function(&mut self, sha256: &str, address: Address, kind: FunctionType) -> Result<()> {
        // Functions not matched by the differ (or filtered out) simply
        // carry no metadata.
        let Some(index) = self.column.function_index_by_address(address) else {
            return Ok(());
        };
        self.column.function_mut(index).kind = kind;

        if self.column.sha256().is_empty() {
            self.column.set_sha256(sha256);
        } else if self.column.sha256() != sha256 {
            return Err(SigforgeError::failed_precondition(format!(
                "inconsistent SHA256 in column for {}: {} vs {}",
                self.column.filename(),
                self.column.sha256(),
                sha256
            )));
        }
        Ok(())
    }

    fn on_instruction(
        &mut self,
        basic_block_address: Address,
        address: Address,
        bytes: &[u8],
        disassembly: &str,
        immediates: &[Immediate],
    ) -> Result<()> {
        // Loading bytes for every matched instruction, regardless of
        // whether its basic block was matched, gracefully handles
        // instructions shared with unmatched basic blocks.
        let Some(index) = self.column.instruction_index_by_address(address) else {
            return Ok(());
        };
        let instruction = self.column.instruction_mut(index);
        if instruction.raw_bytes.is_empty() {
            instruction.raw_bytes = bytes.to_vec();
            instruction.disassembly = disassembly.to_string();
            instruction.immediates = immediates.to_vec();
        } else if instruction.raw_bytes != bytes {
            return Err(SigforgeError::internal(format!(
                "instruction bytes differ on re-ingestion: {basic_block_address:08x} {address:08x} {}",
                bytes.len()
            )));
        }
        Ok(())
    }
}

/// Loads a disassembly export and enriches the records of `column` with
/// function types, sample hash, instruction bytes, disassembly and
/// immediates. Unmatched addresses are silently ignored.
pub fn add_function_data(path: &Path, column: &mut MatchChainColumn) -> Result<()> {
    let mut stamper = MetadataStamper { column };
    read_disassembly(path, &mut stamper)
}

/// Assigns ascending chain identifiers along the cross-column chains of
/// one entity kind.
fn propagate_entity_ids(
    table: &mut [MatchChainColumn],
    address_index: for<'a> fn(&'a MatchChainColumn) -> &'a BTreeMap<Address, usize>,
    matched_mut: for<'a> fn(&'a mut MatchChainColumn, usize) -> &'a mut Match,
) {
    let Some(first_column) = table.first() else {
        return;
    };
    let first: Vec<usize> = address_index(first_column).values().copied().collect();

    // Walk the first column in ascending address order; ids start at 1.
    let mut chain_id: Ident = 1;
    for index in first {
        let matched = matched_mut(&mut table[0], index);
        matched.id = chain_id;
        let mut address_in_next = matched.address_in_next;

        // Follow the chain across columns until it breaks.
        for column in 1..table.len() {
            let Some(&next_index) = address_index(&table[column]).get(&address_in_next) else {
                break;
            };
            let matched = matched_mut(&mut table[column], next_index);
            matched.id = chain_id;
            address_in_next = matched.address_in_next;
        }
        chain_id += 1;
    }
}

fn function_address_index(column: &MatchChainColumn) -> &BTreeMap<Address, usize> {
    &column.functions_by_address
}

fn function_match_mut(column: &mut MatchChainColumn, index: usize) -> &mut Match {
    &mut column.functions[index].matched
}

fn basic_block_address_index(column: &MatchChainColumn) -> &BTreeMap<Address, usize> {
    &column.basic_blocks_by_address
}

fn basic_block_match_mut(column: &mut MatchChainColumn, index: usize) -> &mut Match {
    &mut column.basic_blocks[index].matched
}

/// Propagates chain identifiers for functions and basic blocks. Records
/// of the first column get ids 1, 2, 3, ... in ascending address order;
/// linked records in later columns inherit the id of their chain.
pub fn propagate_ids(table: &mut MatchChainTable) {
    propagate_entity_ids(table, function_address_index, function_match_mut);
    propagate_entity_ids(table, basic_block_address_index, basic_block_match_mut);
}

/// Builds the id-indexed views of every column. Call after
/// [`propagate_ids`].
pub fn build_id_indices(table: &mut MatchChainTable) {
    for column in table {
        column.build_id_indices();
    }
}

//! Reader for per-sample disassembly exports.
//!
//! An export carries the sample hash, function metadata and the raw bytes,
//! disassembly text and immediate operands of every instruction, grouped
//! by basic block. The reader delivers records through a
//! [`DisassemblyVisitor`] so consumers never see the storage format.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SigforgeError};
use crate::types::{Address, FunctionType, Immediate};

#[derive(Debug, Deserialize)]
struct DisassemblyDocument {
    #[serde(default)]
    sha256: String,
    #[serde(default)]
    functions: Vec<FunctionEntry>,
    #[serde(default)]
    basic_blocks: Vec<BasicBlockEntry>,
}

#[derive(Debug, Deserialize)]
struct FunctionEntry {
    address: Address,
    #[serde(rename = "type", default)]
    kind: FunctionType,
}

#[derive(Debug, Deserialize)]
struct BasicBlockEntry {
    address: Address,
    #[serde(default)]
    instructions: Vec<InstructionEntry>,
}

#[derive(Debug, Deserialize)]
struct InstructionEntry {
    address: Address,
    /// Raw instruction bytes as lowercase hex.
    #[serde(default)]
    bytes: String,
    #[serde(default)]
    disassembly: String,
    #[serde(default)]
    immediates: Vec<Immediate>,
}

/// Receiver for disassembly records. Function records arrive before any
/// instruction records.
pub trait DisassemblyVisitor {
    fn on_function(&mut self, sha256: &str, address: Address, kind: FunctionType) -> Result<()>;

    fn on_instruction(
        &mut self,
        basic_block_address: Address,
        address: Address,
        bytes: &[u8],
        disassembly: &str,
        immediates: &[Immediate],
    ) -> Result<()>;
}

/// Parses the disassembly export at `path`, feeding all records to
/// `visitor`.
pub fn read_disassembly(path: &Path, visitor: &mut dyn DisassemblyVisitor) -> Result<()> {
    let raw = fs::read_to_string(path).map_err(|source| SigforgeError::io(path, source))?;
    let document: DisassemblyDocument =
        serde_json::from_str(&raw).map_err(|source| SigforgeError::json(path, source))?;

    for function in &document.functions {
        visitor.on_function(&document.sha256, function.address, function.kind)?;
    }

    for basic_block in &document.basic_blocks {
        for instruction in &basic_block.instructions {
            let bytes = parse_hex_bytes(&instruction.bytes).map_err(|message| {
                SigforgeError::internal(format!(
                    "{}: bad instruction bytes at {:08x}: {message}",
                    path.display(),
                    instruction.address
                ))
            })?;
            visitor.on_instruction(
                basic_block.address,
                instruction.address,
                &bytes,
                &instruction.disassembly,
                &instruction.immediates,
            )?;
        }
    }
    Ok(())
}

fn parse_hex_bytes(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err(format!("odd-length hex string: {hex:?}"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| format!("invalid hex digits in {hex:?}"))
        })
        .collect()
}

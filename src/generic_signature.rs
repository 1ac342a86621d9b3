//! Builds the engine-independent byte signature from a set of
//! overlap-free basic-block candidates.
//!
//! For every candidate, the instruction bytes of the block are gathered
//! per column, aligned across columns with the k-common-subsequence
//! algorithm and turned into a run of literal bytes and wildcards. Bytes
//! that encode 32-bit immediate operands are tagged for nibble masking so
//! downstream engines match them as single-character wildcards.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::common_subsequence::common_subsequence;
use crate::error::{Result, SigforgeError};
use crate::match_chain::{MatchChainTable, MatchedInstruction};
use crate::subsequence_regex::{regex_from_subsequence, RegexToken};
use crate::types::{Address, IdentSequence, ImmediateWidth, Piece, RawSignature};

/// Instruction provenance carried along with every signature byte.
#[derive(Debug)]
struct InstructionOrigin {
    address: Address,
    disassembly: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigByteKind {
    /// A literal instruction byte.
    Regular,
    /// An inter-piece gap; downstream engines match any byte run here.
    Wildcard,
    /// A literal position whose value is masked out (one "??" byte).
    SingleWildcard,
}

/// A byte with extra information: its role in the signature, the weight
/// of the originating basic block and the originating instruction.
#[derive(Debug, Clone)]
struct SigByte {
    value: u8,
    kind: SigByteKind,
    weight: u32,
    origin: Option<Arc<InstructionOrigin>>,
}

impl SigByte {
    fn wildcard() -> Self {
        Self { value: 0, kind: SigByteKind::Wildcard, weight: 0, origin: None }
    }
}

impl PartialEq for SigByte {
    fn eq(&self, other: &Self) -> bool {
        // Weight and origin intentionally do not take part in equality,
        // so sequence alignment only sees values and roles.
        self.value == other.value && self.kind == other.kind
    }
}

/// Appends the bytes of one instruction to a basic-block sequence. With
/// nibble masking enabled, the four bytes of the last little-endian
/// occurrence of each recognized 32-bit immediate become single-byte
/// wildcards.
fn add_instruction_bytes(
    bb_weight: u32,
    instruction: &MatchedInstruction,
    disable_nibble_masking: bool,
    sequence: &mut Vec<SigByte>,
) {
    let mut immediate_positions: FxHashSet<usize> = FxHashSet::default();
    if !disable_nibble_masking {
        for immediate in &instruction.immediates {
            if immediate.width != ImmediateWidth::DWord {
                continue;
            }
            let encoded = (immediate.value as u32).to_le_bytes();
            if let Some(position) = instruction
                .raw_bytes
                .windows(4)
                .rposition(|window| window == encoded)
            {
                immediate_positions.insert(position);
            }
        }
    }

    let origin = Arc::new(InstructionOrigin {
        address: instruction.matched.address,
        disassembly: instruction.disassembly.clone(),
    });

    let raw_bytes = &instruction.raw_bytes;
    let mut i = 0;
    while i < raw_bytes.len() {
        if immediate_positions.contains(&i) {
            for _ in 0..4 {
                sequence.push(SigByte {
                    value: raw_bytes[i],
                    kind: SigByteKind::SingleWildcard,
                    weight: bb_weight,
                    origin: Some(Arc::clone(&origin)),
                });
                i += 1;
            }
        } else {
            sequence.push(SigByte {
                value: raw_bytes[i],
                kind: SigByteKind::Regular,
                weight: bb_weight,
                origin: Some(Arc::clone(&origin)),
            });
            i += 1;
        }
    }
}

/// Zeroes the weight of every literal run shorter than
/// `min_piece_length`, including the single-byte wildcards that follow
/// it, so weight-aware trimming deprioritizes constructs like
/// `XX ?? ?? ?? ??`.
fn penalize_short_atoms(min_piece_length: usize, regex: &mut [SigByte]) {
    let len = regex.len();
    let mut i = 0;
    let mut num_regular = 0;
    let mut piece_start = 0;
    while i < len {
        while i < len && regex[i].kind == SigByteKind::Regular {
            i += 1;
            num_regular += 1;
        }
        if i < len && regex[i].kind == SigByteKind::Wildcard {
            i += 1;
            piece_start = i;
            num_regular = 0;
            continue;
        }
        // The run ended at a single-byte wildcard or at the end of the
        // regex; penalize it together with the wildcard tail.
        let penalize = num_regular < min_piece_length;
        if penalize {
            for byte in &mut regex[piece_start..i] {
                byte.weight = 0;
            }
        }
        i += 1;
        while i < len && regex[i].kind == SigByteKind::SingleWildcard {
            if penalize {
                regex[i].weight = 0;
            }
            i += 1;
        }
    }
}

fn origin_changed(
    last: &Option<Arc<InstructionOrigin>>,
    current: &Option<Arc<InstructionOrigin>>,
) -> bool {
    match (last, current) {
        (Some(last), Some(current)) => !Arc::ptr_eq(last, current),
        (None, None) => false,
        _ => true,
    }
}

/// Scans a finished regex into signature pieces. Every wildcard starts a
/// new piece; single-byte wildcards become masked nibble pairs, except at
/// the start of a piece, where they are dropped (a piece never starts
/// with "??").
fn to_raw_signature(regex: &[SigByte]) -> RawSignature {
    let mut pieces = vec![Piece::default()];
    let mut add_new_piece = false;
    let mut weight_set = false;
    let mut byte_index = 0;
    let mut last_origin: Option<Arc<InstructionOrigin>> = None;

    for byte in regex {
        if byte.kind == SigByteKind::Wildcard {
            // Only one new piece for a run of consecutive wildcards, or
            // we would end up with empty pieces.
            add_new_piece = !pieces.last().is_some_and(|piece| piece.bytes.is_empty());
            continue;
        }

        if add_new_piece {
            pieces.push(Piece::default());
            byte_index = 0;
            weight_set = false;
        }
        add_new_piece = false;
        let piece = pieces.last_mut().expect("piece list starts non-empty");

        if byte.kind == SigByteKind::SingleWildcard {
            if piece.bytes.is_empty() {
                continue;
            }
            piece.masked_nibbles.push(byte_index * 2);
            piece.masked_nibbles.push(byte_index * 2 + 1);
        }
        piece.bytes.push(byte.value);
        byte_index += 1;

        // Each group of consecutive bytes carries the weight of its
        // first byte.
        if !weight_set {
            piece.weight = byte.weight;
            weight_set = true;
        }

        if origin_changed(&last_origin, &byte.origin) {
            if let Some(origin) = &byte.origin {
                if !origin.disassembly.is_empty() {
                    piece
                        .origin_disassembly
                        .push(format!("{:08x}: {}", origin.address, origin.disassembly));
                }
            }
            last_origin = byte.origin.clone();
        }
    }

    if pieces.last().is_some_and(|piece| piece.bytes.is_empty()) {
        // The last piece stayed empty, most likely because it started
        // with a single-byte wildcard.
        pieces.pop();
    }
    RawSignature { pieces }
}

/// Builds the raw signature for the given basic-block candidates.
///
/// `min_piece_length` only affects weights (see [`penalize_short_atoms`]);
/// pieces below the engine minimum are filtered at trim time.
pub fn generic_signature_from_matches(
    table: &MatchChainTable,
    bb_candidate_ids: &IdentSequence,
    disable_nibble_masking: bool,
    min_piece_length: usize,
) -> Result<RawSignature> {
    if bb_candidate_ids.is_empty() {
        return Err(SigforgeError::invalid_argument(
            "empty basic block candidate list",
        ));
    }
    if min_piece_length < 1 {
        return Err(SigforgeError::invalid_argument(
            "minimum piece length must be at least 1",
        ));
    }

    let mut regex: Vec<SigByte> = Vec::new();

    for &bb_id in bb_candidate_ids {
        let mut bb_sequences: Vec<Vec<SigByte>> = Vec::with_capacity(table.len());

        for column in table {
            let bb = column.basic_block_by_id(bb_id).ok_or_else(|| {
                SigforgeError::internal(format!("no basic block for candidate id {bb_id}"))
            })?;

            let mut sequence: Vec<SigByte> = Vec::new();
            let mut last_address: Address = 0;
            let mut last_size: u64 = 0;

            for (&address, &instruction_index) in &bb.instructions {
                let instruction = column.instruction(instruction_index);

                // Non-continuous instructions get an in-between wildcard,
                // otherwise the signature would contain non-consecutive
                // bytes as one literal run.
                if !sequence.is_empty()
                    && sequence.last().map(|byte| byte.kind) != Some(SigByteKind::Wildcard)
                    && last_address + last_size < address
                {
                    sequence.push(SigByte::wildcard());
                }

                if instruction.raw_bytes.is_empty() {
                    return Err(SigforgeError::internal(format!(
                        "no bytes for instruction in {} at {:08x} (from basic block at {:08x})",
                        column.filename(),
                        address,
                        bb.matched.address
                    )));
                }
                add_instruction_bytes(bb.weight, instruction, disable_nibble_masking, &mut sequence);

                last_address = address;
                last_size = instruction.raw_bytes.len() as u64;
            }
            bb_sequences.push(sequence);
        }

        let bb_cs = common_subsequence(&bb_sequences);
        let tokens = regex_from_subsequence(&bb_cs, &bb_sequences);

        if !regex.is_empty() && regex.last().map(|byte| byte.kind) != Some(SigByteKind::Wildcard) {
            regex.push(SigByte::wildcard());
        }
        regex.extend(tokens.into_iter().map(|token| match token {
            RegexToken::Element(byte) => byte,
            RegexToken::Wildcard { .. } => SigByte::wildcard(),
        }));
    }

    penalize_short_atoms(min_piece_length, &mut regex);
    Ok(to_raw_signature(&regex))
}

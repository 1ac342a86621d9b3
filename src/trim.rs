//! Signature trimming: reduces a raw signature to its length budget
//! using the strategy configured in the definition.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, SigforgeError};
use crate::types::{RawSignature, Signature, TrimAlgorithm};

/// Mask for the variant so a zero variant still yields a non-trivial
/// PRNG seed.
const VARIANT_XOR_MASK: u32 = 0x1599_C98B;
/// Fixed entropy mixed into the RANDOM trimming seed.
const RANDOM_SEED_SUFFIX: &str = "369ea79bcded92881284";

/// Keeps the longest prefix of `piece_indices` whose total byte count
/// fits `max_length`.
fn trim_last(max_length: i64, raw: &RawSignature, piece_indices: &mut Vec<usize>) {
    let mut current_length: i64 = 0;
    let mut keep = 0;
    for &index in piece_indices.iter() {
        let new_length = current_length + raw.pieces[index].bytes.len() as i64;
        if new_length > max_length {
            break;
        }
        current_length = new_length;
        keep += 1;
    }
    piece_indices.truncate(keep);
}

/// Sorts by descending weight (ties towards longer pieces) and greedily
/// admits every piece that still fits.
fn trim_low_weight(max_length: i64, raw: &RawSignature, piece_indices: &mut Vec<usize>) {
    piece_indices.sort_by(|&a, &b| {
        raw.pieces[b]
            .weight
            .cmp(&raw.pieces[a].weight)
            .then(raw.pieces[b].bytes.len().cmp(&raw.pieces[a].bytes.len()))
    });

    let mut keep_indices = Vec::with_capacity(piece_indices.len());
    let mut current_length: i64 = 0;
    for &index in piece_indices.iter() {
        let new_length = current_length + raw.pieces[index].bytes.len() as i64;
        if new_length > max_length {
            // Don't give up yet, shorter pieces may follow.
            continue;
        }
        keep_indices.push(index);
        current_length = new_length;
    }
    *piece_indices = keep_indices;
}

/// Applies the definition's trimming strategy and returns the surviving
/// pieces in their original spatial order.
///
/// Pieces shorter than the larger of `engine_min_piece_len` and the
/// definition's minimum are dropped up front; the weighted strategies
/// additionally drop zero-weight pieces.
pub fn relevant_signature_subset(
    signature: &Signature,
    engine_min_piece_len: usize,
) -> Result<RawSignature> {
    let raw = &signature.raw_signature;
    let definition = &signature.definition;

    let min_piece_len = engine_min_piece_len.max(definition.min_piece_length);
    let algorithm = definition.trim_algorithm;
    let mut piece_indices: Vec<usize> = raw
        .pieces
        .iter()
        .enumerate()
        .filter(|(_, piece)| {
            if matches!(
                algorithm,
                TrimAlgorithm::Weighted | TrimAlgorithm::WeightedGreedy
            ) && piece.weight == 0
            {
                return false;
            }
            piece.bytes.len() >= min_piece_len
        })
        .map(|(index, _)| index)
        .collect();

    let max_length = definition.trim_length;
    if max_length < 0 && algorithm != TrimAlgorithm::None {
        return Err(SigforgeError::invalid_argument(
            "unbounded signature trimming requested",
        ));
    }
    match algorithm {
        TrimAlgorithm::None => {}
        TrimAlgorithm::Last => trim_last(max_length, raw, &mut piece_indices),
        TrimAlgorithm::First => {
            piece_indices.reverse();
            trim_last(max_length, raw, &mut piece_indices);
        }
        TrimAlgorithm::Random => {
            // Mix the signature variant into the PRNG's seed; identical
            // variants shuffle identically across runs and releases.
            let seed = format!(
                "{}{RANDOM_SEED_SUFFIX}",
                definition.variant ^ VARIANT_XOR_MASK
            );
            let mut rng = ChaCha8Rng::seed_from_u64(xxh3_64(seed.as_bytes()));
            piece_indices.shuffle(&mut rng);
            trim_last(max_length, raw, &mut piece_indices);
        }
        TrimAlgorithm::WeightedGreedy => trim_low_weight(max_length, raw, &mut piece_indices),
        TrimAlgorithm::Weighted => {
            return Err(SigforgeError::unimplemented(
                "knapsack trimming requires a solver; use weighted-greedy instead",
            ));
        }
    }

    if piece_indices.is_empty() {
        return Err(SigforgeError::invalid_argument(
            "no byte piece to create signature",
        ));
    }

    // Restore the signature's spatial order.
    piece_indices.sort_unstable();
    Ok(RawSignature {
        pieces: piece_indices
            .into_iter()
            .map(|index| raw.pieces[index].clone())
            .collect(),
    })
}

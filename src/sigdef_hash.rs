//! Stable signature-id derivation.
//!
//! Emitted rules are named `sig_<g4><h4><v4>_<p4><r4>`, where each part
//! is a 4-hex-digit value derived from the signature definition: the
//! first signature group, the XOR-combined item ids, the variant, the
//! serialized definition (with per-run fields cleared) and a
//! caller-supplied random value. The hash is xxh3-64, which is publicly
//! documented and stable across releases.

use std::fmt::Write;

use xxhash_rust::xxh3::xxh3_64;

use crate::types::SignatureDefinition;

const SIGNATURE_ID_PREFIX: &str = "sig_";

/// Appends the low 16 bits of `value` as four zero-padded hex digits.
fn push_short_hex(result: &mut String, value: u64) {
    let _ = write!(result, "{:04x}", value & 0xffff);
}

/// Derives the components of a signature id from a definition.
pub struct SignatureDefinitionHasher {
    definition: SignatureDefinition,
}

impl SignatureDefinitionHasher {
    pub fn new(definition: &SignatureDefinition) -> Self {
        Self { definition: definition.clone() }
    }

    /// Convenience constructor for naming by group and variant only.
    pub fn with_group_and_variant(group: &str, variant: u32) -> Self {
        Self {
            definition: SignatureDefinition {
                signature_groups: vec![group.to_string()],
                variant,
                ..Default::default()
            },
        }
    }

    /// `sig_<g4>`: hash of the first signature group (or the empty
    /// string).
    pub fn id_prefix_up_to_group(&self) -> String {
        let group = self
            .definition
            .signature_groups
            .first()
            .map(String::as_str)
            .unwrap_or("");
        let mut result = String::from(SIGNATURE_ID_PREFIX);
        push_short_hex(&mut result, xxh3_64(group.as_bytes()));
        result
    }

    /// XOR-combined hash of all item ids; XOR keeps the value
    /// independent of their order.
    fn item_ids_hash(&self) -> u64 {
        self.definition
            .item_ids
            .iter()
            .fold(0, |acc, item_id| acc ^ xxh3_64(item_id.as_bytes()))
    }

    /// `sig_<g4><h4>`.
    pub fn id_prefix_up_to_item_ids(&self) -> String {
        let mut result = self.id_prefix_up_to_group();
        push_short_hex(&mut result, self.item_ids_hash());
        result
    }

    /// `sig_<g4><h4><v4>`.
    pub fn id_prefix_up_to_variant(&self) -> String {
        let mut result = self.id_prefix_up_to_item_ids();
        push_short_hex(&mut result, u64::from(self.definition.variant));
        result
    }

    /// `sig_<g4><h4><v4>_<p4>`: includes the hash of the serialized
    /// definition with `unique_signature_id` and `item_ids` cleared
    /// (the latter are already part of `<h4>`).
    pub fn id_prefix_up_to_params(&self) -> String {
        let mut result = self.id_prefix_up_to_variant();
        result.push('_');

        let mut cleared = self.definition.clone();
        cleared.unique_signature_id.clear();
        cleared.item_ids.clear();
        let serialized = serde_json::to_string(&cleared)
            .expect("signature definitions always serialize to JSON");
        push_short_hex(&mut result, xxh3_64(serialized.as_bytes()));
        result
    }

    /// The full id, completed with a caller-supplied random value.
    pub fn signature_id(&self, rand: u32) -> String {
        let mut result = self.id_prefix_up_to_params();
        push_short_hex(&mut result, u64::from(rand));
        result
    }
}

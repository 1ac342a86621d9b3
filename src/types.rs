//! Types and enums used throughout the signature generator.

use serde::{Deserialize, Serialize};

/// Type used for representing memory addresses inside a binary.
pub type Address = u64;

/// A pair of memory addresses, used for matches: the entity's address in
/// the current sample and the corresponding address in the next sample.
pub type AddressPair = (Address, Address);

/// Identifier type providing monotonically increasing identifiers for
/// functions and basic blocks. Id 0 is reserved and means "no id".
pub type Ident = u32;

/// A random accessible sequence of identifiers.
pub type IdentSequence = Vec<Ident>;

/// One matched entity tracked from the current sample into the next.
///
/// After identifier propagation, two matches in consecutive columns belong
/// to the same chain iff they carry the same non-zero `id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Match {
    pub address: Address,
    pub address_in_next: Address,
    pub id: Ident,
}

impl Match {
    pub fn new(pair: AddressPair) -> Self {
        Self { address: pair.0, address_in_next: pair.1, id: 0 }
    }
}

/// Operand width of an immediate value recognized by the disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ImmediateWidth {
    Byte,
    Word,
    DWord,
    QWord,
}

impl TryFrom<u8> for ImmediateWidth {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, Self::Error> {
        match bits {
            8 => Ok(Self::Byte),
            16 => Ok(Self::Word),
            32 => Ok(Self::DWord),
            64 => Ok(Self::QWord),
            other => Err(format!("invalid immediate width: {other}")),
        }
    }
}

impl From<ImmediateWidth> for u8 {
    fn from(width: ImmediateWidth) -> u8 {
        match width {
            ImmediateWidth::Byte => 8,
            ImmediateWidth::Word => 16,
            ImmediateWidth::DWord => 32,
            ImmediateWidth::QWord => 64,
        }
    }
}

/// An immediate operand value together with its encoded width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediate {
    pub value: u64,
    pub width: ImmediateWidth,
}

/// Function classification as reported by the disassembly export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionType {
    #[default]
    Normal,
    Library,
    Imported,
    Thunk,
    Invalid,
}

/// Filter applied to function matches entering the first column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionFilter {
    #[default]
    None,
    Include,
    Exclude,
}

/// Strategy used to reduce the signature to its length budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TrimAlgorithm {
    #[default]
    None,
    /// Drop pieces from the front until the budget fits.
    First,
    /// Drop pieces from the back until the budget fits.
    Last,
    /// Keep a deterministic pseudo-random subset seeded from `variant`.
    Random,
    /// Greedily keep high-weight (then long) pieces that fit.
    WeightedGreedy,
    /// Knapsack over `log1p(weight) * size`; not implemented, callers
    /// fall back to `WeightedGreedy`.
    Weighted,
}

/// Value of a free-form metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Int(i64),
    Bool(bool),
}

/// Free-form key/value pair passed through into the formatted signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: MetaValue,
}

impl MetaEntry {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: MetaValue::String(value.into()) }
    }
}

/// Configuration of a single signature generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDefinition {
    /// Human-readable name stamped into the formatted signature.
    pub detection_name: String,
    /// Optional stable id; recorded as `vxsig_taskid` metadata when set.
    pub unique_signature_id: String,
    /// Per-sample identifiers; recorded as `rs1`, `rs2`, ... metadata.
    pub item_ids: Vec<String>,
    /// Downstream engine tags, passed through.
    pub tags: Vec<String>,
    /// Free-form metadata, passed through.
    pub meta: Vec<MetaEntry>,
    /// Minimum literal-byte run to consider, merged by max with the
    /// engine minimum at format time.
    pub min_piece_length: usize,
    /// If true, immediate operand bytes are not masked.
    pub disable_nibble_masking: bool,
    pub trim_algorithm: TrimAlgorithm,
    /// Maximum total literal bytes after trimming. Negative means
    /// unbounded, which is only valid with `TrimAlgorithm::None`.
    pub trim_length: i64,
    /// Seed for `TrimAlgorithm::Random` and part of the signature-id hash.
    pub variant: u32,
    pub function_filter: FunctionFilter,
    /// Addresses the function filter applies to, in the first sample.
    pub filtered_function_addresses: Vec<Address>,
    /// Grouping used for signature-id prefix hashing.
    pub signature_groups: Vec<String>,
}

impl Default for SignatureDefinition {
    fn default() -> Self {
        Self {
            detection_name: String::new(),
            unique_signature_id: String::new(),
            item_ids: Vec::new(),
            tags: Vec::new(),
            meta: Vec::new(),
            min_piece_length: 4,
            disable_nibble_masking: false,
            trim_algorithm: TrimAlgorithm::None,
            trim_length: -1,
            variant: 0,
            function_filter: FunctionFilter::None,
            filtered_function_addresses: Vec::new(),
            signature_groups: Vec::new(),
        }
    }
}

/// One literal-byte run of the final signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub bytes: Vec<u8>,
    /// Hex-nibble indices into `bytes` (two per byte, sorted) that
    /// downstream engines should treat as single-character wildcards.
    pub masked_nibbles: Vec<usize>,
    pub weight: u32,
    /// `"<address-hex>: <disassembly>"` lines for the instructions the
    /// piece bytes originate from.
    pub origin_disassembly: Vec<String>,
}

/// The engine-independent signature: literal pieces separated by
/// implicit unbounded wildcards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignature {
    pub pieces: Vec<Piece>,
}

impl RawSignature {
    /// Total number of literal signature bytes, not counting wildcards.
    pub fn byte_len(&self) -> usize {
        self.pieces.iter().map(|piece| piece.bytes.len()).sum()
    }
}

/// A signature definition together with its generated raw form and any
/// engine-specific renderings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signature {
    pub definition: SignatureDefinition,
    pub raw_signature: RawSignature,
    pub clam_av_signature: Option<String>,
    pub yara_signature: Option<String>,
}

//! sigforge - byte-signature synthesis for malware families.
//!
//! This library turns a chain of pairwise binary-diff results, plus the
//! per-sample disassembly exports, into a single byte-level pattern that
//! matches every sample in the family. The pattern is a sequence of
//! literal byte runs separated by wildcards, renderable as a ClamAV
//! extended signature or a Yara rule.
//!
//! # Example
//!
//! ```no_run
//! use sigforge::formatter::{create_formatter, SignatureKind};
//! use sigforge::siggen::SignatureGenerator;
//! use sigforge::types::Signature;
//!
//! let mut signature = Signature::default();
//! let mut generator = SignatureGenerator::new();
//! generator.add_diff_results(["a_vs_b.matches.json", "b_vs_c.matches.json"]);
//! generator.generate(&mut signature).unwrap();
//!
//! create_formatter(SignatureKind::Yara).format(&mut signature).unwrap();
//! println!("{}", signature.yara_signature.unwrap());
//! ```

pub mod candidates;
pub mod cli;
pub mod common_subsequence;
pub mod diff_reader;
pub mod disasm_reader;
pub mod error;
pub mod formatter;
pub mod generic_signature;
pub mod hamming;
pub mod lcs;
pub mod match_chain;
pub mod sigdef_hash;
pub mod siggen;
pub mod subsequence_regex;
pub mod trim;
pub mod types;

pub use error::{Result, SigforgeError};
pub use siggen::SignatureGenerator;
pub use types::{RawSignature, Signature, SignatureDefinition};

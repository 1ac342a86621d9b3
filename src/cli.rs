//! Command-line interface definitions and parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{Result, SigforgeError};
use crate::formatter::SignatureKind;
use crate::types::{Address, FunctionFilter, SignatureDefinition, TrimAlgorithm};

/// Output format selection for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Yara,
    Clamav,
}

impl From<OutputFormat> for SignatureKind {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Yara => SignatureKind::Yara,
            OutputFormat::Clamav => SignatureKind::ClamAv,
        }
    }
}

/// Generate AV byte signatures from chains of binary-diff results.
///
/// The positional arguments are diff-result files whose samples form a
/// chain: sample1 vs sample2, sample2 vs sample3, and so on. Each
/// sample's disassembly export is expected next to the diff files.
#[derive(Parser, Debug)]
#[command(name = "sigforge", version)]
pub struct Args {
    /// Diff-result files forming a chain of diffs
    #[arg(value_name = "DIFF_RESULT", required = true)]
    pub diff_results: Vec<PathBuf>,

    /// Detection name of the signature
    #[arg(long = "detection_name", default_value = "Sigforge_Signature")]
    pub detection_name: String,

    /// Maximum length of the signature in literal bytes, subject to
    /// further truncation due to limitations of the target format
    #[arg(long = "trim_length", default_value_t = i64::from(i32::MAX))]
    pub trim_length: i64,

    /// Signature trimming algorithm to use
    #[arg(long = "trim_algorithm", value_enum, default_value_t = TrimAlgorithm::Random)]
    pub trim_algorithm: TrimAlgorithm,

    /// Minimum length of literal byte runs to consider
    #[arg(long = "min_piece_length", default_value_t = 4)]
    pub min_piece_length: usize,

    /// Do not mask the bytes of instruction immediate operands
    #[arg(long = "disable_nibble_masking")]
    pub disable_nibble_masking: bool,

    /// Comma-separated hex addresses of functions in the first sample to
    /// consider for the signature. Mutually exclusive with
    /// --function_excludes.
    #[arg(long = "function_includes", value_name = "ADDRS", conflicts_with = "function_excludes")]
    pub function_includes: Option<String>,

    /// Comma-separated hex addresses of functions in the first sample to
    /// leave out of the signature
    #[arg(long = "function_excludes", value_name = "ADDRS")]
    pub function_excludes: Option<String>,

    /// Signature output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yara)]
    pub format: OutputFormat,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parses a comma-separated list of hex addresses, with or without `0x`
/// prefixes. Whitespace around entries is ignored; empty entries are
/// skipped.
pub fn parse_hex_addresses(list: &str) -> Result<Vec<Address>> {
    let mut addresses = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let digits = entry.strip_prefix("0x").unwrap_or(entry);
        let address = Address::from_str_radix(digits, 16).map_err(|_| {
            SigforgeError::invalid_argument(format!(
                "failed to parse hex address in function filter: {entry:?}"
            ))
        })?;
        addresses.push(address);
    }
    Ok(addresses)
}

impl Args {
    /// Builds the signature definition configured by the command line.
    pub fn to_signature_definition(&self) -> Result<SignatureDefinition> {
        let mut definition = SignatureDefinition {
            detection_name: self.detection_name.clone(),
            trim_length: self.trim_length,
            trim_algorithm: self.trim_algorithm,
            min_piece_length: self.min_piece_length,
            disable_nibble_masking: self.disable_nibble_masking,
            ..Default::default()
        };

        if let Some(list) = &self.function_includes {
            definition.function_filter = FunctionFilter::Include;
            definition.filtered_function_addresses = parse_hex_addresses(list)?;
        } else if let Some(list) = &self.function_excludes {
            definition.function_filter = FunctionFilter::Exclude;
            definition.filtered_function_addresses = parse_hex_addresses(list)?;
        }
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_addresses() {
        assert_eq!(parse_hex_addresses("").unwrap(), Vec::<Address>::new());
        assert_eq!(parse_hex_addresses("1000").unwrap(), vec![0x1000]);
        assert_eq!(
            parse_hex_addresses("0x1000, 2000 ,0x00403000").unwrap(),
            vec![0x1000, 0x2000, 0x0040_3000]
        );
        assert!(parse_hex_addresses("0x1000,zzz").is_err());
    }

    #[test]
    fn test_args_build_include_filter() {
        let args = Args::parse_from([
            "sigforge",
            "--function_includes=0x1000,0x2000",
            "a_vs_b.matches.json",
        ]);
        let definition = args.to_signature_definition().unwrap();
        assert_eq!(definition.function_filter, FunctionFilter::Include);
        assert_eq!(definition.filtered_function_addresses, vec![0x1000, 0x2000]);
    }

    #[test]
    fn test_args_build_exclude_filter() {
        let args = Args::parse_from([
            "sigforge",
            "--function_excludes=4000",
            "a_vs_b.matches.json",
        ]);
        let definition = args.to_signature_definition().unwrap();
        assert_eq!(definition.function_filter, FunctionFilter::Exclude);
        assert_eq!(definition.filtered_function_addresses, vec![0x4000]);
    }

    #[test]
    fn test_include_and_exclude_are_mutually_exclusive() {
        let result = Args::try_parse_from([
            "sigforge",
            "--function_includes=0x1000",
            "--function_excludes=0x2000",
            "a_vs_b.matches.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["sigforge", "a_vs_b.matches.json"]);
        assert_eq!(args.detection_name, "Sigforge_Signature");
        assert_eq!(args.trim_algorithm, TrimAlgorithm::Random);
        assert_eq!(args.trim_length, i64::from(i32::MAX));
        assert_eq!(args.min_piece_length, 4);
        assert_eq!(args.format, OutputFormat::Yara);
        let definition = args.to_signature_definition().unwrap();
        assert_eq!(definition.function_filter, FunctionFilter::None);
    }

    #[test]
    fn test_at_least_one_diff_result_is_required() {
        assert!(Args::try_parse_from(["sigforge"]).is_err());
    }
}

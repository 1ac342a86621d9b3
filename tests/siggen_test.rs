//! End-to-end tests for the signature generation pipeline, driving it
//! from diff-result and disassembly fixtures on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use sigforge::formatter::{create_formatter, SignatureKind};
use sigforge::siggen::SignatureGenerator;
use sigforge::types::{MetaValue, Signature, TrimAlgorithm};
use sigforge::SigforgeError;

/// Addresses of the two functions in each of the three samples.
const FUNCTION_ADDRESSES: [[u64; 2]; 3] = [
    [0x1000, 0x2000],    // alpha
    [0x11000, 0x12000],  // beta
    [0x21000, 0x22000],  // gamma
];

/// Per-function instruction layout: (offset, bytes, disassembly).
const FUNCTION_BODIES: [&[(u64, &str, &str)]; 2] = [
    &[(0, "5589e5", "push ebp"), (3, "83ec10", "sub esp, 0x10")],
    &[(0, "31c0", "xor eax, eax"), (2, "c9c3", "leave")],
];

const SAMPLE_NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

fn write_json(path: &Path, value: &serde_json::Value) {
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn diff_document(sample: usize) -> serde_json::Value {
    let function_matches: Vec<serde_json::Value> = (0..2)
        .map(|func| {
            let address1 = FUNCTION_ADDRESSES[sample][func];
            let address2 = FUNCTION_ADDRESSES[sample + 1][func];
            json!({
                "address1": address1,
                "address2": address2,
                "basic_blocks": [{
                    "address1": address1,
                    "address2": address2,
                    "instructions": FUNCTION_BODIES[func]
                        .iter()
                        .map(|(offset, _, _)| json!({
                            "address1": address1 + offset,
                            "address2": address2 + offset,
                        }))
                        .collect::<Vec<_>>(),
                }],
            })
        })
        .collect();
    json!({
        "file1": {"filename": SAMPLE_NAMES[sample], "hash": "aa".repeat(32)},
        "file2": {"filename": SAMPLE_NAMES[sample + 1], "hash": "bb".repeat(32)},
        "function_matches": function_matches,
    })
}

fn disasm_document(sample: usize) -> serde_json::Value {
    let functions: Vec<serde_json::Value> = (0..2)
        .map(|func| json!({"address": FUNCTION_ADDRESSES[sample][func], "type": "normal"}))
        .collect();
    let basic_blocks: Vec<serde_json::Value> = (0..2)
        .map(|func| {
            let base = FUNCTION_ADDRESSES[sample][func];
            json!({
                "address": base,
                "instructions": FUNCTION_BODIES[func]
                    .iter()
                    .map(|(offset, bytes, disassembly)| json!({
                        "address": base + offset,
                        "bytes": bytes,
                        "disassembly": disassembly,
                        "immediates": [],
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "sha256": format!("{:02x}", sample).repeat(32),
        "functions": functions,
        "basic_blocks": basic_blocks,
    })
}

/// Writes the three-sample family into `dir` and returns the diff-result
/// paths in chain order.
fn write_family(dir: &Path) -> Vec<PathBuf> {
    let mut diffs = Vec::new();
    for sample in 0..2 {
        let path = dir.join(format!(
            "{}_vs_{}.matches.json",
            SAMPLE_NAMES[sample],
            SAMPLE_NAMES[sample + 1]
        ));
        write_json(&path, &diff_document(sample));
        diffs.push(path);
    }
    for sample in 0..3 {
        write_json(
            &dir.join(format!("{}.disasm.json", SAMPLE_NAMES[sample])),
            &disasm_document(sample),
        );
    }
    diffs
}

#[test]
fn test_generate_raw_signature() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());

    let mut signature = Signature::default();
    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    generator.generate(&mut signature).unwrap();

    let pieces = &signature.raw_signature.pieces;
    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].bytes, b"\x55\x89\xe5\x83\xec\x10");
    assert_eq!(pieces[1].bytes, b"\x31\xc0\xc9\xc3");
    for piece in pieces {
        assert!(!piece.bytes.is_empty());
        assert!(piece.masked_nibbles.is_empty());
        // Both runs meet the default minimum piece length of 4, so they
        // keep the default weight.
        assert_eq!(piece.weight, 1);
    }

    // Provenance is recorded per originating instruction.
    assert_eq!(
        pieces[0].origin_disassembly,
        vec![
            "00001000: push ebp".to_string(),
            "00001003: sub esp, 0x10".to_string(),
        ]
    );
}

#[test]
fn test_generate_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());

    let mut first = Signature::default();
    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs.clone());
    generator.generate(&mut first).unwrap();

    let mut second = Signature::default();
    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    generator.generate(&mut second).unwrap();

    assert_eq!(first.raw_signature, second.raw_signature);
}

#[test]
fn test_generate_stamps_metadata() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());

    let mut signature = Signature::default();
    signature.definition.unique_signature_id = "testtask".into();
    signature.definition.item_ids = vec!["item0".into(), "item1".into(), "item3".into()];

    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    generator.generate(&mut signature).unwrap();

    let meta = &signature.definition.meta;
    let find = |key: &str| {
        meta.iter().find(|entry| entry.key == key).map(|entry| &entry.value)
    };
    assert!(find("vxsig_build").is_some());
    assert_eq!(find("vxsig_taskid"), Some(&MetaValue::String("testtask".into())));
    assert_eq!(find("rs1"), Some(&MetaValue::String("item0".into())));
    assert_eq!(find("rs2"), Some(&MetaValue::String("item1".into())));
    assert_eq!(find("rs3"), Some(&MetaValue::String("item3".into())));
}

#[test]
fn test_generate_and_format_yara() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());

    let mut signature = Signature::default();
    signature.definition.detection_name = "test_malware".into();
    signature.definition.trim_algorithm = TrimAlgorithm::Random;
    signature.definition.trim_length = 200;

    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    generator.generate(&mut signature).unwrap();

    create_formatter(SignatureKind::Yara).format(&mut signature).unwrap();
    let data = signature.yara_signature.unwrap();
    assert!(data.starts_with("rule test_malware {"));
    assert!(data.contains("5589e583ec10"));
    assert!(data.contains("31c0c9c3"));
    assert!(data.contains("// 00001000: push ebp"));
    assert!(data.ends_with("  condition:\n    all of them\n}\n"));
}

#[test]
fn test_generate_and_format_clamav() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());

    let mut signature = Signature::default();
    signature.definition.detection_name = "test_malware".into();

    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    generator.generate(&mut signature).unwrap();

    create_formatter(SignatureKind::ClamAv).format(&mut signature).unwrap();
    assert_eq!(
        signature.clam_av_signature.as_deref(),
        Some("test_malware:0:*:5589e583ec10*31c0c9c3")
    );
}

#[test]
fn test_diffs_in_wrong_order_are_not_a_chain() {
    let dir = TempDir::new().unwrap();
    let mut diffs = write_family(dir.path());
    diffs.reverse();

    let mut signature = Signature::default();
    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    let error = generator.generate(&mut signature).unwrap_err();
    assert!(error
        .to_string()
        .contains("Input files do not form a chain of diffs"));
}

#[test]
fn test_function_include_filter_restricts_candidates() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());

    let mut signature = Signature::default();
    signature.definition.function_filter = sigforge::types::FunctionFilter::Include;
    signature.definition.filtered_function_addresses = vec![0x1000];

    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    generator.generate(&mut signature).unwrap();

    // Only the first function survives the filter.
    let pieces = &signature.raw_signature.pieces;
    assert_eq!(pieces.len(), 1);
    assert_eq!(pieces[0].bytes, b"\x55\x89\xe5\x83\xec\x10");
}

#[test]
fn test_missing_disassembly_export_fails() {
    let dir = TempDir::new().unwrap();
    let diffs = write_family(dir.path());
    fs::remove_file(dir.path().join("beta.disasm.json")).unwrap();

    let mut signature = Signature::default();
    let mut generator = SignatureGenerator::new();
    generator.add_diff_results(diffs);
    let result = generator.generate(&mut signature);
    assert!(matches!(result, Err(SigforgeError::Io { .. })));
}

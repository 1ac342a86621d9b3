//! Yara rule formatting (hex-string syntax with `[-]` wildcards).

use super::{masked_hex, SignatureFormatter};
use crate::error::Result;
use crate::trim::relevant_signature_subset;
use crate::types::{MetaValue, Signature};

/// Maximum length of a Yara identifier.
const YARA_MAX_IDENT_LEN: usize = 128;
/// Yara rejects hex strings shorter than two tokens.
const YARA_MIN_TOKENS: usize = 2;
/// Yara has a hard limit of tokens per hex string; a byte and a
/// wildcard each count as one token.
const YARA_MAX_HEX_STRING_TOKENS: usize = 5000;
const YARA_HEX_WILDCARD: &str = "[-]";

fn make_valid_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .take(YARA_MAX_IDENT_LEN)
        .map(|c| if c == '-' { '_' } else { c })
        .collect()
}

pub struct YaraFormatter;

impl SignatureFormatter for YaraFormatter {
    fn format(&self, signature: &mut Signature) -> Result<()> {
        let definition = &signature.definition;
        let mut data = String::new();

        // Rule name and tags.
        let name = if definition.detection_name.is_empty() {
            &definition.unique_signature_id
        } else {
            &definition.detection_name
        };
        data.push_str("rule ");
        data.push_str(&make_valid_identifier(name));
        for (index, tag) in definition.tags.iter().enumerate() {
            data.push_str(if index == 0 { " : " } else { " " });
            data.push_str(&make_valid_identifier(tag));
        }
        data.push_str(" {\n");

        if !definition.meta.is_empty() {
            data.push_str("  meta:\n");
            for entry in &definition.meta {
                let value = match &entry.value {
                    MetaValue::String(text) => {
                        format!("\"{}\"", make_valid_identifier(text))
                    }
                    MetaValue::Int(number) => number.to_string(),
                    MetaValue::Bool(flag) => flag.to_string(),
                };
                data.push_str(&format!("    {} = {}\n", entry.key, value));
            }
        }

        // The actual hex-string signature.
        data.push_str("  strings:\n    $ = {\n");

        let subset = relevant_signature_subset(signature, YARA_MIN_TOKENS)?;

        let mut num_tokens = 0;
        let mut needs_wildcard = false;
        for piece in &subset.pieces {
            if num_tokens > YARA_MAX_HEX_STRING_TOKENS {
                break;
            }
            let max_copy_bytes = YARA_MAX_HEX_STRING_TOKENS
                .saturating_sub(num_tokens + usize::from(needs_wildcard));
            if max_copy_bytes < YARA_MIN_TOKENS {
                // The token limit is hard; truncate rather than emit a
                // rule Yara rejects.
                break;
            }

            data.push_str("      ");
            if needs_wildcard {
                data.push_str(YARA_HEX_WILDCARD);
                num_tokens += 1;
            } else {
                // Align the first piece with the wildcard-prefixed ones.
                data.push_str(&" ".repeat(YARA_HEX_WILDCARD.len()));
            }

            let copy = piece.bytes.len().min(max_copy_bytes);
            data.push_str(&masked_hex(&piece.bytes[..copy], &piece.masked_nibbles));
            data.push('\n');

            for disassembly in &piece.origin_disassembly {
                data.push_str("         // ");
                data.push_str(disassembly);
                data.push('\n');
            }

            needs_wildcard = true;
            num_tokens += copy;
        }

        data.push_str("\n  }\n  condition:\n    all of them\n}\n");
        signature.yara_signature = Some(data);
        Ok(())
    }

    fn format_database(&self, signatures: &[Signature]) -> Result<String> {
        let mut database = String::new();
        for signature in signatures {
            match &signature.yara_signature {
                Some(data) => database.push_str(data),
                None => {
                    let mut formatted = signature.clone();
                    self.format(&mut formatted)?;
                    database.push_str(formatted.yara_signature.as_deref().unwrap_or_default());
                }
            }
        }
        Ok(database)
    }
}

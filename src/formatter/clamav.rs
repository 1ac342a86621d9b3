//! ClamAV extended-signature formatting (hex with wildcards, `.ndb`
//! body format).

use super::{masked_hex, SignatureFormatter};
use crate::error::{Result, SigforgeError};
use crate::trim::relevant_signature_subset;
use crate::types::Signature;

/// ClamAV does not accept hex runs shorter than two bytes.
const CLAMAV_MIN_BYTES: usize = 2;
/// ClamAV's line buffer for reading `.ndb` signatures is 8192 bytes
/// including the trailing newline.
const CLAMAV_MAX_LINE_LEN: usize = 8191;
const CLAMAV_WILDCARD: &str = "*";

pub struct ClamAvFormatter;

impl SignatureFormatter for ClamAvFormatter {
    fn format(&self, signature: &mut Signature) -> Result<()> {
        let mut data = String::with_capacity(CLAMAV_MAX_LINE_LEN);
        data.push_str(&signature.definition.detection_name);
        data.push_str(":0:*:");

        let subset = relevant_signature_subset(signature, CLAMAV_MIN_BYTES)?;

        let mut needs_wildcard = false;
        for piece in &subset.pieces {
            let budget = CLAMAV_MAX_LINE_LEN
                .saturating_sub(data.len() + usize::from(needs_wildcard) * CLAMAV_WILDCARD.len());
            let max_copy_bytes = budget / 2;
            if max_copy_bytes < CLAMAV_MIN_BYTES {
                // The line buffer limit is hard; truncate the signature
                // rather than emit something ClamAV rejects.
                break;
            }
            if needs_wildcard {
                data.push_str(CLAMAV_WILDCARD);
            }
            let copy = piece.bytes.len().min(max_copy_bytes);
            data.push_str(&masked_hex(&piece.bytes[..copy], &piece.masked_nibbles));
            needs_wildcard = true;
        }

        if data.len() > CLAMAV_MAX_LINE_LEN {
            // Only possible with an overly long detection name.
            return Err(SigforgeError::out_of_range(format!(
                "signature data size too long: {} > {CLAMAV_MAX_LINE_LEN}",
                data.len()
            )));
        }
        signature.clam_av_signature = Some(data);
        Ok(())
    }

    fn format_database(&self, signatures: &[Signature]) -> Result<String> {
        let mut database = String::new();
        for signature in signatures {
            match &signature.clam_av_signature {
                Some(data) => {
                    database.push_str(data);
                    database.push('\n');
                }
                None => {
                    let mut formatted = signature.clone();
                    self.format(&mut formatted)?;
                    database.push_str(formatted.clam_av_signature.as_deref().unwrap_or_default());
                    database.push('\n');
                }
            }
        }
        Ok(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Piece, RawSignature, SignatureDefinition};

    fn make_signature(pieces: &[Piece]) -> Signature {
        Signature {
            definition: SignatureDefinition {
                detection_name: "test_malware".into(),
                min_piece_length: 2,
                ..Default::default()
            },
            raw_signature: RawSignature { pieces: pieces.to_vec() },
            ..Default::default()
        }
    }

    #[test]
    fn test_format_joins_pieces_with_wildcards() {
        let mut signature = make_signature(&[
            Piece { bytes: b"\x55\x89\xe5".to_vec(), ..Default::default() },
            Piece { bytes: b"\xc3\x90".to_vec(), ..Default::default() },
        ]);
        ClamAvFormatter.format(&mut signature).unwrap();
        assert_eq!(
            signature.clam_av_signature.as_deref(),
            Some("test_malware:0:*:5589e5*c390")
        );
    }

    #[test]
    fn test_format_applies_nibble_masks() {
        let mut signature = make_signature(&[Piece {
            bytes: b"\x68\x30\x30\x30\x30".to_vec(),
            masked_nibbles: vec![2, 3, 4, 5, 6, 7, 8, 9],
            ..Default::default()
        }]);
        ClamAvFormatter.format(&mut signature).unwrap();
        assert_eq!(
            signature.clam_av_signature.as_deref(),
            Some("test_malware:0:*:68????????")
        );
    }

    #[test]
    fn test_format_rejects_empty_subset() {
        let mut signature = make_signature(&[]);
        assert!(ClamAvFormatter.format(&mut signature).is_err());
    }

    #[test]
    fn test_format_truncates_at_line_limit() {
        // One giant piece: the hex must stop before the 8191-byte line
        // limit, rounded to whole bytes.
        let mut signature = make_signature(&[Piece {
            bytes: vec![0xaa; 8192],
            ..Default::default()
        }]);
        ClamAvFormatter.format(&mut signature).unwrap();
        let data = signature.clam_av_signature.unwrap();
        assert!(data.len() <= CLAMAV_MAX_LINE_LEN);
        let hex_len = data.len() - "test_malware:0:*:".len();
        assert_eq!(hex_len % 2, 0);
        assert!(hex_len >= 2 * ((CLAMAV_MAX_LINE_LEN - "test_malware:0:*:".len()) / 2 - 1));
    }

    #[test]
    fn test_format_database_formats_missing_renderings() {
        let signature = make_signature(&[Piece {
            bytes: b"\x01\x02\x03\x04".to_vec(),
            ..Default::default()
        }]);
        let database = ClamAvFormatter
            .format_database(&[signature.clone(), signature])
            .unwrap();
        let lines: Vec<&str> = database.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line == &"test_malware:0:*:01020304"));
    }
}

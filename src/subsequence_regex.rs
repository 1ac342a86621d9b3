//! Builds a regular-expression-like token stream that matches a common
//! subsequence in each of its originating sequences. This is used to
//! assemble the final AV signatures after common instruction bytes have
//! been found.

/// One token of the built expression: a literal element or a gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegexToken<T> {
    Element(T),
    /// A gap between two literal elements. `min_gap`/`max_gap` are the
    /// extremes, across sequences, of the number of skipped elements.
    /// Downstream writers in this crate ignore the bounds and emit
    /// unbounded wildcards.
    Wildcard { min_gap: usize, max_gap: usize },
}

/// Builds a token stream that matches `cs` in each of `sequences`.
///
/// For each symbol of `cs` a per-sequence cursor advances to the next
/// occurrence of that symbol. A wildcard is emitted between two
/// consecutive symbols iff in at least one sequence the element following
/// the matched symbol differs from the next symbol of `cs`.
///
/// # Panics
///
/// Panics if `cs` is not a common subsequence of every input sequence.
pub fn regex_from_subsequence<T, S>(cs: &[T], sequences: &[S]) -> Vec<RegexToken<T>>
where
    T: Clone + PartialEq,
    S: AsRef<[T]>,
{
    let mut cursors = vec![0usize; sequences.len()];
    let mut result = Vec::with_capacity(cs.len());
    let mut insert_wildcard = false;

    for (pos, symbol) in cs.iter().enumerate() {
        // A wildcard flagged at the previous symbol is emitted now, once
        // this step's gap bounds are known.
        let defer_wildcard = insert_wildcard;
        insert_wildcard = false;

        let mut min_gap = usize::MAX;
        let mut max_gap = 0;
        for (sequence, cursor) in sequences.iter().zip(cursors.iter_mut()) {
            let sequence = sequence.as_ref();
            let found = sequence[*cursor..]
                .iter()
                .position(|element| element == symbol)
                .map(|offset| *cursor + offset)
                .expect("common subsequence element missing from sequence");

            let gap = found - *cursor;
            *cursor = found + 1;
            min_gap = min_gap.min(gap);
            max_gap = max_gap.max(gap);

            // A non-continuous step in any sequence forces a wildcard
            // before the next subsequence symbol.
            if pos + 1 < cs.len() && sequence.get(*cursor) != Some(&cs[pos + 1]) {
                insert_wildcard = true;
            }
        }

        if defer_wildcard {
            result.push(RegexToken::Wildcard { min_gap, max_gap });
        }
        result.push(RegexToken::Element(symbol.clone()));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regex_str(cs: &str, sequences: &[&str]) -> String {
        let seqs: Vec<&[u8]> = sequences.iter().map(|s| s.as_bytes()).collect();
        regex_from_subsequence(cs.as_bytes(), &seqs)
            .into_iter()
            .map(|token| match token {
                RegexToken::Element(byte) => char::from(byte),
                RegexToken::Wildcard { .. } => '*',
            })
            .collect()
    }

    #[test]
    fn test_empty_common_empty_sequences() {
        assert_eq!(regex_str("", &[]), "");
    }

    #[test]
    fn test_empty_common() {
        assert_eq!(regex_str("", &["ABCDEF", "GHIJKL", "MNOPQR"]), "");
    }

    #[test]
    fn test_continuous_sequences_need_no_wildcard() {
        assert_eq!(regex_str("abc", &["abc", "abc", "abc"]), "abc");
    }

    #[test]
    fn test_interspersed_at_one_position() {
        assert_eq!(regex_str("abc", &["aBbc", "aCbc", "aDbc"]), "a*bc");
    }

    #[test]
    fn test_repeated_symbols_different_lengths() {
        let result = regex_str(
            "common",
            &[
                "ABCcommonDEF",
                "DEFccoommmmoonnGHI",
                "GHIcccooommmmmmooonnnJKL",
                "JKLccccoooommmmmmmmoooonnnnMNO",
            ],
        );
        // Several placements are valid; all match every input.
        assert!(
            ["c*o*mm*o*n", "c*o*mmo*n", "co*mmo*n", "c*omm*on", "co*mm*on"]
                .contains(&result.as_str()),
            "unexpected regex: {result}"
        );
    }

    #[test]
    fn test_gap_bounds_reflect_skipped_elements() {
        let seqs: Vec<&[u8]> = vec![b"aXbc", b"aXYZbc"];
        let tokens = regex_from_subsequence(b"abc", &seqs);
        assert_eq!(tokens.len(), 4);
        match &tokens[1] {
            RegexToken::Wildcard { min_gap, max_gap } => {
                assert_eq!(*min_gap, 1);
                assert_eq!(*max_gap, 3);
            }
            other => panic!("expected wildcard, got {other:?}"),
        }
    }
}

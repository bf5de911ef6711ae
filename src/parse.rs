use chumsky::error::Rich;
use chumsky::prelude::*;
use std::fmt;

/// A scanned constructor tag literal, before bit packing.
///
/// `#<hex>[_]` carries four bits per digit, `$<bin>[_]` one bit per digit.
/// A trailing `_` drops the trailing zero bits of the packed value; `$_` and
/// `#_` denote the empty tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLiteral {
    /// Digit characters without the sigil or underscore.
    pub digits: String,
    /// True for `$...`, false for `#...`.
    pub binary: bool,
    /// Trailing `_` present.
    pub trimmed: bool,
}

/// Error produced when a tag literal claims more than 63 prefix bits.
#[derive(Debug, Clone)]
pub struct TagOverflow;

impl fmt::Display for TagOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag literal does not fit into 63 prefix bits")
    }
}

/// Creates a parser for TL-B tag literals.
pub fn tag_literal_parser<'a>()
-> impl Parser<'a, &'a str, TagLiteral, extra::Err<Rich<'a, char>>> {
    let hex = just('#')
        .ignore_then(one_of("0123456789abcdef").repeated().to_slice())
        .then(just('_').or_not())
        .map(|(digits, trim): (&str, Option<char>)| TagLiteral {
            digits: digits.to_string(),
            binary: false,
            trimmed: trim.is_some(),
        });

    let bin = just('$')
        .ignore_then(one_of("01").repeated().to_slice())
        .then(just('_').or_not())
        .map(|(digits, trim): (&str, Option<char>)| TagLiteral {
            digits: digits.to_string(),
            binary: true,
            trimmed: trim.is_some(),
        });

    choice((hex, bin))
}

/// Packs a tag literal into the 64-bit prefix word `<bits> 1 0...0`, where
/// the lone `1` below the prefix marks its length.
///
/// Returns `Err` if the literal claims 64 or more prefix bits, or if it is
/// empty without a trailing underscore (a bare `#` or `$` is not a tag).
pub fn pack_tag(lit: &TagLiteral) -> Result<u64, TagOverflow> {
    if lit.digits.is_empty() && !lit.trimmed {
        return Err(TagOverflow);
    }
    let mut val: u64 = 0;
    let mut bits: u32 = 0;
    if lit.binary {
        for c in lit.digits.chars() {
            if bits > 63 {
                return Err(TagOverflow);
            }
            let d = c as u64 - '0' as u64;
            val |= d << (63 - bits);
            bits += 1;
        }
    } else {
        for c in lit.digits.chars() {
            if bits > 60 {
                return Err(TagOverflow);
            }
            let d = c.to_digit(16).expect("parser admits hex digits only") as u64;
            val |= d << (60 - bits);
            bits += 4;
        }
    }
    if lit.trimmed {
        while bits > 0 && (val >> (64 - bits)) & 1 == 0 {
            bits -= 1;
        }
    }
    if bits >= 64 {
        return Err(TagOverflow);
    }
    Ok(val | (1u64 << (63 - bits)))
}

/// Parses and packs a complete tag literal such as `#a9f_` or `$1011`.
pub fn parse_tag_literal(input: &str) -> Result<u64, Vec<Rich<'_, char>>> {
    let lit = tag_literal_parser().parse(input).into_result()?;
    pack_tag(&lit).map_err(|e| vec![Rich::custom((0..input.len()).into(), e)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_literals() {
        let test_cases: &[(&str, u64)] = &[
            // Empty tags: marker bit only.
            ("$_", 1u64 << 63),
            ("#_", 1u64 << 63),
            // Single binary digits.
            ("$0", 1u64 << 62),
            ("$1", (1u64 << 63) | (1u64 << 62)),
            // Four-bit hex digit plus marker.
            ("#5", (0x5u64 << 60) | (1u64 << 59)),
            // `1100` with trailing zeros dropped leaves the prefix `11`.
            ("#c_", (0x3u64 << 62) | (1u64 << 61)),
            // Binary trailing-zero drop.
            ("$100_", (1u64 << 63) | (1u64 << 62)),
            ("$10", (1u64 << 63) | (1u64 << 61)),
        ];

        for (input, expected) in test_cases {
            let result = parse_tag_literal(input);
            assert!(result.is_ok(), "failed to parse: {}", input);
            assert_eq!(result.unwrap(), *expected, "wrong packing for {}", input);
        }
    }

    #[test]
    fn test_rejects_bare_sigils() {
        assert!(parse_tag_literal("#").is_err());
        assert!(parse_tag_literal("$").is_err());
    }

    #[test]
    fn test_rejects_overflow() {
        // 16 hex digits claim 64 bits.
        assert!(parse_tag_literal("#0123456789abcdef").is_err());
        // 15 digits (60 bits) are fine.
        assert!(parse_tag_literal("#0123456789abcde").is_ok());
        // 64 binary digits overflow, 63 fit.
        let ones63: String = format!("${}", "1".repeat(63));
        let ones64: String = format!("${}", "1".repeat(64));
        assert!(parse_tag_literal(&ones63).is_ok());
        assert!(parse_tag_literal(&ones64).is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_tag_literal("#xyz").is_err());
        assert!(parse_tag_literal("$012").is_err());
        assert!(parse_tag_literal("#a_b").is_err());
        assert!(parse_tag_literal("$1__").is_err());
    }
}

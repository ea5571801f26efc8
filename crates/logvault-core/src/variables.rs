//! Variable Classification and Log-Type Templates
//!
//! This module factors a log message body into a *template* (the static text,
//! with one placeholder byte per variable) and the ordered list of variable
//! tokens that filled the placeholders.
//!
//! ## Classification Rules
//!
//! The body is split on ASCII whitespace, positions preserved. Each token is
//! classified as the first of:
//!
//! 1. **Integer variable**: an optionally signed run of digits whose decimal
//!    re-rendering as an `i64` equals the token byte-for-byte. The value is
//!    inlined into the encoded stream; no dictionary entry is made.
//! 2. **Float variable**: optional sign, digits with exactly one `.`, at
//!    least one digit, at most [`MAX_FLOAT_DIGITS`] digits. Packed into a
//!    `u64` that preserves the exact digit string (see [`EncodedFloat`]).
//! 3. **Dictionary variable**: a token containing at least one digit and at
//!    least one non-digit, or a numeric token the inline encodings cannot
//!    represent exactly (leading zeros, `-0`, i64 overflow, too many float
//!    digits). Interned in the variable dictionary.
//! 4. **Static text**: anything else, copied verbatim into the template.
//!
//! ## Template Encoding
//!
//! Each variable is replaced by a single placeholder byte (one per kind).
//! Raw occurrences of the placeholder bytes or the escape byte in message
//! text are prefixed with [`ESCAPE_BYTE`], so templates decode unambiguously.
//! The order of placeholders in the template equals the order of the encoded
//! variables.

use serde::{Deserialize, Serialize};

/// Escape byte for raw occurrences of `0x10..=0x13` in message text
pub const ESCAPE_BYTE: u8 = 0x10;
/// Placeholder for a dictionary variable
pub const DICT_VAR_PLACEHOLDER: u8 = 0x11;
/// Placeholder for an inline integer variable
pub const INT_VAR_PLACEHOLDER: u8 = 0x12;
/// Placeholder for an inline float variable
pub const FLOAT_VAR_PLACEHOLDER: u8 = 0x13;

/// Largest digit count a packed float can carry while round-tripping exactly
pub const MAX_FLOAT_DIGITS: u32 = 16;

const FLOAT_MANTISSA_BITS: u32 = 54;

/// The three kinds of variable a template placeholder can stand for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Dict,
    Int,
    Float,
}

/// One classified variable token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable<'a> {
    /// Inline signed integer
    Int(i64),
    /// Inline packed decimal float
    Float(EncodedFloat),
    /// Token to be interned in the variable dictionary
    Dict(&'a str),
}

/// A message body factored into its template and variable tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage<'a> {
    /// Static text with placeholder bytes, escape-encoded
    pub template: Vec<u8>,
    /// Variables in placeholder order
    pub variables: Vec<Variable<'a>>,
}

/// A decimal float token packed into a `u64` without losing its exact text.
///
/// Bit layout (low to high): digits after the point (5 bits), total digit
/// count minus one (4 bits), the digit string as an integer (54 bits), sign
/// (1 bit). Reconstruction zero-pads the digit string back to the recorded
/// count, so leading and trailing zeros survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedFloat(u64);

impl EncodedFloat {
    /// Pack a float token. Returns `None` if the token is not a float of the
    /// accepted shape or its digits exceed [`MAX_FLOAT_DIGITS`].
    pub fn encode(token: &str) -> Option<Self> {
        let bytes = token.as_bytes();
        let (negative, rest) = match bytes.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, bytes),
        };

        let mut mantissa: u64 = 0;
        let mut num_digits: u32 = 0;
        let mut frac_digits: Option<u32> = None;
        for &c in rest {
            match c {
                b'0'..=b'9' => {
                    if num_digits == MAX_FLOAT_DIGITS {
                        return None;
                    }
                    mantissa = mantissa * 10 + u64::from(c - b'0');
                    num_digits += 1;
                    if let Some(frac) = frac_digits.as_mut() {
                        *frac += 1;
                    }
                }
                b'.' if frac_digits.is_none() => frac_digits = Some(0),
                _ => return None,
            }
        }
        let frac_digits = frac_digits?;
        if num_digits == 0 {
            return None;
        }

        let mut packed = u64::from(frac_digits);
        packed |= u64::from(num_digits - 1) << 5;
        packed |= mantissa << 9;
        if negative {
            packed |= 1 << (9 + FLOAT_MANTISSA_BITS);
        }
        Some(Self(packed))
    }

    /// Reconstruct the exact token text
    pub fn decode(&self) -> String {
        let frac_digits = (self.0 & 0x1F) as usize;
        let num_digits = ((self.0 >> 5) & 0xF) as usize + 1;
        let mantissa = (self.0 >> 9) & ((1 << FLOAT_MANTISSA_BITS) - 1);
        let negative = (self.0 >> (9 + FLOAT_MANTISSA_BITS)) & 1 != 0;

        let digits = format!("{mantissa:0num_digits$}");
        let mut out = String::with_capacity(num_digits + 2);
        if negative {
            out.push('-');
        }
        out.push_str(&digits[..num_digits - frac_digits]);
        out.push('.');
        out.push_str(&digits[num_digits - frac_digits..]);
        out
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

/// Parse a token as an inline integer. Rejects any token whose canonical
/// `i64` rendering differs from the original text (leading zeros, `-0`,
/// overflow), since those cannot be reconstructed from the value alone.
fn parse_int_token(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let value: i64 = token.parse().ok()?;
    (value.to_string() == token).then_some(value)
}

fn contains_digit(token: &str) -> bool {
    token.bytes().any(|c| c.is_ascii_digit())
}

fn contains_non_digit(token: &str) -> bool {
    token.bytes().any(|c| !c.is_ascii_digit())
}

/// Classify a single whitespace-delimited token
pub fn classify_token(token: &str) -> Option<Variable<'_>> {
    if !contains_digit(token) {
        // Static text: a variable must carry at least one digit
        return None;
    }
    if let Some(value) = parse_int_token(token) {
        return Some(Variable::Int(value));
    }
    if let Some(float) = EncodedFloat::encode(token) {
        return Some(Variable::Float(float));
    }
    if contains_non_digit(token) {
        return Some(Variable::Dict(token));
    }
    // All-digit token that the inline integer encoding cannot represent
    // exactly (e.g. "007", a 25-digit counter); intern it instead
    Some(Variable::Dict(token))
}

fn append_escaped(text: &str, out: &mut Vec<u8>) {
    for &c in text.as_bytes() {
        if (ESCAPE_BYTE..=FLOAT_VAR_PLACEHOLDER).contains(&c) {
            out.push(ESCAPE_BYTE);
        }
        out.push(c);
    }
}

/// Factor a message body into its template and variables.
///
/// Whitespace and static tokens are copied into the template verbatim
/// (escape-encoded); each variable token becomes one placeholder byte.
pub fn parse_message(body: &str) -> ParsedMessage<'_> {
    let mut template = Vec::with_capacity(body.len());
    let mut variables = Vec::new();

    let bytes = body.as_bytes();
    let mut ix = 0;
    while ix < bytes.len() {
        if bytes[ix].is_ascii_whitespace() {
            let start = ix;
            while ix < bytes.len() && bytes[ix].is_ascii_whitespace() {
                ix += 1;
            }
            append_escaped(&body[start..ix], &mut template);
            continue;
        }

        let start = ix;
        while ix < bytes.len() && !bytes[ix].is_ascii_whitespace() {
            ix += 1;
        }
        let token = &body[start..ix];
        match classify_token(token) {
            Some(variable) => {
                template.push(match variable {
                    Variable::Dict(_) => DICT_VAR_PLACEHOLDER,
                    Variable::Int(_) => INT_VAR_PLACEHOLDER,
                    Variable::Float(_) => FLOAT_VAR_PLACEHOLDER,
                });
                variables.push(variable);
            }
            None => append_escaped(token, &mut template),
        }
    }

    ParsedMessage { template, variables }
}

/// One decoded element of a template byte string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePiece {
    /// A literal byte of static text (escape already removed)
    Literal(u8),
    /// A placeholder to be filled from the variable stream
    Placeholder(VariableKind),
}

/// Iterate the pieces of a template, undoing the escape encoding
pub fn template_pieces(template: &[u8]) -> impl Iterator<Item = TemplatePiece> + '_ {
    let mut ix = 0;
    std::iter::from_fn(move || {
        let &c = template.get(ix)?;
        ix += 1;
        Some(match c {
            ESCAPE_BYTE => {
                let &escaped = template.get(ix)?;
                ix += 1;
                TemplatePiece::Literal(escaped)
            }
            DICT_VAR_PLACEHOLDER => TemplatePiece::Placeholder(VariableKind::Dict),
            INT_VAR_PLACEHOLDER => TemplatePiece::Placeholder(VariableKind::Int),
            FLOAT_VAR_PLACEHOLDER => TemplatePiece::Placeholder(VariableKind::Float),
            literal => TemplatePiece::Literal(literal),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Token classification
    // ---------------------------------------------------------------

    #[test]
    fn test_classify_integers() {
        assert_eq!(classify_token("0"), Some(Variable::Int(0)));
        assert_eq!(classify_token("42"), Some(Variable::Int(42)));
        assert_eq!(classify_token("-17"), Some(Variable::Int(-17)));
        assert_eq!(
            classify_token("9223372036854775807"),
            Some(Variable::Int(i64::MAX))
        );
    }

    #[test]
    fn test_classify_static_text() {
        assert_eq!(classify_token("INFO"), None);
        assert_eq!(classify_token("started"), None);
        assert_eq!(classify_token("::"), None);
        assert_eq!(classify_token("-"), None);
        assert_eq!(classify_token("."), None);
    }

    #[test]
    fn test_classify_dictionary_variables() {
        assert_eq!(classify_token("task_12"), Some(Variable::Dict("task_12")));
        assert_eq!(
            classify_token("/var/log/app.2.log"),
            Some(Variable::Dict("/var/log/app.2.log"))
        );
        assert_eq!(
            classify_token("0x7fff5694"),
            Some(Variable::Dict("0x7fff5694"))
        );
        assert_eq!(classify_token("4557)"), Some(Variable::Dict("4557)")));
    }

    #[test]
    fn test_non_canonical_integers_fall_back_to_dictionary() {
        // These all match the integer shape but cannot be reconstructed from
        // an i64 value, so they are interned instead
        assert_eq!(classify_token("007"), Some(Variable::Dict("007")));
        assert_eq!(classify_token("-0"), Some(Variable::Dict("-0")));
        assert_eq!(
            classify_token("99999999999999999999"),
            Some(Variable::Dict("99999999999999999999"))
        );
    }

    #[test]
    fn test_classify_floats() {
        for token in ["0.5", "3.14", "-12.500", "100.", ".25", "-0.0"] {
            match classify_token(token) {
                Some(Variable::Float(f)) => assert_eq!(f.decode(), token),
                other => panic!("{token} classified as {other:?}"),
            }
        }
    }

    #[test]
    fn test_oversized_float_falls_back_to_dictionary() {
        let token = "3.14159265358979323846";
        assert_eq!(classify_token(token), Some(Variable::Dict(token)));
    }

    #[test]
    fn test_multi_dot_numeric_is_dictionary() {
        assert_eq!(classify_token("1.2.3"), Some(Variable::Dict("1.2.3")));
        assert_eq!(
            classify_token("192.168.4.5"),
            Some(Variable::Dict("192.168.4.5"))
        );
    }

    // ---------------------------------------------------------------
    // Float packing
    // ---------------------------------------------------------------

    #[test]
    fn test_float_round_trip_preserves_zeros() {
        for token in [
            "0.0",
            "0.500",
            "000.1",
            "-0.001",
            "1234567890.123456",
            "9999999999999.999",
            ".5",
            "5.",
        ] {
            let packed = EncodedFloat::encode(token).unwrap();
            assert_eq!(packed.decode(), token, "token {token}");
            // And through the raw u64 representation used on disk
            assert_eq!(EncodedFloat::from_u64(packed.as_u64()).decode(), token);
        }
    }

    #[test]
    fn test_float_rejects_non_floats() {
        for token in ["1", "-1", "1.2.3", ".", "-.", "1,5", "abc", ""] {
            assert!(EncodedFloat::encode(token).is_none(), "token {token}");
        }
    }

    // ---------------------------------------------------------------
    // Message parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_message_static_only() {
        let parsed = parse_message(" opened connection to peer\n");
        assert_eq!(parsed.template, b" opened connection to peer\n".to_vec());
        assert!(parsed.variables.is_empty());
    }

    #[test]
    fn test_parse_message_mixed_variables() {
        let parsed = parse_message(" task task_12 finished in 3.5 seconds with code 0\n");
        assert_eq!(
            parsed.variables,
            vec![
                Variable::Dict("task_12"),
                Variable::Float(EncodedFloat::encode("3.5").unwrap()),
                Variable::Int(0),
            ]
        );

        let mut expected = Vec::new();
        expected.extend_from_slice(b" task ");
        expected.push(DICT_VAR_PLACEHOLDER);
        expected.extend_from_slice(b" finished in ");
        expected.push(FLOAT_VAR_PLACEHOLDER);
        expected.extend_from_slice(b" seconds with code ");
        expected.push(INT_VAR_PLACEHOLDER);
        expected.push(b'\n');
        assert_eq!(parsed.template, expected);
    }

    #[test]
    fn test_parse_message_preserves_whitespace_runs() {
        let parsed = parse_message("a  b\t\tc 1");
        let mut expected = Vec::new();
        expected.extend_from_slice(b"a  b\t\tc ");
        expected.push(INT_VAR_PLACEHOLDER);
        assert_eq!(parsed.template, expected);
        assert_eq!(parsed.variables, vec![Variable::Int(1)]);
    }

    #[test]
    fn test_placeholder_order_matches_variable_order() {
        let parsed = parse_message(" 1 a1 2.5 b2 3");
        let placeholder_kinds: Vec<_> = template_pieces(&parsed.template)
            .filter_map(|piece| match piece {
                TemplatePiece::Placeholder(kind) => Some(kind),
                TemplatePiece::Literal(_) => None,
            })
            .collect();
        assert_eq!(
            placeholder_kinds,
            vec![
                VariableKind::Int,
                VariableKind::Dict,
                VariableKind::Float,
                VariableKind::Dict,
                VariableKind::Int,
            ]
        );
        assert_eq!(placeholder_kinds.len(), parsed.variables.len());
    }

    // ---------------------------------------------------------------
    // Template escaping
    // ---------------------------------------------------------------

    #[test]
    fn test_placeholder_bytes_in_text_are_escaped() {
        let body = format!("x{}y 5", char::from(DICT_VAR_PLACEHOLDER));
        let parsed = parse_message(&body);

        let literals: Vec<u8> = template_pieces(&parsed.template)
            .filter_map(|piece| match piece {
                TemplatePiece::Literal(c) => Some(c),
                TemplatePiece::Placeholder(_) => None,
            })
            .collect();
        assert_eq!(literals, format!("x{}y ", char::from(DICT_VAR_PLACEHOLDER)).into_bytes());

        let placeholders = template_pieces(&parsed.template)
            .filter(|piece| matches!(piece, TemplatePiece::Placeholder(_)))
            .count();
        assert_eq!(placeholders, 1);
    }

    #[test]
    fn test_escape_byte_in_text_is_escaped() {
        let body = format!("a{}b", char::from(ESCAPE_BYTE));
        let parsed = parse_message(&body);
        // Template contains the doubled escape
        assert_eq!(
            parsed.template,
            vec![b'a', ESCAPE_BYTE, ESCAPE_BYTE, b'b']
        );
        let literals: Vec<u8> = template_pieces(&parsed.template)
            .filter_map(|piece| match piece {
                TemplatePiece::Literal(c) => Some(c),
                TemplatePiece::Placeholder(_) => None,
            })
            .collect();
        assert_eq!(literals, body.into_bytes());
    }

    #[test]
    fn test_identical_bodies_produce_identical_templates() {
        let a = parse_message(" connected to host_1 on port 80\n");
        let b = parse_message(" connected to host_2 on port 443\n");
        assert_eq!(a.template, b.template);
        assert_ne!(a.variables, b.variables);
    }
}

//! Utility functions for bit strings and voltage statistics.
//!
//! This module contains helper functions for:
//! - Converting between bit vectors and their text forms (binary and hex).
//! - Estimating the noise floor of a single channel.
//!
//! Bit vectors are always most-significant bit first.

use crate::core::errors::DecodeError;
use std::collections::HashMap;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Parses a string of `'0'`/`'1'` characters into bits.
pub fn parse_bits(text: &str) -> Result<Vec<bool>, DecodeError> {
    text.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(DecodeError::InvalidBit(other)),
        })
        .collect()
}

/// Renders bits as a `'0'`/`'1'` string.
pub fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

/// Encodes bits as lowercase hex.
///
/// The result has `ceil(len / 4)` digits, left-padded with `'0'` up to
/// `min_width`. A bit count that is not a multiple of 4 is treated as a number,
/// so the missing high bits of the first digit are zero.
pub fn to_hex(bits: &[bool], min_width: usize) -> String {
    let pad = (4 - bits.len() % 4) % 4;
    let digits = (bits.len() + pad) / 4;

    let mut out = String::with_capacity(digits.max(min_width));
    for _ in digits..min_width {
        out.push('0');
    }

    let padded = std::iter::repeat_n(false, pad).chain(bits.iter().copied());
    let mut nibble = 0usize;
    for (i, bit) in padded.enumerate() {
        nibble = (nibble << 1) | bit as usize;
        if i % 4 == 3 {
            out.push(HEX_DIGITS[nibble] as char);
            nibble = 0;
        }
    }
    out
}

/// Decodes hex text into 4 bits per digit. Accepts an optional `0x` prefix
/// and either case.
pub fn from_hex(text: &str) -> Result<Vec<bool>, DecodeError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    let mut bits = Vec::with_capacity(digits.len() * 4);
    for c in digits.chars() {
        let value = c.to_digit(16).ok_or(DecodeError::InvalidHex(c))?;
        for shift in (0..4).rev() {
            bits.push((value >> shift) & 1 == 1);
        }
    }
    Ok(bits)
}

/// Guesses the noise floor of a channel as its most frequent value.
///
/// Values are quantized to multiples of `quantum` before counting; a `quantum`
/// that is not a positive finite number counts exact values instead. Ties go
/// to the lower value. Returns `0.0` for an empty channel.
pub fn noise_floor<I>(values: I, quantum: f64) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for v in values {
        let q = quantize(v, quantum);
        counts.entry(q.to_bits()).or_insert((q, 0)).1 += 1;
    }

    counts
        .into_values()
        .max_by(|(va, ca), (vb, cb)| ca.cmp(cb).then(vb.total_cmp(va)))
        .map(|(value, _)| value)
        .unwrap_or(0.0)
}

fn quantize(value: f64, quantum: f64) -> f64 {
    if quantum.is_finite() && quantum > 0.0 {
        // + 0.0 folds -0.0 into the same bucket as 0.0
        (value / quantum).round() * quantum + 0.0
    } else {
        value + 0.0
    }
}

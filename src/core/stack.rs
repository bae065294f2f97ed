//! Stack elements and script-number conversions.

use std::fmt;

/// Default maximum operand size for arithmetic opcodes.
pub const MAX_SCRIPT_NUM_LEN: usize = 4;

/// A stack item (byte vector) from script execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StackItem(pub Vec<u8>);

impl StackItem {
    /// Script truthiness: any zero encoding, including negative zero, is false.
    pub fn as_bool(&self) -> bool {
        match self.0.split_last() {
            None => false,
            Some((&last, rest)) => rest.iter().any(|&b| b != 0) || (last & 0x7f) != 0,
        }
    }

    /// Interpret as a script number (little-endian, sign-magnitude).
    ///
    /// Returns `None` if the encoding is longer than `max_len` bytes.
    pub fn as_script_num(&self, max_len: usize) -> Option<i64> {
        let bytes = &self.0;
        if bytes.len() > max_len {
            return None;
        }
        let Some(&last) = bytes.last() else {
            return Some(0);
        };

        let mut result: i64 = 0;
        for (i, &byte) in bytes.iter().enumerate() {
            result |= (byte as i64) << (8 * i);
        }
        if last & 0x80 != 0 {
            result &= !(0x80i64 << (8 * (bytes.len() - 1)));
            result = -result;
        }
        Some(result)
    }

    /// Whether the item is the minimal encoding of its script number.
    pub fn is_minimal_num(&self) -> bool {
        match self.0.as_slice() {
            [] => true,
            [.., last] if last & 0x7f != 0 => true,
            [_] => false,
            [.., prev, _] => prev & 0x80 != 0,
        }
    }

    /// Minimal script-number encoding of `n`.
    pub fn from_script_num(n: i64) -> StackItem {
        if n == 0 {
            return StackItem(vec![]);
        }
        let negative = n < 0;
        let mut abs = n.unsigned_abs();
        let mut out = Vec::with_capacity(9);
        while abs > 0 {
            out.push((abs & 0xff) as u8);
            abs >>= 8;
        }
        // The sign lives in the top bit of the last byte; add a byte if it is taken.
        let last = out.len() - 1;
        if out[last] & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            out[last] |= 0x80;
        }
        StackItem(out)
    }

    /// `[0x01]` for true, empty for false.
    pub fn from_bool(b: bool) -> StackItem {
        if b {
            StackItem(vec![1])
        } else {
            StackItem(vec![])
        }
    }

    /// Lowercase hex, empty string for an empty item.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for StackItem {
    fn from(bytes: Vec<u8>) -> Self {
        StackItem(bytes)
    }
}

impl From<&[u8]> for StackItem {
    fn from(bytes: &[u8]) -> Self {
        StackItem(bytes.to_vec())
    }
}

impl fmt::Display for StackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<>")
        } else {
            f.write_str(&self.to_hex())
        }
    }
}

// ─── Script numbers ─────────────────────────────────────────────────────────

/// Longest script number [`decode_script_num`] accepts.
pub const MAX_DECODED_NUM_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptNumError {
    #[error("'{0}' is not a decimal or 0x-prefixed hex number")]
    Number(String),
    #[error("'{0}' is not valid hex")]
    Hex(String),
    #[error("'{0}' is not a minimally encoded script number")]
    NonMinimal(String),
    #[error("script number of {0} bytes is too long")]
    TooLong(usize),
}

/// Minimal script-number bytes of `value`, written in decimal or as
/// `0x`-prefixed hex, with an optional leading `-`.
pub fn encode_script_num(value: &str) -> Result<StackItem, ScriptNumError> {
    let invalid = || ScriptNumError::Number(value.to_string());
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let (radix, body) = match digits.strip_prefix("0x") {
        Some(hex) => (16, hex),
        None => (10, digits),
    };
    if body.starts_with(['-', '+']) {
        return Err(invalid());
    }
    let magnitude = i64::from_str_radix(body, radix).map_err(|_| invalid())?;
    Ok(StackItem::from_script_num(if negative { -magnitude } else { magnitude }))
}

/// Value of the minimally encoded script number in `hex`.
pub fn decode_script_num(hex: &str) -> Result<i64, ScriptNumError> {
    let item = StackItem(hex::decode(hex).map_err(|_| ScriptNumError::Hex(hex.to_string()))?);
    if !item.is_minimal_num() {
        return Err(ScriptNumError::NonMinimal(hex.to_string()));
    }
    item.as_script_num(MAX_DECODED_NUM_LEN)
        .ok_or(ScriptNumError::TooLong(item.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        let falsy: [&[u8]; 5] = [&[], &[0x00], &[0x00, 0x00], &[0x80], &[0x00, 0x00, 0x80]];
        let truthy: [&[u8]; 4] = [&[0x01], &[0x80, 0x00], &[0x00, 0x01], &[0x81]];
        for falsy in falsy {
            assert!(!StackItem::from(falsy).as_bool(), "{:x?}", falsy);
        }
        for truthy in truthy {
            assert!(StackItem::from(truthy).as_bool(), "{:x?}", truthy);
        }
    }

    #[test]
    fn test_script_num_decoding() {
        assert_eq!(StackItem(vec![]).as_script_num(4), Some(0));
        assert_eq!(StackItem(vec![0x7f]).as_script_num(4), Some(127));
        assert_eq!(StackItem(vec![0x80, 0x00]).as_script_num(4), Some(128));
        assert_eq!(StackItem(vec![0x81]).as_script_num(4), Some(-1));
        assert_eq!(StackItem(vec![0x80, 0x80]).as_script_num(4), Some(-128));
        assert_eq!(StackItem(vec![1, 2, 3, 4, 5]).as_script_num(4), None);
    }

    #[test]
    fn test_script_num_encoding() {
        assert_eq!(StackItem::from_script_num(0), StackItem(vec![]));
        assert_eq!(StackItem::from_script_num(1), StackItem(vec![0x01]));
        assert_eq!(StackItem::from_script_num(-1), StackItem(vec![0x81]));
        assert_eq!(StackItem::from_script_num(127), StackItem(vec![0x7f]));
        assert_eq!(StackItem::from_script_num(128), StackItem(vec![0x80, 0x00]));
        assert_eq!(StackItem::from_script_num(-128), StackItem(vec![0x80, 0x80]));
        assert_eq!(StackItem::from_script_num(256), StackItem(vec![0x00, 0x01]));
        for n in [-70_000i64, -255, -1, 0, 5, 255, 32_768, 2_147_483_647] {
            let item = StackItem::from_script_num(n);
            assert!(item.is_minimal_num());
            assert_eq!(item.as_script_num(8), Some(n));
        }
    }

    #[test]
    fn test_minimal_num() {
        assert!(!StackItem(vec![0x00]).is_minimal_num());
        assert!(!StackItem(vec![0x80]).is_minimal_num());
        assert!(!StackItem(vec![0x01, 0x00]).is_minimal_num());
        assert!(StackItem(vec![0x80, 0x00]).is_minimal_num());
    }

    #[test]
    fn test_display() {
        assert_eq!(StackItem(vec![]).to_string(), "<>");
        assert_eq!(StackItem(vec![0xab, 0xcd]).to_string(), "abcd");
    }

    #[test]
    fn test_encode_script_num_text() {
        assert_eq!(encode_script_num("0").unwrap(), StackItem(vec![]));
        assert_eq!(encode_script_num("1000").unwrap().to_hex(), "e803");
        assert_eq!(encode_script_num("0xff").unwrap().to_hex(), "ff00");
        assert_eq!(encode_script_num("-0x80").unwrap().to_hex(), "8080");
        assert_eq!(encode_script_num("-5").unwrap().to_hex(), "85");
        for bad in ["", "ten", "0x", "--1", "-+1", "0x-5", "0xgg", "99999999999999999999"] {
            assert_eq!(
                encode_script_num(bad),
                Err(ScriptNumError::Number(bad.to_string())),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_decode_script_num_text() {
        assert_eq!(decode_script_num(""), Ok(0));
        assert_eq!(decode_script_num("e803"), Ok(1000));
        assert_eq!(decode_script_num("8080"), Ok(-128));
        assert_eq!(decode_script_num("ffffffffffffff7f"), Ok(i64::MAX));
        assert_eq!(
            decode_script_num("0100"),
            Err(ScriptNumError::NonMinimal("0100".to_string()))
        );
        assert_eq!(decode_script_num("zz"), Err(ScriptNumError::Hex("zz".to_string())));
        assert_eq!(
            decode_script_num("010203040506070809"),
            Err(ScriptNumError::TooLong(9))
        );
    }
}

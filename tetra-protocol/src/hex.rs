/// Default share of printable characters above which a payload is read as text.
pub const DEFAULT_TEXT_THRESHOLD: f64 = 0.8;

/// Returns `true` if `s` is non-empty and consists only of hex digits.
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Slice `hex` by byte offsets (two hex characters per byte).
///
/// Returns `None` if the slice would run past the end of the string.
pub fn byte_field(hex: &str, start: usize, end: usize) -> Option<&str> {
    hex.get(start * 2..end * 2)
}

/// Decode a single byte from exactly two hex characters.
pub fn parse_u8(hex: &str) -> Option<u8> {
    if hex.len() != 2 || !is_hex(hex) {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Decode a 16-bit field transmitted low byte first.
///
/// `"7D00"` decodes to `0x007D`.
pub fn parse_swapped_u16(hex: &str) -> Option<u16> {
    if hex.len() != 4 || !is_hex(hex) {
        return None;
    }
    let value = u16::from_str_radix(hex, 16).ok()?;
    Some(value.swap_bytes())
}

/// Decode a little-endian two's-complement 32-bit value from exactly 8 hex characters.
///
/// `"48642103"` decodes to `0x03216448`.
pub fn parse_le_i32(hex: &str) -> Option<i32> {
    if hex.len() != 8 || !is_hex(hex) {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    Some(value.swap_bytes() as i32)
}

/// Encode a 32-bit value as 8 hex characters, least-significant byte first.
pub fn encode_le_i32(value: i32) -> String {
    value
        .to_le_bytes()
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect()
}

/// Decode a big-endian two's-complement 24-bit value from exactly 6 hex characters.
pub fn parse_i24(hex: &str) -> Option<i32> {
    if hex.len() != 6 || !is_hex(hex) {
        return None;
    }
    let raw = i32::from_str_radix(hex, 16).ok()?;
    if raw & 0x80_0000 != 0 {
        Some(raw - 0x100_0000)
    } else {
        Some(raw)
    }
}

/// Decode a hex string into text, one character per byte (ISO 8859-1).
///
/// A trailing odd nibble is decoded as a byte on its own. Pairs that are not
/// valid hex are skipped.
pub fn hex_to_text(hex: &str) -> String {
    hex.as_bytes()
        .chunks(2)
        .filter_map(|pair| std::str::from_utf8(pair).ok())
        .filter_map(|pair| u8::from_str_radix(pair, 16).ok())
        .map(char::from)
        .collect()
}

/// Encode text as uppercase hex, one byte per character.
///
/// Characters outside ISO 8859-1 are sent as `?`.
pub fn text_to_hex(text: &str) -> String {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .map(|b| format!("{b:02X}"))
        .collect()
}

/// Share of characters in `text` that are printable ASCII (0x20–0x7E).
///
/// Returns `None` for empty text.
pub fn printable_ratio(text: &str) -> Option<f64> {
    let total = text.chars().count();
    if total == 0 {
        return None;
    }
    let printable = text.chars().filter(|c| (' '..='~').contains(c)).count();
    Some(printable as f64 / total as f64)
}

/// Returns `true` if the decoded form of `hex` is mostly printable.
pub fn is_likely_text(hex: &str, threshold: f64) -> bool {
    printable_ratio(&hex_to_text(hex)).is_some_and(|ratio| ratio > threshold)
}

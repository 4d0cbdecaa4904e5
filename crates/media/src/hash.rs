/// Sentinel used whenever a definition carries no dictionary name.
pub const UNKNOWN_DICTIONARY: &str = "unknown";

pub fn dictionary_name_or_unknown(name: Option<&str>) -> &str {
    match name {
        Some(name) if !name.is_empty() => name,
        _ => UNKNOWN_DICTIONARY,
    }
}

/// Namespace a dictionary name for placeholder tokens.
///
/// Rolling `acc * 31 + unit` over UTF-16 code units in wrapping 32-bit signed
/// arithmetic, rendered as base-36 of the magnitude.  The output alphabet is
/// `[0-9a-z]`, so it never contains the `_` that separates token parts.
pub fn dictionary_hash(name: &str) -> String {
    let name = dictionary_name_or_unknown(Some(name));
    let mut acc: i32 = 0;
    for unit in name.encode_utf16() {
        acc = acc
            .wrapping_shl(5)
            .wrapping_sub(acc)
            .wrapping_add(i32::from(unit));
    }
    to_base36(acc.unsigned_abs())
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

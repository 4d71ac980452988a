//! Token digest and timing-safe comparison.

/// Expected token: 32-char lowercase hex MD5 over the concatenation of the
/// four signing inputs, in this exact order.
pub fn compute_token(app_key: &str, app_secret: &str, time: &str, random: &str) -> String {
    let input = format!("{app_key}{app_secret}{time}{random}");
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Constant-time equality over byte strings.
///
/// Visits `max(a.len(), b.len())` positions unconditionally and folds the
/// length difference into the accumulator, so neither a length mismatch nor
/// an early differing byte shortens the comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

//! Normalized Indel string similarity, scored 0 to 100.
//!
//! `ratio` compares two whole strings. `partial_ratio` slides the shorter
//! string across the longer one and keeps the best window, so a keyword
//! scores 100 against any text that contains it.

/// Longest common subsequence length, by characters.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diagonal = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    row[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

/// Similarity of two whole strings: `100 * 2 * LCS / (len(a) + len(b))`.
///
/// ```
/// assert_eq!(vedarag::fuzzy::ratio("pitta", "pitta"), 100.0);
/// assert_eq!(vedarag::fuzzy::ratio("abcd", "wxyz"), 0.0);
/// ```
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best [`ratio`] of the shorter string against any window of the longer
/// one, including windows that hang off either end.
///
/// Returns 0 when either string is empty.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (needle, haystack) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if needle.is_empty() {
        return 0.0;
    }

    let m = needle.len();
    let n = haystack.len();
    let mut best: f64 = 0.0;
    // Windows end anywhere from the first haystack character to m-1
    // characters past the last, clipped to the haystack.
    for end in 1..(n + m) {
        let window = &haystack[end.saturating_sub(m)..end.min(n)];
        best = best.max(ratio_chars(&needle, window));
        if best >= 100.0 {
            break;
        }
    }
    best
}

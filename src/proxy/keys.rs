//! Key namespacing.
//!
//! Every key the proxy touches lives under its configured prefix. A key that
//! already carries the prefix is used as-is.

use std::borrow::Cow;

/// Maps a logical key to its physical key.
#[inline]
pub fn namespaced<'a>(prefix: &str, key: &'a str) -> Cow<'a, str> {
    if key.starts_with(prefix) {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(format!("{}{}", prefix, key))
    }
}

/// Scan pattern matching every key under `prefix`, with glob
/// metacharacters in the prefix escaped.
pub fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

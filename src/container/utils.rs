use super::CONTAINER_ID_LEN;

/// Checks whether all bytes in the given slice are lowercase hexadecimal ASCII characters.
///
/// Returns `true` for `'0'..='9'` and `'a'..='f'` only. Uppercase letters are rejected
/// since Docker always reports IDs in lowercase.
fn is_lowercase_hex(src: &[u8]) -> bool {
    src.iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

/// Returns `true` if `src` looks like a full-length Docker container ID.
///
/// # Examples
///
/// ```
/// # use docker_metadata::container::is_container_id;
/// assert!(is_container_id(&"a1".repeat(32)));
/// assert!(!is_container_id("web1"));
/// ```
pub fn is_container_id(src: &str) -> bool {
    src.len() == CONTAINER_ID_LEN && is_lowercase_hex(src.as_bytes())
}

/// Charset check shared by process and task guids: `[A-Za-z0-9_-]+`.
pub(crate) fn is_valid_guid(guid: &str) -> bool {
    !guid.is_empty() && guid.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_word_characters() {
        assert!(is_valid_guid("process-guid_01"));
        assert!(is_valid_guid("A"));
    }

    #[test]
    fn rejects_empty_and_punctuation() {
        assert!(!is_valid_guid(""));
        assert!(!is_valid_guid("has/slash"));
        assert!(!is_valid_guid("has.dot"));
        assert!(!is_valid_guid("has space"));
    }
}

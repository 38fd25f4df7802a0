use uuid::Uuid;

/// Longest accepted room identifier, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Generate a fresh 8-character room identifier (lowercase hex).
pub fn generate_room_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Room identifiers are opaque tokens: non-empty, bounded, no control chars.
pub fn is_valid_room_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ROOM_ID_LEN && !id.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        for _ in 0..100 {
            let id = generate_room_id();
            assert_eq!(id.len(), 8);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(is_valid_room_id(&id), "Invalid room id: {id}");
        }
    }

    #[test]
    fn rejects_empty_long_and_control() {
        assert!(!is_valid_room_id(""));
        assert!(!is_valid_room_id(&"x".repeat(MAX_ROOM_ID_LEN + 1)));
        assert!(!is_valid_room_id("abc\n123"));
        assert!(is_valid_room_id("abcd1234"));
        assert!(is_valid_room_id("kitchen table"));
    }
}

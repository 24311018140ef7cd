//! Identifier generation

use uuid::Uuid;

/// Length of the random part of generated ids
const ID_SUFFIX_LEN: usize = 9;

/// Generate a stream id, e.g. `stream_3f9a0b1c2`
pub fn generate_stream_id() -> String {
    format!("stream_{}", random_suffix())
}

/// Generate a room id, e.g. `room_8e21d4a90`
pub fn generate_room_id() -> String {
    format!("room_{}", random_suffix())
}

fn random_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(ID_SUFFIX_LEN);
    suffix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_shape() {
        let id = generate_stream_id();
        let suffix = id.strip_prefix("stream_").unwrap();

        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_ids_differ() {
        assert_ne!(generate_stream_id(), generate_stream_id());
        assert!(generate_room_id().starts_with("room_"));
    }
}

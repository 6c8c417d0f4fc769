//! Composite identifiers built from a file name and its path.
//!
//! The store has no notion of a two-column primary key, so each record is
//! addressed by a single string joining both parts with [`KEY_SEPARATOR`].

/// Separator between the file name and the file path inside a composite key.
pub const KEY_SEPARATOR: char = '|';

/// Build the composite key for a `(file_name, file_path)` pair.
#[inline]
pub fn make_key(file_name: &str, file_path: &str) -> String {
    let mut key = String::with_capacity(file_name.len() + file_path.len() + 1);
    key.push_str(file_name);
    key.push(KEY_SEPARATOR);
    key.push_str(file_path);
    key
}

/// Recover `(file_name, file_path)` from a composite key.
///
/// Splits on the first separator only, so a path containing the separator
/// survives intact. A key without any separator yields an empty path.
#[inline]
pub fn split_key(key: &str) -> (String, String) {
    match key.split_once(KEY_SEPARATOR) {
        Some((file_name, file_path)) => (file_name.to_string(), file_path.to_string()),
        None => (key.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let pairs = [
            ("cat.jpg", "/data/pets/cat.jpg"),
            ("", "/data/empty-name"),
            ("orphan.png", ""),
            ("", ""),
            ("spaces in name.jpeg", "/srv/a b/spaces in name.jpeg"),
        ];

        for (file_name, file_path) in pairs {
            let key = make_key(file_name, file_path);
            assert_eq!(
                split_key(&key),
                (file_name.to_string(), file_path.to_string())
            );
        }
    }

    #[test]
    fn key_layout() {
        assert_eq!(make_key("a.jpg", "/x/a.jpg"), "a.jpg|/x/a.jpg");
    }

    #[test]
    fn split_without_separator() {
        assert_eq!(
            split_key("lonely.jpg"),
            ("lonely.jpg".to_string(), String::new())
        );
    }

    #[test]
    fn split_only_on_first_separator() {
        assert_eq!(
            split_key("a.jpg|/odd|dir/a.jpg"),
            ("a.jpg".to_string(), "/odd|dir/a.jpg".to_string())
        );
    }
}

//! Brace-balance recovery for payloads with trailing garbage.
//!
//! Some peers miscount the declared frame length or pad the payload after
//! the closing brace. The scan here finds where the top-level object that
//! opens the text actually ends so the remainder can be cut off before a
//! second parse attempt.
//!
//! The counter is purely lexical: braces inside JSON strings are counted
//! like any other brace.

/// Return the byte offset just past the last `}` that closes the brace
/// expression opened by the first byte of `text`.
///
/// A closing brace is a candidate only if the running depth returns to
/// exactly zero there. The scan stops as soon as the depth would go
/// negative, so stray closing braces after the object never extend it.
///
/// Returns `None` when `text` does not start with `{` or the expression
/// never balances.
pub fn balanced_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'{') {
        return None;
    }

    let mut depth: usize = 0;
    let mut end = None;

    for (i, &byte) in bytes.iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    end = Some(i + 1);
                }
            }
            _ => {}
        }
    }

    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_object() {
        let text = r#"{"command":"ping"}"#;
        assert_eq!(balanced_end(text), Some(text.len()));
    }

    #[test]
    fn test_trailing_garbage() {
        let text = r#"{"command":"ping","params":{}}garbage"#;
        assert_eq!(balanced_end(text), Some(text.len() - "garbage".len()));
    }

    #[test]
    fn test_stray_close_stops_scan() {
        let text = r#"{"a":{"b":1}}}{}"#;
        assert_eq!(balanced_end(text), Some(13));
    }

    #[test]
    fn test_last_balanced_close_wins() {
        let text = r#"{"a":1} {"b":2} x"#;
        assert_eq!(balanced_end(text), Some(15));
    }

    #[test]
    fn test_unbalanced() {
        assert_eq!(balanced_end(r#"{"a":1"#), None);
        assert_eq!(balanced_end(r#"{"a":{"b":1}"#), None);
    }

    #[test]
    fn test_must_open_at_start() {
        assert_eq!(balanced_end(r#"x{"a":1}"#), None);
        assert_eq!(balanced_end(""), None);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundary() {
        let text = "{\"name\":\"caf\u{e9}\"}\u{fffd}\u{fffd}";
        let end = balanced_end(text).unwrap();
        assert!(text.is_char_boundary(end));
        assert_eq!(&text[..end], "{\"name\":\"caf\u{e9}\"}");
    }
}

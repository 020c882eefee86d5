//! Incremental UTF-8 decoding of process output.
//!
//! Pipe reads split the byte stream at arbitrary points, which can cut a multi-byte
//! character in half. `Utf8Chunker` holds back an incomplete trailing sequence until
//! the next read completes it, and replaces genuinely invalid bytes with U+FFFD.

/// Stateful decoder turning raw byte chunks into text chunks.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes`, prefixed by any bytes held back from the previous call.
    ///
    /// Returns an empty string when everything read so far is an incomplete sequence.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // `valid_up_to` guarantees this prefix is UTF-8.
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let remaining = rest.to_vec();
        self.pending = remaining;
        text
    }

    /// Flushes whatever is still held back once the stream has ended.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&tail).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_ascii_through() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(b"hello\n"), "hello\n");
        assert_eq!(chunker.finish(), "");
    }

    #[test]
    fn joins_split_multibyte_characters() {
        let bytes = "工作目录".as_bytes();
        let mut chunker = Utf8Chunker::new();
        let first = chunker.push(&bytes[..4]);
        let second = chunker.push(&bytes[4..]);
        assert_eq!(first, "工");
        assert_eq!(format!("{first}{second}"), "工作目录");
    }

    #[test]
    fn replaces_invalid_bytes() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn finish_flushes_truncated_tail() {
        let mut chunker = Utf8Chunker::new();
        assert_eq!(chunker.push(&[b'x', 0xe5, 0xb7]), "x");
        assert_eq!(chunker.finish(), "\u{fffd}");
    }
}

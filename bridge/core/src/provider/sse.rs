//! Server-sent events line decoding
//!
//! Both backends stream `text/event-stream` bodies where each event carries
//! one JSON document on a `data:` line. Bytes are buffered until a full line
//! is available so multi-byte characters split across network reads decode
//! correctly.

/// Incremental `data:` line extractor
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes and return the payload of every completed `data:` line
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(data) = parse_line(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that never got its newline
    pub(crate) fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_lines_only() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(b": keep-alive\nevent: message\ndata: {\"a\":1}\n\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_split_across_reads() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"text\":\"hel").is_empty());
        let out = decoder.push(b"lo\"}\r\ndata: [DONE]\n");
        assert_eq!(out, vec!["{\"text\":\"hello\"}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_multibyte_split() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: é\n".as_bytes();
        // Split inside the two-byte 'é'.
        assert!(decoder.push(&bytes[..7]).is_empty());
        assert_eq!(decoder.push(&bytes[7..]), vec!["é".to_string()]);
    }

    #[test]
    fn test_finish_flushes_trailing_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }
}

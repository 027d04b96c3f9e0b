//! Splits a per-connection byte stream into newline-delimited messages.
//!
//! EOL is any run of `\n`/`\r` bytes; consecutive EOLs collapse so empty
//! messages are never emitted. Bytes after the last EOL are retained across
//! calls to `feed`.

#[derive(Default)]
pub struct LineFramer {
    accumulator: Vec<u8>,
}

fn is_eol(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the internal accumulator and returns every
    /// complete message extracted from it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.accumulator.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < self.accumulator.len() {
            if is_eol(self.accumulator[i]) {
                if i > start {
                    messages.push(String::from_utf8_lossy(&self.accumulator[start..i]).into_owned());
                }
                while i < self.accumulator.len() && is_eol(self.accumulator[i]) {
                    i += 1;
                }
                start = i;
            } else {
                i += 1;
            }
        }

        self.accumulator.drain(..start);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_a_single_complete_line() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"hello\n"), vec!["hello"]);
    }

    #[test]
    fn retains_a_partial_line_across_feeds() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"hel").is_empty());
        assert_eq!(framer.feed(b"lo\n"), vec!["hello"]);
    }

    #[test]
    fn collapses_consecutive_eols_without_emitting_empty_messages() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"a\r\n\r\nb\n"), vec!["a", "b"]);
    }

    #[test]
    fn extracts_every_message_from_a_batched_chunk() {
        let mut framer = LineFramer::new();
        assert_eq!(
            framer.feed(b"idclient_id\norder1234 BTCUSDT+001000010000\n"),
            vec!["idclient_id", "order1234 BTCUSDT+001000010000"]
        );
    }

    #[test]
    fn never_blocks_on_a_chunk_with_no_eol() {
        let mut framer = LineFramer::new();
        assert!(framer.feed(b"no newline here").is_empty());
    }

    #[test]
    fn mixed_cr_lf_runs_count_as_one_eol() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.feed(b"a\r\r\n\nb\n"), vec!["a", "b"]);
    }
}

//! Framed-block parsing for the manager protocol
//!
//! The manager interface speaks CRLF-terminated `Key: Value` lines grouped
//! into blocks separated by a blank line. A block is either a response to an
//! action, one event of an event sequence, or an asynchronous notification.
//! Lines without a key/value separator (the connect banner, stray output)
//! are ignored rather than treated as errors.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One parsed protocol block: an ordered list of `(key, value)` fields.
///
/// Field order is preserved because `Command` responses repeat the same
/// `Output` key once per payload line.
#[derive(Debug, Clone, Default)]
pub struct Block {
    fields: Vec<(String, String)>,
}

impl Block {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Parse a block from its raw text (test and tooling convenience).
    pub fn parse(text: &str) -> Self {
        let mut block = Block::new();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if let Some((key, value)) = line.split_once(':') {
                block.push(key.trim(), value.trim());
            }
        }
        block
    }

    pub fn push(&mut self, key: &str, value: &str) {
        self.fields.push((key.to_string(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First value for `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All values recorded for `key`, in order of appearance.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// All fields in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn event(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn response(&self) -> Option<&str> {
        self.get("Response")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("Message")
    }

    pub fn is_success(&self) -> bool {
        matches!(self.response(), Some(r) if r.eq_ignore_ascii_case("success"))
    }
}

/// Incremental block reader over a buffered byte stream.
pub struct BlockReader<R> {
    inner: R,
    line: String,
}

impl<R: AsyncBufRead + Unpin> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
        }
    }

    /// Read the next complete block, or `None` at end of stream.
    ///
    /// A block accumulated when the stream ends without a terminating blank
    /// line is still returned; the peer is unreliable and partial data is
    /// accepted throughout.
    pub async fn read_block(&mut self) -> std::io::Result<Option<Block>> {
        let mut block = Block::new();
        loop {
            self.line.clear();
            let n = self.inner.read_line(&mut self.line).await?;
            if n == 0 {
                return Ok(if block.is_empty() { None } else { Some(block) });
            }
            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if block.is_empty() {
                    continue;
                }
                return Ok(Some(block));
            }
            if let Some((key, value)) = line.split_once(':') {
                block.push(key.trim(), value.trim());
            }
            // Separator-less lines (banner, command noise) are ignored.
        }
    }
}

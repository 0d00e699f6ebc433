//! Common streaming infrastructure for LLM providers
//!
//! Every vendor in this crate speaks some flavour of Server-Sent Events. The
//! pieces here turn raw transport chunks into lines, classify the lines, and
//! hand data payloads to a protocol-specific parser. The result is one lazy
//! stream of text fragments, whatever the vendor.

use crate::error::{Result, TutorError};
use crate::llm::FragmentStream;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Response;
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Source of raw response chunks (live HTTP body or in-memory bytes)
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Real HTTP response chunk stream
pub struct HttpChunkStream {
    response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(TutorError::Network(format!("HTTP chunk error: {e}"))),
        }
    }
}

/// Pre-recorded chunks, replayed in order.
pub struct StaticChunkStream {
    chunks: VecDeque<Vec<u8>>,
}

impl StaticChunkStream {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ChunkStream for StaticChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}

/// Reassembles lines that may be split across transport chunks.
///
/// Bytes are buffered until a newline arrives so multi-byte characters cut
/// by a chunk boundary decode correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<String> {
        let newline_pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the transport closed without a final newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    /// Blank separators, `:` heartbeats, `event:`/`id:`/`retry:` fields.
    Ignored,
}

pub fn classify_sse_line(line: &str) -> SseLine<'_> {
    match line.strip_prefix("data:") {
        Some(data) => {
            let data = data.trim();
            if data == "[DONE]" {
                SseLine::Done
            } else if data.is_empty() {
                SseLine::Ignored
            } else {
                SseLine::Data(data)
            }
        }
        None => SseLine::Ignored,
    }
}

/// Protocol-specific extraction of a text delta from one SSE data payload.
pub trait SseFragmentParser: Send + 'static {
    fn provider_name(&self) -> &str;

    /// `Ok(None)` when the payload is valid but carries no text.
    fn parse_payload(&self, payload: &str) -> serde_json::Result<Option<String>>;
}

struct FragmentState<C, P> {
    chunks: C,
    parser: P,
    lines: LineBuffer,
    pending: VecDeque<String>,
    finished: bool,
}

impl<C: ChunkStream, P: SseFragmentParser> FragmentState<C, P> {
    async fn next_fragment(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Ok(Some(fragment));
            }
            if self.finished {
                return Ok(None);
            }

            match self.chunks.next_chunk().await? {
                Some(chunk) => {
                    self.lines.push(&chunk);
                    while let Some(line) = self.lines.next_line() {
                        if self.handle_line(&line) {
                            self.finished = true;
                            break;
                        }
                    }
                }
                None => {
                    if let Some(rest) = self.lines.take_remainder() {
                        self.handle_line(&rest);
                    }
                    self.finished = true;
                }
            }
        }
    }

    /// Returns true once the end-of-stream marker was seen.
    fn handle_line(&mut self, line: &str) -> bool {
        trace!("{} stream line: {}", self.parser.provider_name(), line);
        match classify_sse_line(line) {
            SseLine::Done => true,
            SseLine::Ignored => false,
            SseLine::Data(payload) => {
                match self.parser.parse_payload(payload) {
                    Ok(Some(text)) if !text.is_empty() => self.pending.push_back(text),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "Skipping malformed {} stream line ({}): {}",
                            self.parser.provider_name(),
                            e,
                            payload
                        );
                    }
                }
                false
            }
        }
    }
}

/// Turn a chunk source into a lazy stream of text fragments.
///
/// Fragments are yielded in arrival order. A transport error is yielded once
/// and ends the stream.
pub fn fragment_stream<C, P>(chunks: C, parser: P) -> FragmentStream
where
    C: ChunkStream + 'static,
    P: SseFragmentParser,
{
    let state = FragmentState {
        chunks,
        parser,
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        match state.next_fragment().await {
            Ok(Some(fragment)) => Some((Ok(fragment), state)),
            Ok(None) => None,
            Err(e) => {
                state.finished = true;
                state.pending.clear();
                Some((Err(e), state))
            }
        }
    })
    .boxed()
}

/// Drain a fragment stream into one string.
pub async fn collect_fragments(mut fragments: FragmentStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = fragments.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

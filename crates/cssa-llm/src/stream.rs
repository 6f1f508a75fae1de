//! Line framing for streamed HTTP responses (SSE and NDJSON)

use std::collections::VecDeque;
use std::fmt::Display;

use cssa_core::{CssaError, Result};
use futures::stream::{self, Stream, StreamExt};

/// Accumulates bytes and hands out complete lines.
///
/// A line split across network chunks (or a UTF-8 character split across
/// them) is held back until its newline arrives.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk, returning every line it completes
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&line[..pos]));
        }
        lines
    }

    /// Whatever is left once the stream ends
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode(&rest))
    }
}

fn decode(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end_matches('\r').to_string()
}

struct LineState<S> {
    chunks: std::pin::Pin<Box<S>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    finished: bool,
}

/// Re-frame a byte stream into lines
pub(crate) fn lines<S, B, E>(chunks: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = LineState {
        chunks: Box::pin(chunks),
        buffer: LineBuffer::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.buffer.push(chunk.as_ref())),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(CssaError::LlmError(format!("Stream error: {e}"))), state));
                }
                None => {
                    state.finished = true;
                    state.ready.extend(state.buffer.finish());
                }
            }
        }
    })
}

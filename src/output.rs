//! Observer-side view of launches.
//!
//! The supervisor keeps no output history. Observers that want one build it from the
//! event stream: `OutputBuffer` holds the most recent chunks of one tool, `ToolRuntime`
//! pairs it with the last known status, and `Dashboard` applies events to a set of them.

use std::collections::{HashMap, VecDeque};

use strip_ansi_escapes::strip;

use crate::events::Event;
use crate::lifecycle::Status;

/// Default number of output chunks kept per tool.
pub const DEFAULT_OUTPUT_CHUNKS: usize = 500;

/// A fixed-capacity ring buffer of output chunks.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    max_chunks: usize,
    chunks: VecDeque<String>,
}

impl OutputBuffer {
    /// Creates a new `OutputBuffer` with the specified maximum capacity.
    pub fn new(max_chunks: usize) -> Self {
        Self {
            max_chunks,
            chunks: VecDeque::with_capacity(max_chunks.min(1024)),
        }
    }

    /// Adds a chunk to the buffer.
    ///
    /// Returns `true` if an old chunk was dropped to make room.
    pub fn push(&mut self, chunk: String) -> bool {
        let mut dropped = false;
        self.chunks.push_back(chunk);
        while self.chunks.len() > self.max_chunks {
            self.chunks.pop_front();
            dropped = true;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(String::as_str)
    }

    /// Concatenates the buffered chunks.
    pub fn text(&self) -> String {
        self.chunks.iter().map(String::as_str).collect()
    }
}

/// Last known state of one tool.
#[derive(Debug, Clone)]
pub struct ToolRuntime {
    pub id: String,
    pub status: Status,
    pub output: OutputBuffer,
}

impl ToolRuntime {
    pub fn new(id: impl Into<String>, max_chunks: usize) -> Self {
        Self {
            id: id.into(),
            status: Status::Stopped,
            output: OutputBuffer::new(max_chunks),
        }
    }
}

/// Runtime state of every tool an observer knows about.
#[derive(Debug, Clone)]
pub struct Dashboard {
    max_chunks: usize,
    runtimes: HashMap<String, ToolRuntime>,
}

impl Dashboard {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            max_chunks,
            runtimes: HashMap::new(),
        }
    }

    /// Full reload performed when an observer attaches: every known tool starts with
    /// an empty history and the status reported by the supervisor (`stopped` if absent).
    pub fn load<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
        statuses: &HashMap<String, Status>,
    ) {
        self.runtimes.clear();
        for id in ids {
            let mut runtime = ToolRuntime::new(id, self.max_chunks);
            runtime.status = statuses.get(id).copied().unwrap_or(Status::Stopped);
            self.runtimes.insert(id.to_string(), runtime);
        }
    }

    /// Marks `id` as starting with a fresh, empty history.
    pub fn begin_launch(&mut self, id: &str) {
        let runtime = self.runtime_mut(id);
        runtime.status = Status::Starting;
        runtime.output.clear();
    }

    /// Applies one supervisor event. Unknown ids are created on demand.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::StatusChanged { id, status } => self.runtime_mut(id).status = *status,
            Event::Output { id, text } => {
                self.runtime_mut(id).output.push(text.clone());
            }
        }
    }

    /// Status of `id`; unknown ids are `stopped`.
    pub fn status(&self, id: &str) -> Status {
        self.runtimes
            .get(id)
            .map(|runtime| runtime.status)
            .unwrap_or(Status::Stopped)
    }

    pub fn runtime(&self, id: &str) -> Option<&ToolRuntime> {
        self.runtimes.get(id)
    }

    fn runtime_mut(&mut self, id: &str) -> &mut ToolRuntime {
        let max_chunks = self.max_chunks;
        self.runtimes
            .entry(id.to_string())
            .or_insert_with(|| ToolRuntime::new(id, max_chunks))
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CHUNKS)
    }
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

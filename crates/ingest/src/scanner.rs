//! The record scanner (spec §4.1, C1): a bounded-memory byte scan that
//! locates the top-level `"nodes"` array and yields the exact byte range of
//! each array element, without decoding any element it has not yet reached.
//!
//! The source this engine was distilled from detects array entry with a
//! substring look-back (`buffer.substring(i-10, i).includes("\"nodes\"")`),
//! which misfires on any nested key sequence containing the text `nodes`.
//! This scanner tracks true structural depth instead: it only arms on the
//! literal top-level key `nodes` (spec §9 "Scanner bug (carry)").

use std::ops::Range;

use tgdb_core::TgdbError;

/// One outcome of feeding bytes to the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A complete record was found; the range is relative to the start of
    /// the overall byte stream fed to this scanner (byte 0 of the first
    /// `feed` call).
    Record(Range<usize>),
    /// The scanner hit malformed input. If the scanner was built with
    /// `continue_on_error = true`, scanning resumes after this event by
    /// resyncing to the next `{` seen between records; otherwise no
    /// further events are produced.
    Error(TgdbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expecting {
    Key,
    Colon,
    Value,
    CommaOrEnd,
}

#[derive(Debug)]
struct SeekState {
    /// Nesting depth of the envelope scanned so far; the outer object's own
    /// brace brings this to 1. Only depth 1 is meaningful for recognizing
    /// the top-level `"nodes"` key — anything deeper is skipped generically.
    depth: i64,
    in_string: bool,
    escape: bool,
    string_start: usize,
    last_key_is_nodes: bool,
    expecting: Expecting,
}

impl SeekState {
    fn new() -> Self {
        SeekState {
            depth: 0,
            in_string: false,
            escape: false,
            string_start: 0,
            last_key_is_nodes: false,
            expecting: Expecting::Key,
        }
    }
}

#[derive(Debug)]
struct RecordCtx {
    start: usize,
    depth: u32,
    in_string: bool,
    escape: bool,
}

#[derive(Debug)]
struct ArrayState {
    record: Option<RecordCtx>,
}

#[derive(Debug)]
enum Mode {
    Seeking(SeekState),
    InArray(ArrayState),
    Done,
    Failed,
}

/// A byte-fed state machine locating the top-level `"nodes"` array and
/// emitting the byte range of each of its object elements (spec §4.1).
///
/// Memory contract: at any point the scanner retains at most the bytes of
/// the record currently in flight (or, while still seeking the array, the
/// bytes of the key string under consideration) — peak heap growth is
/// `O(largest record)`, never `O(document size)`.
pub struct RecordScanner {
    mode: Mode,
    continue_on_error: bool,
    buf: Vec<u8>,
    /// Global byte offset that `buf[0]` corresponds to.
    buf_base: usize,
    /// Global byte offset of the next byte to process.
    pos: usize,
}

impl RecordScanner {
    /// Create a scanner. When `continue_on_error` is `true`, malformed
    /// records inside the array are skipped by resyncing to the next `{`
    /// rather than terminating the scan.
    pub fn new(continue_on_error: bool) -> Self {
        RecordScanner {
            mode: Mode::Seeking(SeekState::new()),
            continue_on_error,
            buf: Vec::new(),
            buf_base: 0,
            pos: 0,
        }
    }

    /// Feed the next chunk of bytes, continuing from wherever the previous
    /// call left off. Returns every [`ScanEvent`] produced while consuming
    /// this chunk (there may be more than one, or none).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ScanEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        self.run(&mut events);
        self.compact();
        events
    }

    /// Signal end of input. Reports `Malformed` if the scanner is mid
    /// string/record (unterminated input) or never found a top-level
    /// `"nodes"` array at all. Consumes the scanner.
    pub fn finish(mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        match &self.mode {
            Mode::Seeking(_) => {
                events.push(ScanEvent::Error(TgdbError::Malformed { offset: self.pos }));
            }
            Mode::InArray(arr) => {
                if let Some(rec) = &arr.record {
                    events.push(ScanEvent::Error(TgdbError::Malformed { offset: rec.start }));
                }
            }
            Mode::Done | Mode::Failed => {}
        }
        events
    }

    /// Scan an already fully-buffered input in one shot — a convenience
    /// wrapper for callers (tests, small files) that do not need the
    /// incremental `feed` API. Pure function of `bytes` and
    /// `continue_on_error`: running it twice on the same input yields the
    /// same events (spec §8 P5).
    pub fn scan_complete(bytes: &[u8], continue_on_error: bool) -> Vec<ScanEvent> {
        let mut scanner = RecordScanner::new(continue_on_error);
        let mut events = scanner.feed(bytes);
        events.extend(scanner.finish());
        events
    }

    fn local(&self, global: usize) -> usize {
        global - self.buf_base
    }

    fn run(&mut self, events: &mut Vec<ScanEvent>) {
        loop {
            let idx = self.local(self.pos);
            if idx >= self.buf.len() {
                break;
            }
            let byte = self.buf[idx];
            let pos = self.pos;
            self.pos += 1;

            match std::mem::replace(&mut self.mode, Mode::Failed) {
                Mode::Seeking(mut seek) => {
                    if let Some(new_mode) = self.step_seeking(&mut seek, byte, pos, events) {
                        self.mode = new_mode;
                    } else {
                        self.mode = Mode::Seeking(seek);
                    }
                }
                Mode::InArray(mut arr) => {
                    if let Some(new_mode) = self.step_array(&mut arr, byte, pos, events) {
                        self.mode = new_mode;
                    } else {
                        self.mode = Mode::InArray(arr);
                    }
                }
                Mode::Done => {
                    self.mode = Mode::Done;
                }
                Mode::Failed => {
                    self.mode = Mode::Failed;
                }
            }

            if matches!(self.mode, Mode::Failed) {
                break;
            }
        }
    }

    /// Advance the envelope-seeking state machine by one byte. Returns
    /// `Some(mode)` when a transition out of `Seeking` occurred (into
    /// `InArray` once `"nodes":[` is recognized, or `Failed` on a
    /// structural error), otherwise mutates `seek` in place and returns
    /// `None`.
    fn step_seeking(
        &self,
        seek: &mut SeekState,
        byte: u8,
        pos: usize,
        events: &mut Vec<ScanEvent>,
    ) -> Option<Mode> {
        if seek.in_string {
            if seek.escape {
                seek.escape = false;
            } else if byte == b'\\' {
                seek.escape = true;
            } else if byte == b'"' {
                seek.in_string = false;
                if seek.depth == 1 && seek.expecting == Expecting::Key {
                    let start = self.local(seek.string_start);
                    let end = self.local(pos);
                    seek.last_key_is_nodes = &self.buf[start..end] == b"nodes";
                    seek.expecting = Expecting::Colon;
                }
            }
            return None;
        }

        match byte {
            b'"' => {
                seek.in_string = true;
                seek.escape = false;
                seek.string_start = pos + 1;
            }
            b'{' | b'[' => {
                if seek.depth == 1
                    && seek.expecting == Expecting::Value
                    && byte == b'['
                    && seek.last_key_is_nodes
                {
                    return Some(Mode::InArray(ArrayState { record: None }));
                }
                seek.depth += 1;
                if seek.depth == 1 {
                    seek.expecting = Expecting::Key;
                } else if seek.depth == 2 && seek.expecting == Expecting::Value {
                    seek.expecting = Expecting::CommaOrEnd;
                }
            }
            b'}' | b']' => {
                seek.depth -= 1;
                if seek.depth < 0 {
                    events.push(ScanEvent::Error(TgdbError::Malformed { offset: pos }));
                    return Some(Mode::Failed);
                }
                if seek.depth == 0 {
                    // Top-level object closed without ever finding "nodes".
                    events.push(ScanEvent::Error(TgdbError::Malformed { offset: pos }));
                    return Some(Mode::Failed);
                }
                if seek.depth == 1 {
                    seek.expecting = Expecting::CommaOrEnd;
                }
            }
            b':' if seek.depth == 1 && seek.expecting == Expecting::Colon => {
                seek.expecting = Expecting::Value;
            }
            b',' if seek.depth == 1 && seek.expecting == Expecting::CommaOrEnd => {
                seek.expecting = Expecting::Key;
            }
            _ => {}
        }
        None
    }

    /// Advance the in-array state machine by one byte. Returns
    /// `Some(Mode::Done)` when the array's closing `]` is seen at depth 0,
    /// otherwise mutates `arr` in place and returns `None`. A stray byte
    /// between records reports `Malformed`; scanning continues (by simply
    /// staying in the same between-records state, which already looks for
    /// the next `{`) only when `continue_on_error` is set, otherwise it
    /// halts.
    fn step_array(
        &self,
        arr: &mut ArrayState,
        byte: u8,
        pos: usize,
        events: &mut Vec<ScanEvent>,
    ) -> Option<Mode> {
        if let Some(rec) = &mut arr.record {
            if rec.in_string {
                if rec.escape {
                    rec.escape = false;
                } else if byte == b'\\' {
                    rec.escape = true;
                } else if byte == b'"' {
                    rec.in_string = false;
                }
                return None;
            }
            match byte {
                b'"' => rec.in_string = true,
                b'{' | b'[' => rec.depth += 1,
                b'}' | b']' => {
                    rec.depth -= 1;
                    if rec.depth == 0 {
                        events.push(ScanEvent::Record(rec.start..pos + 1));
                        arr.record = None;
                    }
                }
                _ => {}
            }
            None
        } else {
            match byte {
                b'{' => {
                    arr.record = Some(RecordCtx {
                        start: pos,
                        depth: 1,
                        in_string: false,
                        escape: false,
                    });
                    None
                }
                b']' => Some(Mode::Done),
                b',' | b' ' | b'\t' | b'\n' | b'\r' => None,
                _ => {
                    events.push(ScanEvent::Error(TgdbError::Malformed { offset: pos }));
                    if self.continue_on_error {
                        None
                    } else {
                        Some(Mode::Failed)
                    }
                }
            }
        }
    }

    fn compact(&mut self) {
        let retain_from = match &self.mode {
            Mode::Seeking(seek) => {
                if seek.in_string && seek.depth == 1 && seek.expecting == Expecting::Key {
                    seek.string_start
                } else {
                    self.pos
                }
            }
            Mode::InArray(arr) => arr.record.as_ref().map(|r| r.start).unwrap_or(self.pos),
            Mode::Done | Mode::Failed => self.pos,
        };
        let drop_n = retain_from.saturating_sub(self.buf_base);
        if drop_n > 0 && drop_n <= self.buf.len() {
            self.buf.drain(0..drop_n);
            self.buf_base += drop_n;
        }
    }
}

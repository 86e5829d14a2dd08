//! Incremental JSON document writer.
//!
//! The agent produces one long-lived JSON document whose pieces are flushed
//! to the sink as they complete: the static preamble, one array element per
//! tick and the closing epilogue. Output is produced in a single pass with no
//! lookahead, so a field never knows whether it is the last one of its
//! object. Every field is therefore written with a trailing `,` and every
//! close rewrites the separator that immediately precedes it.
//!
//! Named members (sections, arrays, fields) are only valid inside an object.
//! A member written anywhere else is recorded and reported as an error by
//! the next close call.
//!
//! ```text
//! {                                   open_document
//!     "identity": {                   open_section
//!         "hostname": "db01",         string
//!         "userid": 0                 long, separator dropped by close
//!     },                              close_section
//!     "snapshots": [                  open_array
//!         {                           open_element
//!             ...
//!         },                          close_element + next open_element
//!         { ... }
//!     ]                               close_array
//! }                                   close_document
//! ```

use std::fmt::Write as _;

/// Initial buffer size.
pub const INITIAL_CAPACITY: usize = 1024 * 1024;

/// The buffer grows once more than this share of its capacity is used.
const GROWTH_THRESHOLD_PERCENT: usize = 95;

/// Kind of an open container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Document,
    Section,
    Subsection,
    Array,
    Element,
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Container::Document => "document",
            Container::Section => "section",
            Container::Subsection => "subsection",
            Container::Array => "array",
            Container::Element => "array element",
        };
        f.write_str(name)
    }
}

/// Violation of the nesting rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterError {
    /// A close call did not match the innermost open container.
    Unbalanced {
        expected: Container,
        found: Option<Container>,
    },
    /// `open_element` was called while the innermost container is not an array.
    ElementOutsideArray,
    /// A named member was written directly into an array or before the
    /// document was opened.
    MemberOutsideObject { name: String },
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterError::Unbalanced {
                expected,
                found: Some(found),
            } => write!(f, "cannot close {} while a {} is open", expected, found),
            WriterError::Unbalanced {
                expected,
                found: None,
            } => write!(f, "cannot close {}: nothing is open", expected),
            WriterError::ElementOutsideArray => write!(f, "array element opened outside an array"),
            WriterError::MemberOutsideObject { name } => {
                write!(f, "member {:?} written outside an object", name)
            }
        }
    }
}

impl std::error::Error for WriterError {}

/// Counters of everything written, reported by [`SnapshotWriter::write_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub sections: u64,
    pub subsections: u64,
    pub strings: u64,
    pub longs: u64,
    pub doubles: u64,
    pub hex: u64,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: Container,
    /// Number of elements written so far (arrays only).
    elements: u64,
}

/// Growable buffer holding the not yet flushed part of the document.
#[derive(Debug)]
pub struct SnapshotWriter {
    buf: String,
    open: Vec<Frame>,
    stats: WriterStats,
    /// First misplaced member, reported by the next close.
    misplaced: Option<WriterError>,
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            open: Vec::new(),
            stats: WriterStats::default(),
            misplaced: None,
        }
    }

    /// Bytes produced since the last [`clear`](Self::clear).
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Drops the flushed bytes. Nesting state is kept: the document spans
    /// several flushes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of currently open containers.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------

    pub fn open_document(&mut self) {
        self.ensure_capacity();
        self.indent();
        self.buf.push_str("{\n");
        self.push(Container::Document);
    }

    pub fn close_document(&mut self) -> Result<(), WriterError> {
        self.close_trailing_separator();
        self.pop(Container::Document)?;
        self.indent();
        self.buf.push_str("}\n");
        Ok(())
    }

    pub fn open_section(&mut self, name: &str) {
        self.stats.sections += 1;
        self.open_object(name, Container::Section);
    }

    pub fn close_section(&mut self) -> Result<(), WriterError> {
        self.close_object(Container::Section)
    }

    pub fn open_subsection(&mut self, name: &str) {
        self.stats.subsections += 1;
        self.open_object(name, Container::Subsection);
    }

    pub fn close_subsection(&mut self) -> Result<(), WriterError> {
        self.close_object(Container::Subsection)
    }

    pub fn open_array(&mut self, name: &str) {
        self.stats.sections += 1;
        self.check_member(name);
        self.ensure_capacity();
        self.indent();
        self.push_key(name);
        self.buf.push('[');
        self.push(Container::Array);
    }

    pub fn close_array(&mut self) -> Result<(), WriterError> {
        self.pop(Container::Array)?;
        self.buf.push('\n');
        self.indent();
        self.buf.push_str("],\n");
        Ok(())
    }

    /// Opens the next object of the innermost array.
    ///
    /// The separator between elements is written here, before the element,
    /// so an element never needs to know whether another one follows.
    pub fn open_element(&mut self) -> Result<(), WriterError> {
        let Some(frame) = self.open.last_mut() else {
            return Err(WriterError::ElementOutsideArray);
        };
        if frame.kind != Container::Array {
            return Err(WriterError::ElementOutsideArray);
        }
        let first = frame.elements == 0;
        frame.elements += 1;

        self.ensure_capacity();
        if !first {
            self.buf.push(',');
        }
        self.buf.push('\n');
        self.indent();
        self.buf.push_str("{\n");
        self.push(Container::Element);
        Ok(())
    }

    pub fn close_element(&mut self) -> Result<(), WriterError> {
        self.close_trailing_separator();
        self.pop(Container::Element)?;
        self.indent();
        self.buf.push('}');
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    pub fn string(&mut self, name: &str, value: &str) {
        self.stats.strings += 1;
        self.field_start(name);
        self.buf.push('"');
        escape_into(&mut self.buf, value);
        self.buf.push_str("\",\n");
    }

    pub fn long(&mut self, name: &str, value: i64) {
        self.stats.longs += 1;
        self.field_start(name);
        let _ = write!(self.buf, "{},\n", value);
    }

    pub fn unsigned(&mut self, name: &str, value: u64) {
        self.stats.longs += 1;
        self.field_start(name);
        let _ = write!(self.buf, "{},\n", value);
    }

    /// Writes a double with three decimals. NaN and infinities are written as
    /// zero to keep the document valid JSON.
    pub fn double(&mut self, name: &str, value: f64) {
        self.stats.doubles += 1;
        self.field_start(name);
        let value = if value.is_finite() { value } else { 0.0 };
        let _ = write!(self.buf, "{:.3},\n", value);
    }

    /// Writes `value` as a zero-padded hexadecimal string, e.g. `"0x00400100"`.
    pub fn hex(&mut self, name: &str, value: u64) {
        self.stats.hex += 1;
        self.field_start(name);
        let _ = write!(self.buf, "\"0x{:08x}\",\n", value);
    }

    /// Emits the writer counters as a `precimon_stats` section.
    pub fn write_stats(&mut self) -> Result<(), WriterError> {
        let stats = self.stats;
        self.open_section("precimon_stats");
        self.unsigned("section", stats.sections);
        self.unsigned("subsections", stats.subsections);
        self.unsigned("string", stats.strings);
        self.unsigned("long", stats.longs);
        self.unsigned("double", stats.doubles);
        self.unsigned("hex", stats.hex);
        self.close_section()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn open_object(&mut self, name: &str, kind: Container) {
        self.check_member(name);
        self.ensure_capacity();
        self.indent();
        self.push_key(name);
        self.buf.push_str("{\n");
        self.push(kind);
    }

    fn close_object(&mut self, kind: Container) -> Result<(), WriterError> {
        self.close_trailing_separator();
        self.pop(kind)?;
        self.indent();
        self.buf.push_str("},\n");
        Ok(())
    }

    fn field_start(&mut self, name: &str) {
        self.check_member(name);
        self.ensure_capacity();
        self.indent();
        self.push_key(name);
    }

    fn push_key(&mut self, name: &str) {
        self.buf.push('"');
        escape_into(&mut self.buf, name);
        self.buf.push_str("\": ");
    }

    fn push(&mut self, kind: Container) {
        self.open.push(Frame { kind, elements: 0 });
    }

    /// Records `name` as misplaced unless the innermost container is an
    /// object.
    fn check_member(&mut self, name: &str) {
        let in_object = self
            .open
            .last()
            .is_some_and(|frame| frame.kind != Container::Array);
        if !in_object && self.misplaced.is_none() {
            self.misplaced = Some(WriterError::MemberOutsideObject {
                name: name.to_string(),
            });
        }
    }

    fn pop(&mut self, expected: Container) -> Result<(), WriterError> {
        if let Some(e) = self.misplaced.take() {
            return Err(e);
        }
        match self.open.last() {
            Some(frame) if frame.kind == expected => {
                self.open.pop();
                Ok(())
            }
            other => Err(WriterError::Unbalanced {
                expected,
                found: other.map(|f| f.kind),
            }),
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.open.len() {
            self.buf.push('\t');
        }
    }

    /// Turns a trailing `",\n"` into `"\n"` so the closing brace does not
    /// follow a separator.
    fn close_trailing_separator(&mut self) {
        if self.buf.ends_with(",\n") {
            self.buf.truncate(self.buf.len() - 2);
            self.buf.push('\n');
        }
    }

    fn ensure_capacity(&mut self) {
        let capacity = self.buf.capacity();
        if self.buf.len() * 100 > capacity * GROWTH_THRESHOLD_PERCENT {
            self.buf.reserve(capacity.max(64));
        }
    }
}

/// Appends `value` to `out` with JSON string escaping.
fn escape_into(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

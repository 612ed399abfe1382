//! Stream framing for inbound Cresnet traffic.
//!
//! # Why a framer is needed
//!
//! TCP is a *stream* protocol and the Cresnet wire format has no length
//! prefix.  A single `read()` may return half a message, or the tail of one
//! message followed by two more.  [`FrameDecoder`] accumulates bytes and only
//! hands out a frame once a complete top-level element is buffered.
//!
//! Completion is detected by tracking element nesting depth:
//!
//! - `<name …>` opens an element (depth + 1), `</name>` closes one (depth − 1),
//!   `<name …/>` is complete on its own;
//! - quoted attribute values may contain `>` and are skipped as a unit;
//! - comments, CDATA sections, processing instructions (`<?xml …?>`) and
//!   declarations do not change depth.
//!
//! A frame is complete when depth returns to zero.  Tag *names* are not
//! matched here; a mismatched pair is reported when the frame is parsed.

use tracing::{debug, warn};

use crate::protocol::codec::ProtocolError;

/// Default upper bound on a buffered, incomplete frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Incremental splitter that turns a byte stream into complete XML elements.
///
/// # Examples
///
/// ```rust
/// use cresnet_core::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// decoder.push(b"<cresnet><control><co");
/// assert_eq!(decoder.next_frame().unwrap(), None);
///
/// decoder.push(b"mm/></control></cresnet>");
/// let frame = decoder.next_frame().unwrap().unwrap();
/// assert_eq!(frame, "<cresnet><control><comm/></control></cresnet>");
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_len: usize,
    /// Scan progress into `buf`, kept across calls so bytes that arrive
    /// piecemeal are only scanned once.
    scan: ScanState,
}

/// Where the scanner stopped inside a pending element.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ScanState {
    /// Offset of the pending frame's first `<`, once found.
    start: Option<usize>,
    /// Offset to resume scanning from.
    cursor: usize,
    /// Open elements seen so far.
    depth: usize,
}

/// Outcome of scanning the buffered bytes for one element.
#[derive(Debug, PartialEq, Eq)]
enum Scan {
    /// A complete element spans `buf[start..end]`.
    Complete { start: usize, end: usize },
    /// More bytes are needed.  Everything before `keep_from` is noise.
    Incomplete { keep_from: usize },
    /// The bytes up to `discard_to` cannot start a valid element.
    Malformed { discard_to: usize, reason: &'static str },
}

impl FrameDecoder {
    /// Creates a decoder with the [`DEFAULT_MAX_FRAME_LEN`] limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates a decoder that gives up on a frame larger than `max_frame_len` bytes.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            max_frame_len,
            scan: ScanState::default(),
        }
    }

    /// Appends newly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet handed out.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scan = ScanState::default();
    }

    /// Extracts the next complete frame, if one is buffered.
    ///
    /// Call in a loop after every [`push`](Self::push) until it returns
    /// `Ok(None)`: one delivery may contain several frames.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::FrameTooLarge`] when the pending frame exceeds the limit
    ///   (the buffer is discarded);
    /// - [`ProtocolError::Malformed`] for a stray top-level closing tag (the tag
    ///   is discarded);
    /// - [`ProtocolError::InvalidUtf8`] when a complete frame is not UTF-8 (the
    ///   frame is discarded).
    ///
    /// After an error the decoder keeps working on whatever bytes remain.
    pub fn next_frame(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.scan_element() {
            Scan::Complete { start, end } => {
                if start > 0 {
                    debug!("discarding {start} bytes outside any element");
                }
                let frame: Vec<u8> = self.buf[start..end].to_vec();
                self.consume(end);
                String::from_utf8(frame)
                    .map(Some)
                    .map_err(|_| ProtocolError::InvalidUtf8)
            }
            Scan::Incomplete { keep_from } => {
                self.shift(keep_from);
                if self.buf.len() > self.max_frame_len {
                    warn!(
                        "discarding {} buffered bytes: no complete element within {} bytes",
                        self.buf.len(),
                        self.max_frame_len
                    );
                    self.clear();
                    return Err(ProtocolError::FrameTooLarge {
                        limit: self.max_frame_len,
                    });
                }
                Ok(None)
            }
            Scan::Malformed { discard_to, reason } => {
                self.consume(discard_to);
                Err(ProtocolError::Malformed(reason.to_string()))
            }
        }
    }

    /// Drops `buf[..n]` and restarts scanning at the new front.
    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
        self.scan = ScanState::default();
    }

    /// Drops `buf[..n]` and keeps the scan position of the pending element.
    fn shift(&mut self, n: usize) {
        self.buf.drain(..n);
        self.scan.cursor -= n;
        self.scan.start = self.scan.start.map(|start| start - n);
    }

    /// Continues the scan where the previous call stopped.
    fn scan_element(&mut self) -> Scan {
        let buf = &self.buf;
        let scan = &mut self.scan;

        // A prolog or comment ahead of the root element travels with the frame.
        let start = match scan.start {
            Some(start) => start,
            None => match buf.iter().position(|&b| b == b'<') {
                Some(start) => {
                    scan.start = Some(start);
                    scan.cursor = start;
                    start
                }
                None => {
                    scan.cursor = buf.len();
                    return Scan::Incomplete { keep_from: buf.len() };
                }
            },
        };
        let mut i = scan.cursor;

        loop {
            let Some(rel) = buf[i..].iter().position(|&b| b == b'<') else {
                scan.cursor = buf.len();
                return Scan::Incomplete { keep_from: start };
            };
            i += rel;
            // An incomplete construct is rescanned from its `<` next time.
            scan.cursor = i;

            let rest = &buf[i..];
            if rest.len() < 2 {
                return Scan::Incomplete { keep_from: start };
            }

            match rest[1] {
                b'?' => match find(buf, i + 2, b"?>") {
                    Some(end) => i = end + 2,
                    None => return Scan::Incomplete { keep_from: start },
                },
                b'!' => {
                    const COMMENT: &[u8] = b"<!--";
                    const CDATA: &[u8] = b"<![CDATA[";
                    let (open, close): (&[u8], &[u8]) = if rest.starts_with(COMMENT) {
                        (COMMENT, b"-->")
                    } else if rest.starts_with(CDATA) {
                        (CDATA, b"]]>")
                    } else if COMMENT.starts_with(rest) || CDATA.starts_with(rest) {
                        return Scan::Incomplete { keep_from: start };
                    } else {
                        (b"<!", b">")
                    };
                    match find(buf, i + open.len(), close) {
                        Some(end) => i = end + close.len(),
                        None => return Scan::Incomplete { keep_from: start },
                    }
                }
                b'/' => {
                    let Some(end) = find_tag_end(buf, i) else {
                        return Scan::Incomplete { keep_from: start };
                    };
                    if scan.depth == 0 {
                        return Scan::Malformed {
                            discard_to: end + 1,
                            reason: "closing tag without a matching opening tag",
                        };
                    }
                    scan.depth -= 1;
                    if scan.depth == 0 {
                        return Scan::Complete { start, end: end + 1 };
                    }
                    i = end + 1;
                }
                _ => {
                    let Some(end) = find_tag_end(buf, i) else {
                        return Scan::Incomplete { keep_from: start };
                    };
                    let self_closing = end > i + 1 && buf[end - 1] == b'/';
                    if self_closing {
                        if scan.depth == 0 {
                            return Scan::Complete { start, end: end + 1 };
                        }
                    } else {
                        scan.depth += 1;
                    }
                    i = end + 1;
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

fn find(buf: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// Finds the `>` that ends the tag starting at `from`, skipping quoted values.
fn find_tag_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in buf.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

// Source position tracking for diagnostics

/// A byte range in the pattern source plus the 1-based line it starts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub line: u32,
}

impl Span {
    pub fn new(start: u32, end: u32, line: u32) -> Self {
        Self { start, end, line }
    }

    /// Create a dummy span for testing
    pub fn dummy() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
        }
    }

    /// Merge two spans into one that covers both.
    /// The merged span reports the earlier line.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: self.line.min(other.line),
        }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Incremental line counter used by the lexer.
///
/// Positions are expected to be queried in non-decreasing order; each query
/// only scans the bytes since the previous one.
#[derive(Debug)]
pub struct LineCounter<'a> {
    bytes: &'a [u8],
    scanned: usize,
    line: u32,
}

impl<'a> LineCounter<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            bytes: source.as_bytes(),
            scanned: 0,
            line: 1,
        }
    }

    /// Line number (1-based) of the byte at `pos`
    pub fn line_at(&mut self, pos: usize) -> u32 {
        let pos = pos.min(self.bytes.len());
        if pos < self.scanned {
            // Out-of-order query: count from scratch
            return 1 + self.bytes[..pos].iter().filter(|&&b| b == b'\n').count() as u32;
        }
        self.line += self.bytes[self.scanned..pos]
            .iter()
            .filter(|&&b| b == b'\n')
            .count() as u32;
        self.scanned = pos;
        self.line
    }
}

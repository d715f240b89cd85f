//! Terminal emulation: byte-stream interpreter driving a character grid.
//!
//! [`TermParser`] presents the familiar `process(bytes)` / `set_size(rows,
//! cols)` interface over an explicit escape-sequence state machine and the
//! attribute-free [`Grid`]. The state machine survives chunk boundaries: a
//! sequence truncated at the end of one `process` call resumes in the next,
//! so feeding a stream in arbitrary slices yields the same grid as feeding
//! it whole.
//!
//! # Architecture
//!
//! ```text
//! TermParser
//!  ├── grid: Grid          (character matrix + cursor)
//!  ├── state: State        (Ground / Escape / Designator / Csi / Osc)
//!  ├── csi: Vec<u8>        (parameter + intermediate accumulator)
//!  └── utf8: Vec<u8>       (pending multi-byte character)
//! ```
//!
//! Coverage is intentionally narrow: SGR, scrolling regions, and mode
//! set/reset are consumed and dropped, because the grid carries no
//! attributes. Ill-formed or unknown sequences never derail subsequent
//! output.

mod grid;

pub use grid::Grid;

/// Upper bound on accumulated CSI parameter bytes. Anything longer is a
/// hostile or corrupt stream; the sequence is still consumed to its final
/// byte but the overflow is dropped.
const MAX_CSI_LEN: usize = 64;

/// Parser state between bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Printable characters and C0 controls.
    Ground,
    /// Byte after ESC.
    Escape,
    /// Byte after `ESC (` or `ESC )` — a charset designator to skip.
    Designator,
    /// Inside `ESC [`, accumulating parameters until the final byte.
    Csi,
    /// Inside `ESC ]`, skipping until BEL or ST. The flag records a pending
    /// ESC that may begin the two-byte `ESC \` terminator.
    Osc { esc: bool },
}

/// Streaming terminal emulator over an attribute-free grid.
pub struct TermParser {
    grid: Grid,
    state: State,
    csi: Vec<u8>,
    utf8: Vec<u8>,
}

impl std::fmt::Debug for TermParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermParser")
            .field("rows", &self.grid.rows())
            .field("cols", &self.grid.cols())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TermParser {
    /// Create a parser over a fresh `rows × cols` grid.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self {
            grid: Grid::new(rows, cols),
            state: State::Ground,
            csi: Vec::new(),
            utf8: Vec::new(),
        }
    }

    /// Feed raw PTY bytes into the emulator.
    ///
    /// Hot path — chunks from the reader thread arrive here and mutate the
    /// grid in place.
    pub fn process(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.advance(b);
        }
    }

    /// Borrow the grid for reading.
    pub fn screen(&self) -> &Grid {
        &self.grid
    }

    /// Resize the grid. The PTY window must be resized by the caller in the
    /// same breath so the child and the emulator agree on dimensions.
    pub fn set_size(&mut self, rows: u16, cols: u16) {
        self.grid.resize(rows, cols);
    }

    fn advance(&mut self, b: u8) {
        match self.state {
            State::Ground => self.ground(b),
            State::Escape => self.escape(b),
            State::Designator => self.state = State::Ground,
            State::Csi => self.csi_byte(b),
            State::Osc { esc } => self.osc_byte(b, esc),
        }
    }

    fn ground(&mut self, b: u8) {
        match b {
            b'\r' => self.grid.carriage_return(),
            b'\n' => self.grid.line_feed(),
            0x08 => self.grid.backspace(),
            b'\t' => self.grid.tab(),
            0x1b => {
                self.utf8.clear();
                self.state = State::Escape;
            }
            // BEL and the remaining C0 controls are ignored.
            0x00..=0x1f => {}
            _ => self.input(b),
        }
    }

    fn escape(&mut self, b: u8) {
        match b {
            b'c' => {
                self.grid.reset();
                self.state = State::Ground;
            }
            // Save/restore cursor: no state kept.
            b'7' | b'8' => self.state = State::Ground,
            b'(' | b')' => self.state = State::Designator,
            b'[' => {
                self.csi.clear();
                self.state = State::Csi;
            }
            b']' => self.state = State::Osc { esc: false },
            _ => self.state = State::Ground,
        }
    }

    fn csi_byte(&mut self, b: u8) {
        match b {
            // Parameter and intermediate bytes accumulate.
            0x20..=0x3f => {
                if self.csi.len() < MAX_CSI_LEN {
                    self.csi.push(b);
                }
            }
            // Final byte dispatches the sequence.
            0x40..=0x7e => {
                self.dispatch_csi(b);
                self.state = State::Ground;
            }
            // A stray ESC abandons the sequence and starts over.
            0x1b => self.state = State::Escape,
            // Other control bytes inside a sequence are ignored.
            _ => {}
        }
    }

    fn osc_byte(&mut self, b: u8, esc: bool) {
        match b {
            0x07 => self.state = State::Ground,
            0x1b => self.state = State::Osc { esc: true },
            b'\\' if esc => self.state = State::Ground,
            _ => self.state = State::Osc { esc: false },
        }
    }

    /// Execute an accumulated CSI sequence.
    ///
    /// Missing or empty parameters read as 0; movement commands substitute
    /// a minimum of 1 per the VT convention. Unknown finals are dropped.
    fn dispatch_csi(&mut self, final_byte: u8) {
        let params: Vec<u16> = self
            .csi
            .split(|&b| b == b';')
            .map(|p| {
                std::str::from_utf8(p)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0)
            })
            .collect();
        let param = |idx: usize| params.get(idx).copied().unwrap_or(0);
        let count = |idx: usize| param(idx).max(1) as isize;

        match final_byte {
            // CUP / HVP — 1-indexed row;col.
            b'H' | b'f' => {
                let row = param(0).max(1) as usize - 1;
                let col = param(1).max(1) as usize - 1;
                self.grid.move_to(row, col);
            }
            b'A' => self.grid.move_rel(-count(0), 0),
            b'B' => self.grid.move_rel(count(0), 0),
            b'C' => self.grid.move_rel(0, count(0)),
            b'D' => self.grid.move_rel(0, -count(0)),
            b'J' => self.grid.erase_display(param(0)),
            b'K' => self.grid.erase_line(param(0)),
            b'@' => self.grid.insert_chars(count(0) as usize),
            b'P' => self.grid.delete_chars(count(0) as usize),
            // SGR, scrolling regions, and mode set/reset carry no meaning
            // for an attribute-free grid.
            b'm' | b'r' | b'h' | b'l' => {}
            _ => {}
        }
    }

    /// Accept a printable byte, assembling multi-byte UTF-8 sequences that
    /// may be split across read chunks.
    fn input(&mut self, b: u8) {
        if self.utf8.is_empty() {
            if b < 0x80 {
                self.grid.put(b as char);
            } else if b >= 0xc0 {
                self.utf8.push(b);
            }
            // Stray continuation bytes are dropped.
            return;
        }

        if (0x80..0xc0).contains(&b) {
            self.utf8.push(b);
            if self.utf8.len() >= utf8_sequence_len(self.utf8[0]) {
                if let Some(c) = std::str::from_utf8(&self.utf8)
                    .ok()
                    .and_then(|s| s.chars().next())
                {
                    self.grid.put(c);
                }
                self.utf8.clear();
            }
        } else {
            // Invalid continuation: drop the partial sequence, reprocess.
            self.utf8.clear();
            self.input(b);
        }
    }
}

/// Expected total length of a UTF-8 sequence from its lead byte.
fn utf8_sequence_len(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

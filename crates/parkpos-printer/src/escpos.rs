//! ESC/POS command builder
//!
//! Provides a fluent API for building ESC/POS print data. Text is encoded
//! to WPC1252 as it is written, so the builder knows exactly how many
//! characters had to be replaced.

use crate::encoding::{self, Alignment, CODE_PAGE_WPC1252};

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const DLE: u8 = 0x10;
const EOT: u8 = 0x04;

/// Characters of `data` a Code 39 barcode cannot carry, each listed once.
pub fn code39_unencodable(data: &str) -> Vec<char> {
    let mut rejected = Vec::new();
    for c in data.chars() {
        if !parkpos_core::constants::CODE39_ALPHABET.contains(c) && !rejected.contains(&c) {
            rejected.push(c);
        }
    }
    rejected
}

/// `DLE EOT n` real-time status request.
pub fn status_request(n: u8) -> [u8; 3] {
    [DLE, EOT, n]
}

/// Real-time status selectors for [`status_request`].
pub mod status {
    /// Printer status; bit 3 set means offline.
    pub const PRINTER: u8 = 1;
    /// Error status; bits 3, 5 and 6 flag cutter, unrecoverable and
    /// auto-recoverable errors.
    pub const ERROR: u8 = 3;
    /// Paper roll sensor; bits 5 and 6 flag paper end.
    pub const PAPER: u8 = 4;

    pub const OFFLINE_BIT: u8 = 0x08;
    pub const PAPER_END_BITS: u8 = 0x60;
    pub const CUTTER_ERROR_BIT: u8 = 0x08;
    pub const UNRECOVERABLE_BIT: u8 = 0x20;
    pub const AUTO_RECOVERABLE_BIT: u8 = 0x40;
}

/// ESC/POS command builder
///
/// Builds ESC/POS byte sequences for thermal printers. The buffer starts
/// with `ESC @` (initialize) followed by the WPC1252 code page selection.
#[derive(Debug)]
pub struct EscPosBuilder {
    buf: Vec<u8>,
    width: usize,
    substitutions: usize,
}

impl EscPosBuilder {
    /// Create a new builder with the specified paper width in characters
    ///
    /// Common widths:
    /// - 58mm paper: 32 characters
    /// - 80mm paper: 48 characters
    pub fn new(width: usize) -> Self {
        let mut buf = Vec::with_capacity(1024);
        buf.extend_from_slice(&[ESC, 0x40]);
        buf.extend_from_slice(&[ESC, 0x74, CODE_PAGE_WPC1252]);
        Self {
            buf,
            width,
            substitutions: 0,
        }
    }

    /// Get the configured paper width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Characters replaced by the placeholder so far.
    pub fn substitutions(&self) -> usize {
        self.substitutions
    }

    // === Text Output ===

    /// Write text without a line break.
    pub fn text(&mut self, s: &str) -> &mut Self {
        let sanitized = encoding::sanitize(s);
        self.substitutions += sanitized.substitutions;
        self.buf.extend(encoding::encode(&sanitized.text));
        self
    }

    /// Write text followed by newline
    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s);
        self.buf.push(b'\n');
        self
    }

    /// Write empty line
    pub fn newline(&mut self) -> &mut Self {
        self.buf.push(b'\n');
        self
    }

    /// Print and feed n lines (`ESC d n`).
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    // === Alignment ===

    pub fn align(&mut self, alignment: Alignment) -> &mut Self {
        let n = match alignment {
            Alignment::Left => 0x00,
            Alignment::Center => 0x01,
            Alignment::Right => 0x02,
        };
        self.buf.extend_from_slice(&[ESC, 0x61, n]);
        self
    }

    pub fn center(&mut self) -> &mut Self {
        self.align(Alignment::Center)
    }

    pub fn left(&mut self) -> &mut Self {
        self.align(Alignment::Left)
    }

    // === Text Style ===

    pub fn bold(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x45, 0x01]);
        self
    }

    pub fn bold_off(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x45, 0x00]);
        self
    }

    /// Double width and height. Halves the usable columns.
    pub fn double_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, 0x21, 0x11]);
        self
    }

    /// Double height only. Keeps the column count.
    pub fn double_height(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, 0x21, 0x01]);
        self
    }

    pub fn reset_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, 0x21, 0x00]);
        self
    }

    // === Separators ===

    /// Print a line of '=' characters
    pub fn sep_double(&mut self) -> &mut Self {
        let sep = "=".repeat(self.width);
        self.line(&sep)
    }

    /// Print a line of '-' characters
    pub fn sep_single(&mut self) -> &mut Self {
        let sep = "-".repeat(self.width);
        self.line(&sep)
    }

    // === Layout Helpers ===

    /// Print left and right text on the same line.
    ///
    /// The right side is kept whole; the left side is truncated to leave at
    /// least one space between them. Returns whether anything was cut.
    pub fn line_lr(&mut self, left: &str, right: &str) -> bool {
        let left = encoding::sanitize(left);
        let right = encoding::sanitize(right);
        self.substitutions += left.substitutions + right.substitutions;

        let (right, right_cut) = encoding::truncate(&right.text, self.width);
        let room = self.width.saturating_sub(encoding::width(&right) + 1);
        let (left, left_cut) = encoding::truncate(&left.text, room);

        let spaces = self.width - encoding::width(&left) - encoding::width(&right);
        let composed = format!("{}{}{}", left, " ".repeat(spaces), right);
        self.buf.extend(encoding::encode(&composed));
        self.buf.push(b'\n');

        left_cut || right_cut
    }

    // === Barcodes ===

    /// Print a Code 39 barcode with human readable text below it.
    ///
    /// Nothing is emitted when `data` holds characters outside the Code 39
    /// set; those characters are returned instead, in order of first
    /// appearance. Lowercase letters are not folded.
    pub fn barcode_code39(&mut self, data: &str, height: u8) -> Result<&mut Self, Vec<char>> {
        let rejected = code39_unencodable(data);
        if !rejected.is_empty() {
            return Err(rejected);
        }
        if data.is_empty() {
            return Ok(self);
        }

        // GS h n - height, GS w n - module width, GS H 2 - HRI below
        self.buf.extend_from_slice(&[GS, 0x68, height]);
        self.buf.extend_from_slice(&[GS, 0x77, 0x02]);
        self.buf.extend_from_slice(&[GS, 0x48, 0x02]);
        // GS k 4 d1..dk NUL - CODE39, format A
        self.buf.extend_from_slice(&[GS, 0x6B, 0x04]);
        self.buf.extend_from_slice(data.as_bytes());
        self.buf.push(0x00);
        Ok(self)
    }

    // === Paper Control ===

    /// Full cut after feeding n lines (`GS V 66 n`).
    pub fn cut_feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[GS, 0x56, 0x42, lines]);
        self
    }

    // === Build ===

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new(parkpos_core::constants::DEFAULT_COLUMNS)
    }
}

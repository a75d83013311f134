//! Receipt templates.
//!
//! Rendering is a pure function from a [`DocumentKind`] and a set of
//! pre-formatted [`ReceiptFields`] to ESC/POS bytes. Amounts, dates and
//! durations arrive as display strings; nothing here parses or rounds them.
//!
//! Oversized values never fail a render. They are cut to the line and the
//! field is listed in [`RenderedReceipt::truncated_fields`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::RenderError;
use crate::escpos::EscPosBuilder;
use crate::queue::Priority;

const BARCODE_HEIGHT: u8 = 80;

/// Printable document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    EntryTicket,
    PaymentReceipt,
    LostTicketReceipt,
    TestPage,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        Self::EntryTicket,
        Self::PaymentReceipt,
        Self::LostTicketReceipt,
        Self::TestPage,
    ];

    /// Stable identifier, as used in configuration and events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntryTicket => "ENTRY_TICKET",
            Self::PaymentReceipt => "PAYMENT_RECEIPT",
            Self::LostTicketReceipt => "LOST_TICKET_RECEIPT",
            Self::TestPage => "TEST_PAGE",
        }
    }

    /// Fields that must be present and non-blank.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::EntryTicket => &["plate", "code"],
            Self::PaymentReceipt => &["code", "amount"],
            Self::LostTicketReceipt => &["plate", "amount"],
            Self::TestPage => &[],
        }
    }

    /// Money on the counter prints first.
    pub fn default_priority(&self) -> Priority {
        match self {
            Self::PaymentReceipt | Self::LostTicketReceipt => Priority::High,
            Self::EntryTicket => Priority::Normal,
            Self::TestPage => Priority::Low,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DocumentKind {
    type Err = RenderError;

    /// Accepts `ENTRY_TICKET`, `entry-ticket` and similar spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| RenderError::UnknownDocument(s.to_string()))
    }
}

/// Named, pre-formatted values for a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptFields(BTreeMap<String, String>);

impl ReceiptFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkpos_printer::ReceiptFields;
    ///
    /// let fields = ReceiptFields::new()
    ///     .with("plate", "ABC-123")
    ///     .with("code", "T-00099");
    /// assert_eq!(fields.get("plate"), Some("ABC-123"));
    /// ```
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value of a field, treating blank strings as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReceiptFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Output of a render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReceipt {
    pub bytes: Bytes,
    /// Printed text lines, barcode excluded.
    pub lines: usize,
    /// Fields whose value did not fit and was cut.
    pub truncated_fields: Vec<String>,
    /// Characters replaced by the placeholder.
    pub substitutions: usize,
}

impl RenderedReceipt {
    pub fn is_truncated(&self) -> bool {
        !self.truncated_fields.is_empty()
    }
}

/// Fixed-width renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptRenderer {
    columns: usize,
}

impl ReceiptRenderer {
    pub fn new(columns: usize) -> Self {
        Self {
            columns: columns.max(1),
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn render(
        &self,
        kind: DocumentKind,
        fields: &ReceiptFields,
    ) -> Result<RenderedReceipt, RenderError> {
        render(kind, fields, self.columns)
    }
}

impl Default for ReceiptRenderer {
    fn default() -> Self {
        Self::new(parkpos_core::constants::DEFAULT_COLUMNS)
    }
}

/// Check that every required field is present.
pub fn check_fields(kind: DocumentKind, fields: &ReceiptFields) -> Result<(), RenderError> {
    match kind
        .required_fields()
        .iter()
        .copied()
        .find(|field| fields.get(field).is_none())
    {
        Some(field) => Err(RenderError::MissingField {
            document: kind.name(),
            field,
        }),
        None => Ok(()),
    }
}

/// Render a document into printer bytes.
///
/// # Examples
///
/// ```
/// use parkpos_printer::{render, DocumentKind, ReceiptFields};
///
/// let fields = ReceiptFields::new()
///     .with("plate", "ABC-123")
///     .with("code", "T-00099");
/// let receipt = render(DocumentKind::EntryTicket, &fields, 32).unwrap();
/// assert!(!receipt.is_truncated());
/// assert!(receipt.bytes.starts_with(&[0x1B, 0x40]));
/// ```
pub fn render(
    kind: DocumentKind,
    fields: &ReceiptFields,
    columns: usize,
) -> Result<RenderedReceipt, RenderError> {
    check_fields(kind, fields)?;

    let mut layout = Layout::new(columns.max(1));
    match kind {
        DocumentKind::EntryTicket => entry_ticket(&mut layout, fields)?,
        DocumentKind::PaymentReceipt => payment_receipt(&mut layout, fields),
        DocumentKind::LostTicketReceipt => lost_ticket_receipt(&mut layout, fields),
        DocumentKind::TestPage => test_page(&mut layout, fields),
    }
    Ok(layout.finish())
}

fn entry_ticket(l: &mut Layout, f: &ReceiptFields) -> Result<(), RenderError> {
    l.header(f);
    l.heading("TICKET DE ENTRADA");

    l.pair_bold("plate", "Matrícula:", f.get("plate"));
    l.pair("entry_time", "Entrada:", f.get("entry_time"));
    l.pair("vehicle_type", "Vehículo:", f.get("vehicle_type"));
    l.pair("operator", "Operador:", f.get("operator"));
    l.sep_single();

    if let Some(code) = f.get("code") {
        l.barcode("code", code)?;
        l.centered_bold("code", code);
    }
    l.sep_single();

    l.footer(
        f.get("footer"),
        "Conserve este ticket. Su extravío conlleva la tarifa de ticket perdido.",
    );
    Ok(())
}

fn payment_receipt(l: &mut Layout, f: &ReceiptFields) {
    l.header(f);
    l.heading("RECIBO DE PAGO");

    l.pair("code", "Ticket:", f.get("code"));
    l.pair("plate", "Matrícula:", f.get("plate"));
    l.pair("entry_time", "Entrada:", f.get("entry_time"));
    l.pair("exit_time", "Salida:", f.get("exit_time"));
    l.pair("duration", "Duración:", f.get("duration"));
    l.pair("rate", "Tarifa:", f.get("rate"));
    l.sep_single();

    l.total(f.get("amount"));
    l.pair("received", "Recibido:", f.get("received"));
    l.pair("change", "Cambio:", f.get("change"));
    l.sep_single();

    l.pair("operator", "Operador:", f.get("operator"));
    l.footer(f.get("footer"), "Gracias por su visita");
}

fn lost_ticket_receipt(l: &mut Layout, f: &ReceiptFields) {
    l.header(f);
    l.heading("TICKET PERDIDO");

    l.pair_bold("plate", "Matrícula:", f.get("plate"));
    l.pair("entry_time", "Entrada:", f.get("entry_time"));
    l.pair("exit_time", "Salida:", f.get("exit_time"));
    l.pair("penalty", "Recargo:", f.get("penalty"));
    l.sep_single();

    l.total(f.get("amount"));
    l.sep_single();

    l.pair("operator", "Operador:", f.get("operator"));
    l.footer(f.get("footer"), "Recibo por extravío de ticket");
}

fn test_page(l: &mut Layout, f: &ReceiptFields) {
    l.header(f);
    l.heading("PÁGINA DE PRUEBA");

    l.text_line("Juego de caracteres:");
    l.text_line("áéíóú ÁÉÍÓÚ");
    l.text_line("ñÑ üÜ ¿? ¡! º ª €");
    l.sep_single();

    let ruler: String = (1..=l.columns)
        .map(|i| char::from(b'0' + (i % 10) as u8))
        .collect();
    l.text_line(&ruler);
    l.text_line(&format!("Ancho: {} columnas", l.columns));
    l.pair("operator", "Operador:", f.get("operator"));
    l.footer(f.get("footer"), "Impresora operativa");
}

/// Line-counting wrapper around the ESC/POS builder.
struct Layout {
    b: EscPosBuilder,
    columns: usize,
    lines: usize,
    truncated: Vec<String>,
}

impl Layout {
    fn new(columns: usize) -> Self {
        Self {
            b: EscPosBuilder::new(columns),
            columns,
            lines: 0,
            truncated: Vec::new(),
        }
    }

    fn flag(&mut self, field: &str) {
        if !self.truncated.iter().any(|f| f == field) {
            self.truncated.push(field.to_string());
        }
    }

    /// Lot name in double size, address wrapped below it.
    fn header(&mut self, f: &ReceiptFields) {
        let name = f.get("lot_name").unwrap_or("ESTACIONAMIENTO");
        // Double width halves the usable columns
        let (name, cut) = encoding::truncate(name, (self.columns / 2).max(1));
        if cut {
            self.flag("lot_name");
        }
        self.b.center().double_size().line(&name);
        self.b.reset_size();
        self.lines += 1;

        if let Some(address) = f.get("lot_address") {
            for line in encoding::wrap(address, self.columns) {
                self.b.line(&line);
                self.lines += 1;
            }
        }
        self.b.left();
    }

    fn heading(&mut self, title: &str) {
        self.b.sep_double();
        self.b.center().bold().line(title);
        self.b.bold_off().left();
        self.b.sep_double();
        self.lines += 3;
    }

    /// Label on the left, value on the right. The value gives way when the
    /// pair does not fit.
    fn pair(&mut self, field: &str, label: &str, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        let room = self.columns.saturating_sub(encoding::width(label) + 1);
        let (value, cut) = encoding::truncate(value, room);
        if self.b.line_lr(label, &value) || cut {
            self.flag(field);
        }
        self.lines += 1;
    }

    fn pair_bold(&mut self, field: &str, label: &str, value: Option<&str>) {
        self.b.bold();
        self.pair(field, label, value);
        self.b.bold_off();
    }

    fn total(&mut self, amount: Option<&str>) {
        self.b.double_height();
        self.pair_bold("amount", "TOTAL:", amount);
        self.b.reset_size();
    }

    fn barcode(&mut self, field: &'static str, code: &str) -> Result<(), RenderError> {
        self.b
            .center()
            .barcode_code39(code, BARCODE_HEIGHT)
            .map_err(|chars| RenderError::UnencodableBarcode {
                field,
                chars: chars.into_iter().collect(),
            })?;
        self.b.left();
        Ok(())
    }

    fn centered_bold(&mut self, field: &str, text: &str) {
        let (text, cut) = encoding::truncate(text, self.columns);
        if cut {
            self.flag(field);
        }
        self.b.center().bold().line(&text);
        self.b.bold_off().left();
        self.lines += 1;
    }

    fn text_line(&mut self, text: &str) {
        let (text, _) = encoding::truncate(text, self.columns);
        self.b.line(&text);
        self.lines += 1;
    }

    fn footer(&mut self, custom: Option<&str>, default: &str) {
        self.b.newline();
        self.lines += 1;
        self.b.center();
        for line in encoding::wrap(custom.unwrap_or(default), self.columns) {
            self.b.line(&line);
            self.lines += 1;
        }
        self.b.left().feed(3).cut_feed(0);
    }

    fn sep_single(&mut self) {
        self.b.sep_single();
        self.lines += 1;
    }

    fn finish(self) -> RenderedReceipt {
        RenderedReceipt {
            substitutions: self.b.substitutions(),
            bytes: Bytes::from(self.b.build()),
            lines: self.lines,
            truncated_fields: self.truncated,
        }
    }
}

//! Text extraction for document uploads.
//!
//! Each [`DocumentKind`] maps to one [`TextExtractor`] in an
//! [`ExtractorTable`]. Extractors are synchronous and CPU bound; callers on
//! an async runtime should run them on a blocking thread.

use std::{
    collections::HashMap,
    io::{Cursor, Read},
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use {
    encoding_rs::{Encoding, WINDOWS_1252},
    quick_xml::{Reader, events::Event},
    relay_common::text::truncate_chars,
    tracing::debug,
    zip::ZipArchive,
};

use crate::{
    error::{Error, Result},
    mime::DocumentKind,
};

/// Default cap on extracted characters per document.
pub const DEFAULT_MAX_EXTRACTED_CHARS: usize = 200_000;

/// Refuse to inflate archive members larger than this.
const MAX_XML_PART_BYTES: u64 = 64 * 1024 * 1024;

/// Turns document bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<String>;
}

/// Capability table mapping each document kind to its extractor.
#[derive(Clone)]
pub struct ExtractorTable {
    extractors: HashMap<DocumentKind, Arc<dyn TextExtractor>>,
    max_chars: usize,
}

impl std::fmt::Debug for ExtractorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.extractors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ExtractorTable")
            .field("kinds", &kinds)
            .field("max_chars", &self.max_chars)
            .finish()
    }
}

impl Default for ExtractorTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXTRACTED_CHARS)
    }
}

impl ExtractorTable {
    /// Table with the built-in extractor for every kind.
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        let text: Arc<dyn TextExtractor> = Arc::new(PlainTextExtractor);
        let mut extractors: HashMap<DocumentKind, Arc<dyn TextExtractor>> = HashMap::new();
        extractors.insert(DocumentKind::PlainText, Arc::clone(&text));
        extractors.insert(DocumentKind::Csv, text);
        extractors.insert(DocumentKind::Word, Arc::new(DocxExtractor));
        extractors.insert(DocumentKind::Spreadsheet, Arc::new(XlsxExtractor));
        extractors.insert(DocumentKind::Pdf, Arc::new(PdfExtractor));
        Self {
            extractors,
            max_chars,
        }
    }

    /// Replace the extractor used for `kind`.
    #[must_use]
    pub fn with_extractor(mut self, kind: DocumentKind, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractors.insert(kind, extractor);
        self
    }

    /// Run the registered extractor and cap the result.
    pub fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<String> {
        let extractor = self
            .extractors
            .get(&kind)
            .ok_or_else(|| Error::extraction(kind, "no extractor registered"))?;
        let text = extractor.extract(bytes, kind)?;
        let chars = text.chars().count();
        if chars > self.max_chars {
            debug!(%kind, chars, max = self.max_chars, "truncating extracted text");
        }
        Ok(truncate_chars(&text, self.max_chars))
    }
}

// ── Plain text / CSV ────────────────────────────────────────────────────────

/// BOM-aware decoding: UTF-8 when valid, Windows-1252 otherwise.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], _kind: DocumentKind) -> Result<String> {
        Ok(decode_text(bytes))
    }
}

fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text.into_owned()
        },
    }
}

// ── OOXML helpers ───────────────────────────────────────────────────────────

fn open_archive(bytes: &[u8], kind: DocumentKind) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::extraction(kind, format!("not an OOXML archive: {e}")))
}

fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
    kind: DocumentKind,
) -> Result<Option<String>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(Error::extraction(kind, format!("{name}: {e}"))),
    };
    if entry.size() > MAX_XML_PART_BYTES {
        return Err(Error::extraction(kind, format!("{name} is too large")));
    }
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| Error::extraction(kind, format!("failed to read {name}: {e}")))?;
    Ok(Some(xml))
}

fn xml_error(kind: DocumentKind, err: impl std::fmt::Display) -> Error {
    Error::extraction(kind, format!("malformed XML: {err}"))
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ── Word ────────────────────────────────────────────────────────────────────

/// Paragraph text from `word/document.xml`. Legacy `.doc` files are not zip
/// archives and fail.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<String> {
        let mut archive = open_archive(bytes, kind)?;
        let xml = read_part(&mut archive, "word/document.xml", kind)?
            .ok_or_else(|| Error::extraction(kind, "missing word/document.xml"))?;
        docx_text(&xml, kind)
    }
}

fn docx_text(xml: &str, kind: DocumentKind) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(kind, e))? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {},
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {},
            },
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(|e| xml_error(kind, e))?);
            },
            Event::Eof => break,
            _ => {},
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n").trim().to_string())
}

// ── Spreadsheet ─────────────────────────────────────────────────────────────

/// One `## <sheet>` section per worksheet, one line per row, cells
/// tab-separated. Legacy `.xls` files are not zip archives and fail.
pub struct XlsxExtractor;

impl TextExtractor for XlsxExtractor {
    fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<String> {
        let mut archive = open_archive(bytes, kind)?;

        let shared = match read_part(&mut archive, "xl/sharedStrings.xml", kind)? {
            Some(xml) => shared_strings(&xml, kind)?,
            None => Vec::new(),
        };
        let workbook = read_part(&mut archive, "xl/workbook.xml", kind)?
            .ok_or_else(|| Error::extraction(kind, "missing xl/workbook.xml"))?;
        let rels = read_part(&mut archive, "xl/_rels/workbook.xml.rels", kind)?
            .map(|xml| relationships(&xml, kind))
            .transpose()?
            .unwrap_or_default();

        let mut sections = Vec::new();
        for (index, (name, rel_id)) in sheets(&workbook, kind)?.into_iter().enumerate() {
            let path = rel_id
                .and_then(|id| rels.get(&id).cloned())
                .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", index + 1));
            let Some(xml) = read_part(&mut archive, &path, kind)? else {
                debug!(sheet = %name, path, "worksheet part missing");
                continue;
            };
            let rows = sheet_rows(&xml, &shared, kind)?;
            if rows.is_empty() {
                sections.push(format!("## {name}"));
            } else {
                sections.push(format!("## {name}\n{}", rows.join("\n")));
            }
        }
        Ok(sections.join("\n\n"))
    }
}

fn shared_strings(xml: &str, kind: DocumentKind) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic hints carry their own <t> elements that are not cell text.
    let mut in_phonetic = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(kind, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {},
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {},
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text && !in_phonetic => {
                current.push_str(&t.unescape().map_err(|e| xml_error(kind, e))?);
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(strings)
}

/// Sheet names in workbook order, with their relationship ids.
fn sheets(xml: &str, kind: DocumentKind) -> Result<Vec<(String, Option<String>)>> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event().map_err(|e| xml_error(kind, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, "name").unwrap_or_else(|| format!("Sheet{}", sheets.len() + 1));
                sheets.push((name, attribute(&e, "r:id")));
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(sheets)
}

/// Relationship id to archive path, for worksheet targets.
fn relationships(xml: &str, kind: DocumentKind) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut rels = HashMap::new();
    loop {
        match reader.read_event().map_err(|e| xml_error(kind, e))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attribute(&e, "Id"), attribute(&e, "Target")) {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    };
                    rels.insert(id, path);
                }
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(rels)
}

#[derive(Default)]
struct Cell {
    column: Option<usize>,
    cell_type: Option<String>,
    value: String,
}

impl Cell {
    fn resolve(self, shared: &[String]) -> String {
        match self.cell_type.as_deref() {
            Some("s") => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i).cloned())
                .unwrap_or_default(),
            Some("b") => match self.value.trim() {
                "1" => "TRUE".to_string(),
                _ => "FALSE".to_string(),
            },
            _ => self.value,
        }
    }
}

fn sheet_rows(xml: &str, shared: &[String], kind: DocumentKind) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<Cell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event().map_err(|e| xml_error(kind, e))? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell = Some(Cell {
                        column: attribute(&e, "r").as_deref().and_then(column_index),
                        cell_type: attribute(&e, "t"),
                        value: String::new(),
                    });
                },
                b"v" | b"t" => in_value = true,
                _ => {},
            },
            Event::Text(t) if in_value => {
                if let Some(cell) = cell.as_mut() {
                    cell.value
                        .push_str(&t.unescape().map_err(|e| xml_error(kind, e))?);
                }
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(done) = cell.take() {
                        let column = done.column.unwrap_or(row.len());
                        let text = done.resolve(shared);
                        if column >= row.len() {
                            row.resize(column + 1, String::new());
                        }
                        row[column] = text;
                    }
                },
                b"row" => {
                    while row.last().is_some_and(String::is_empty) {
                        row.pop();
                    }
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                    }
                    row.clear();
                },
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(rows)
}

/// Zero-based column from an A1-style reference (`"C7"` -> 2).
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .collect();
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let column = letters.iter().fold(0usize, |acc, b| {
        acc * 26 + usize::from(b.to_ascii_uppercase() - b'A' + 1)
    });
    Some(column - 1)
}

// ── PDF ─────────────────────────────────────────────────────────────────────

/// Text layer via `pdf-extract`. Parser panics are reported as failures.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<String> {
        let outcome = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
        match outcome {
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(e)) => Err(Error::extraction(kind, e.to_string())),
            Err(_) => Err(Error::extraction(kind, "pdf parser panicked")),
        }
    }
}

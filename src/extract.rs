//! Text extraction.
//!
//! The [`Extractor`] trait turns an object's raw bytes into plain UTF-8
//! text for the index. Two implementations exist:
//!
//! - [`crate::tika::TikaExtractor`] streams content to an Apache Tika
//!   server and is the default for production.
//! - [`BuiltinExtractor`] runs in-process: plain text types pass through,
//!   PDF goes through `pdf-extract`, and OOXML (DOCX, PPTX, XLSX) is read
//!   with `zip` + `quick-xml`. Content type is detected from the key's
//!   extension.
//!
//! Extraction failures are per-object; callers log and drop the object.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ExtractionBackend, ExtractionConfig};
use crate::storage::{detect_content_type, ByteStream, StorageError};
use crate::tika::TikaExtractor;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum object size the built-in extractor will buffer.
const MAX_BUFFERED_BYTES: usize = 64 * 1024 * 1024;

/// Extracted text, streamed.
pub type TextStream = BoxStream<'static, Result<Bytes, ExtractionError>>;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("extraction service unreachable: {0}")]
    Unreachable(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("extraction rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unsupported content: {0}")]
    Unsupported(String),

    /// The content claims a format but could not be parsed as it.
    #[error("malformed content: {0}")]
    Malformed(String),

    /// Reading the object from the blob store failed mid-stream.
    #[error(transparent)]
    Content(#[from] StorageError),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract all text from `content`, the bytes of the object at `key`.
    async fn extract(&self, key: &str, content: ByteStream) -> Result<String, ExtractionError>;

    /// Extract text as a stream. The default collects [`Extractor::extract`]
    /// into a single chunk.
    async fn extract_streaming(
        &self,
        key: &str,
        content: ByteStream,
    ) -> Result<TextStream, ExtractionError> {
        let text = self.extract(key, content).await?;
        Ok(stream::once(async move { Ok(Bytes::from(text)) }).boxed())
    }
}

/// Build the extractor selected by `[extraction].backend`.
pub fn open(config: &ExtractionConfig) -> anyhow::Result<Arc<dyn Extractor>> {
    let extractor: Arc<dyn Extractor> = match config.backend {
        ExtractionBackend::Tika => Arc::new(TikaExtractor::from_config(config)?),
        ExtractionBackend::Builtin => Arc::new(BuiltinExtractor::new()),
    };
    Ok(extractor)
}

/// In-process extractor for text, PDF and OOXML objects.
#[derive(Debug, Clone, Default)]
pub struct BuiltinExtractor;

impl BuiltinExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for BuiltinExtractor {
    async fn extract(&self, key: &str, content: ByteStream) -> Result<String, ExtractionError> {
        let bytes = collect_bounded(content, MAX_BUFFERED_BYTES).await?;
        let content_type = detect_content_type(key);
        tokio::task::spawn_blocking(move || extract_text(&bytes, content_type))
            .await
            .map_err(|e| ExtractionError::Malformed(format!("extraction task failed: {}", e)))?
    }
}

/// Drain `content` into memory, failing once more than `max` bytes arrive.
pub async fn collect_bounded(
    mut content: ByteStream,
    max: usize,
) -> Result<Vec<u8>, ExtractionError> {
    let mut out = Vec::new();
    while let Some(chunk) = content.next().await {
        let chunk = chunk?;
        if out.len() + chunk.len() > max {
            return Err(ExtractionError::Unsupported(format!(
                "object exceeds {} bytes",
                max
            )));
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Extract plain text from `bytes` of the given MIME type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractionError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        ct if is_textual(ct) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(ExtractionError::Unsupported(other.to_string())),
    }
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || matches!(content_type, "application/json" | "application/xml")
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractionError::Malformed(format!("PDF: {}", e)))
}

fn ooxml_err(e: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Malformed(format!("OOXML: {}", e))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractionError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= max_bytes {
        return Err(ooxml_err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, in numeric order.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    if !archive.file_names().any(|n| n == "word/document.xml") {
        return Err(ooxml_err("word/document.xml not found"));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    collect_text_elements(&xml, b"t", " ")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let mut out = String::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_text_elements(&xml, b"t", " ")?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Concatenate the text of every `<local_name>` element, joined by `sep`.
fn collect_text_elements(xml: &[u8], local_name: &[u8], sep: &str) -> Result<String, ExtractionError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == local_name => {
                if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                    let text = te.unescape().unwrap_or_default();
                    if !out.is_empty() && !sep.is_empty() && !text.is_empty() {
                        out.push_str(sep);
                    }
                    out.push_str(text.as_ref());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut out = String::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let cells = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if !out.is_empty() && !cells.is_empty() {
            out.push(' ');
        }
        out.push_str(&cells);
    }
    Ok(out)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractionError> {
    use quick_xml::events::Event;

    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"si" => in_si = false,
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_xlsx_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<String, ExtractionError> {
    use quick_xml::events::Event;

    let mut cells: Vec<&str> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                if cell_is_shared_str {
                    if let Some(s) = v.trim().parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                        cells.push(s);
                    }
                }
                in_v = false;
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

//! MIME-dispatched text extraction for downloaded documents.
//!
//! The ingestion pipeline downloads (or exports) every drive file to a
//! portable format first, so this module only ever sees PDF, OOXML, or
//! plain-text bytes. Native presentations arrive as exported PDF; native
//! documents as exported DOCX; native spreadsheets are normally read
//! through the structured Sheets API upstream and only fall back to the
//! XLSX parser here.
//!
//! Extraction never fails the pipeline: anything unextractable yields an
//! empty string, and the per-format failure is logged with the byte size
//! and display path. Zero-byte inputs short-circuit to empty.

use std::io::Read;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to process in an XLSX workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Internal per-format extraction error.
#[derive(Debug)]
enum ExtractError {
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

/// Extract plain text from downloaded bytes, dispatching on MIME type.
///
/// | MIME | Strategy |
/// |------|----------|
/// | `application/pdf` | PDF page text, concatenated |
/// | DOCX / legacy Word | `word/document.xml` text runs; UTF-8 fallback on failure |
/// | XLSX | per-sheet cells, `[Sheet: <name>]` headers, tab-joined |
/// | `text/*` | bytes as UTF-8 (lossy) |
/// | anything else | UTF-8 when the bytes are valid UTF-8, else empty |
///
/// `display_path` is only used in warning logs.
pub fn extract_text(bytes: &[u8], mime_type: &str, display_path: &str) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    match mime_type {
        MIME_PDF => match extract_pdf(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn_failure(display_path, bytes.len(), &e);
                String::new()
            }
        },
        MIME_DOCX | "application/msword" => match extract_docx(bytes) {
            Ok(text) => text,
            Err(e) => {
                // Some drives hand back plain text under a Word MIME.
                warn_failure(display_path, bytes.len(), &e);
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
        MIME_XLSX => match extract_xlsx(bytes) {
            Ok(text) => text,
            Err(e) => {
                warn_failure(display_path, bytes.len(), &e);
                String::new()
            }
        },
        mime if mime.starts_with("text/") => String::from_utf8_lossy(bytes).into_owned(),
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                eprintln!(
                    "Warning: no extractor for {} ({} bytes, {})",
                    mime_type,
                    bytes.len(),
                    display_path
                );
                String::new()
            }
        },
    }
}

fn warn_failure(display_path: &str, size: usize, error: &ExtractError) {
    eprintln!("Warning: {} ({} bytes, {})", error, size, display_path);
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_text_runs(&xml)
}

/// Collect the text of every `<w:t>` run, separating paragraphs with
/// newlines. Text inside runs is taken verbatim (runs carry significant
/// leading/trailing spaces).
fn extract_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;

    let shared_strings = read_shared_strings(&mut archive).unwrap_or_default();
    let sheet_titles = read_sheet_titles(&mut archive).unwrap_or_default();
    let sheet_files = list_worksheet_entries(&mut archive);

    let mut out = String::new();
    for (idx, entry_name) in sheet_files.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &entry_name, MAX_XML_ENTRY_BYTES)?;
        let cells = extract_sheet_cells(&xml, &shared_strings)?;
        if cells.is_empty() {
            continue;
        }

        let title = sheet_titles
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("[Sheet: {}]\n", title));
        out.push_str(&cells.join("\t"));
    }
    Ok(out)
}

/// Sheet display names from `xl/workbook.xml`, in workbook order.
fn read_sheet_titles(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
    let mut titles = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e))
            | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            titles.push(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(titles)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_entries(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Non-empty cell values of one worksheet: shared strings resolved, inline
/// numeric values kept as-is.
fn extract_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<String>, ExtractError> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_is_shared = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"c" {
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_value = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_value => {
                let value = te.unescape().unwrap_or_default();
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    if cell_is_shared {
                        if let Ok(i) = trimmed.parse::<usize>() {
                            if let Some(s) = shared_strings.get(i) {
                                if !s.trim().is_empty() {
                                    cells.push(s.clone());
                                }
                            }
                        }
                    } else {
                        cells.push(trimmed.to_string());
                    }
                }
                in_value = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_value = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells)
}

//! Multi-format text extraction for uploaded documents (PDF, DOCX, XLSX, text).
//!
//! Extraction dispatches purely on the declared [`MediaType`]; contents are
//! never sniffed. A failure for one file is recorded on its
//! [`ExtractedContent`] and never affects sibling files.

use std::io::Read;

use crate::error::ExtractError;
use crate::models::{ExtractedContent, MediaType, SourceFile};
use crate::storage::ObjectStore;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Worksheet limits of the format: rows 1..=1048576, columns A..=XFD.
const XLSX_MAX_ROWS: usize = 1_048_576;
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Blank lines emitted for a run of skipped rows.
const XLSX_MAX_BLANK_ROWS: usize = 100;
/// CSV text kept per sheet; the rest of the sheet is dropped.
const XLSX_MAX_SHEET_BYTES: usize = 8 * 1024 * 1024;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Text recorded for declared types that have no extractor.
pub fn unsupported_marker(media_type: MediaType) -> String {
    format!("(unsupported file type: {})", media_type)
}

/// Fetch one document from storage and extract its text.
///
/// Never fails: fetch, parse, and panic-inside-parser errors are all
/// converted into [`ExtractedContent::failed`].
pub async fn extract(store: &dyn ObjectStore, file: &SourceFile) -> ExtractedContent {
    if !matches!(
        file.media_type,
        MediaType::Pdf | MediaType::Docx | MediaType::Xlsx | MediaType::Plaintext
    ) {
        return ExtractedContent::ok(&file.name, unsupported_marker(file.media_type));
    }

    if !file.has_location() {
        tracing::warn!(document = %file.name, "document has no storage reference");
        return ExtractedContent::failed(&file.name, "no storage reference");
    }

    let bytes = match store.get_object(&file.location_ref).await {
        Ok(b) => b,
        Err(e) => {
            let err = ExtractError::from(e);
            tracing::warn!(document = %file.name, error = %err, "extraction failed");
            return ExtractedContent::failed(&file.name, err.to_string());
        }
    };

    let media_type = file.media_type;
    let parsed = tokio::task::spawn_blocking(move || extract_text(&bytes, media_type)).await;

    match parsed {
        Ok(Ok(text)) => {
            tracing::debug!(document = %file.name, chars = text.len(), "extracted text");
            ExtractedContent::ok(&file.name, text)
        }
        Ok(Err(e)) => {
            tracing::warn!(document = %file.name, error = %e, "extraction failed");
            ExtractedContent::failed(&file.name, e.to_string())
        }
        Err(join_err) => {
            tracing::warn!(document = %file.name, error = %join_err, "extractor aborted");
            ExtractedContent::failed(&file.name, format!("extractor aborted: {}", join_err))
        }
    }
}

/// Extracts plain text from document bytes according to the declared type.
pub fn extract_text(bytes: &[u8], media_type: MediaType) -> Result<String, ExtractError> {
    match media_type {
        MediaType::Pdf => extract_pdf(bytes),
        MediaType::Docx => extract_docx(bytes),
        MediaType::Xlsx => extract_xlsx(bytes),
        MediaType::Plaintext => Ok(String::from_utf8_lossy(bytes).into_owned()),
        MediaType::Image | MediaType::Unknown => Ok(unsupported_marker(media_type)),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
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

fn read_zip_entry_optional(
    archive: &mut Archive<'_>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    if !archive.file_names().any(|n| n == name) {
        return Ok(None);
    }
    read_zip_entry_bounded(archive, name, MAX_XML_ENTRY_BYTES).map(Some)
}

fn xml_error(e: quick_xml::Error) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// Value of the attribute with the given local name, unescaped.
fn attr(e: &quick_xml::events::BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let doc_xml = read_zip_entry_optional(&mut archive, "word/document.xml")?
        .ok_or_else(|| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    extract_docx_body(&doc_xml)
}

/// Collect `w:t` runs, ending each `w:p` paragraph with a newline.
fn extract_docx_body(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_t = true,
            Event::Text(te) if in_t => {
                out.push_str(&te.unescape().map_err(xml_error)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

// ============ XLSX ============

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = match read_zip_entry_optional(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let sheets = list_sheets(&mut archive)?;

    let mut sections = Vec::new();
    for (name, path) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &path, MAX_XML_ENTRY_BYTES)?;
        let csv = sheet_to_csv(&sheet_xml, &shared_strings)?;
        sections.push(format!("--- Sheet: {} ---\n{}", name, csv));
    }
    Ok(sections.join("\n"))
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_t => {
                if let Some(ref mut s) = current {
                    s.push_str(&te.unescape().map_err(xml_error)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheets in workbook order as `(display name, zip path)`.
///
/// Names and order come from `xl/workbook.xml`, paths from its relationships.
/// Workbooks without those parts fall back to `xl/worksheets/sheetN.xml`
/// sorted numerically.
fn list_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    let workbook = read_zip_entry_optional(archive, "xl/workbook.xml")?;
    let rels = read_zip_entry_optional(archive, "xl/_rels/workbook.xml.rels")?;

    if let (Some(workbook), Some(rels)) = (workbook, rels) {
        let declared = parse_workbook_sheets(&workbook)?;
        let targets = parse_relationships(&rels)?;
        let sheets: Vec<(String, String)> = declared
            .into_iter()
            .filter_map(|(name, rid)| {
                targets
                    .iter()
                    .find(|(id, _)| *id == rid)
                    .map(|(_, target)| (name, resolve_target(target)))
            })
            .filter(|(_, path)| archive.file_names().any(|n| n == path))
            .collect();
        if !sheets.is_empty() {
            return Ok(sheets);
        }
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| sheet_number(name));
    Ok(names
        .into_iter()
        .map(|path| (format!("Sheet{}", sheet_number(&path)), path))
        .collect())
}

fn sheet_number(path: &str) -> u32 {
    path.trim_start_matches("xl/worksheets/sheet")
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    use quick_xml::events::Event;

    let mut sheets = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(rid)) = (attr(&e, b"name"), attr(&e, b"id")) {
                    sheets.push((name, rid));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    use quick_xml::events::Event;

    let mut rels = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    rels.push((id, target));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Zero-based column index from a cell reference such as `AB12`. `None`
/// when the reference has no column letters or lies past column XFD.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut idx = 0usize;
    let mut seen = false;
    for ch in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        idx = idx.checked_mul(26)?.checked_add(digit)?;
        if idx > XLSX_MAX_COLUMNS {
            return None;
        }
        seen = true;
    }
    seen.then(|| idx - 1)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(row: &[String]) -> String {
    row.iter().map(|v| csv_field(v)).collect::<Vec<_>>().join(",")
}

/// Serialize one worksheet as CSV, one line per row. Gaps between cells
/// become empty fields and skipped rows become empty lines (at most
/// [`XLSX_MAX_BLANK_ROWS`] per gap). Cells past column XFD are dropped and
/// row numbers past the format's limit are treated as the next row.
fn sheet_to_csv(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut lines: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut last_row = 0usize;
    let mut row: Vec<String> = Vec::new();
    let mut cell_col: Option<usize> = None;
    let mut text_bytes = 0usize;
    let mut cell_type = String::new();
    let mut cell_value = String::new();
    let mut in_value = false;
    let mut in_inline = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET || text_bytes >= XLSX_MAX_SHEET_BYTES {
            break;
        }
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    let next = last_row.saturating_add(1);
                    let number = attr(&e, b"r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .filter(|n| (next..=XLSX_MAX_ROWS).contains(n))
                        .unwrap_or(next);
                    let gap = (number - next).min(XLSX_MAX_BLANK_ROWS);
                    lines.extend(std::iter::repeat_with(String::new).take(gap));
                    text_bytes += gap;
                    last_row = number;
                    row.clear();
                }
                b"c" => {
                    cell_col = match attr(&e, b"r") {
                        Some(r) => column_index(&r),
                        None => Some(row.len()).filter(|&c| c < XLSX_MAX_COLUMNS),
                    };
                    cell_type = attr(&e, b"t").unwrap_or_default();
                    cell_value.clear();
                }
                b"v" => in_value = true,
                b"is" => in_inline = true,
                _ => {}
            },
            Event::Text(te) if in_value || in_inline => {
                cell_value.push_str(&te.unescape().map_err(xml_error)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"is" => in_inline = false,
                b"c" => {
                    if let Some(col) = cell_col.take() {
                        let value = resolve_cell(&cell_type, &cell_value, shared_strings);
                        if row.len() <= col {
                            row.resize(col + 1, String::new());
                        }
                        row[col] = value;
                    }
                    cell_count += 1;
                }
                b"row" => {
                    let line = csv_line(&row);
                    text_bytes += line.len() + 1;
                    lines.push(line);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    Ok(lines.join("\n"))
}

fn resolve_cell(cell_type: &str, raw: &str, shared_strings: &[String]) -> String {
    match cell_type {
        "s" => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i))
            .cloned()
            .unwrap_or_default(),
        "b" => match raw.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => raw.to_string(),
    }
}

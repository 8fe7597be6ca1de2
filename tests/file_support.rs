//! Integration tests for multi-format extraction through the filesystem store.
//!
//! Fixture documents (PDF, DOCX, XLSX, text) are written to a temp directory
//! and read back through `FsStore`, the same path the CLI takes.

use std::fs;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

use rca_harness::extract::{extract, unsupported_marker};
use rca_harness::models::{MediaType, SourceFile};
use rca_harness::storage::{FsStore, ObjectStore};

/// Minimal valid PDF containing `phrase`. Builds body then xref with correct
/// byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// Minimal docx with one paragraph of text.
fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    zip_with(&[(
        "word/document.xml",
        format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        ),
    )])
}

/// Workbook with two named sheets, listed in workbook order.
fn minimal_xlsx() -> Vec<u8> {
    let ns = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    let rel_ns = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
    zip_with(&[
        (
            "xl/workbook.xml",
            format!(
                "<workbook xmlns=\"{ns}\" xmlns:r=\"{rel_ns}\"><sheets><sheet name=\"Torque\" sheetId=\"1\" r:id=\"rId1\"/><sheet name=\"Notes\" sheetId=\"2\" r:id=\"rId2\"/></sheets></workbook>"
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Target=\"worksheets/sheet1.xml\"/><Relationship Id=\"rId2\" Target=\"worksheets/sheet2.xml\"/></Relationships>".to_string(),
        ),
        (
            "xl/sharedStrings.xml",
            format!("<sst xmlns=\"{ns}\"><si><t>station</t></si><si><t>Nm</t></si><si><t>check fixture</t></si></sst>"),
        ),
        (
            "xl/worksheets/sheet1.xml",
            format!(
                "<worksheet xmlns=\"{ns}\"><sheetData><row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row><row r=\"2\"><c r=\"A2\"><v>7</v></c><c r=\"B2\"><v>52</v></c></row></sheetData></worksheet>"
            ),
        ),
        (
            "xl/worksheets/sheet2.xml",
            format!(
                "<worksheet xmlns=\"{ns}\"><sheetData><row r=\"1\"><c r=\"A1\" t=\"s\"><v>2</v></c></row></sheetData></worksheet>"
            ),
        ),
    ])
}

fn setup_store() -> (TempDir, FsStore) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("uploads")).unwrap();
    fs::write(
        root.join("uploads/torque_log.pdf"),
        minimal_pdf_with_phrase("torque spec 45Nm exceeded"),
    )
    .unwrap();
    fs::write(
        root.join("uploads/8d_report.docx"),
        minimal_docx_with_text("containment action started"),
    )
    .unwrap();
    fs::write(root.join("uploads/spc.xlsx"), minimal_xlsx()).unwrap();
    fs::write(root.join("uploads/shift.txt"), "operator changed at 14:00\n").unwrap();
    fs::write(root.join("uploads/broken.docx"), b"not a zip").unwrap();
    fs::write(root.join("uploads/crack.png"), b"\x89PNG\r\n").unwrap();
    let store = FsStore::new(root);
    (tmp, store)
}

fn file(name: &str, media_type: MediaType) -> SourceFile {
    SourceFile::new(name, format!("uploads/{}", name), media_type)
}

#[tokio::test]
async fn file_support_pdf_text_layer() {
    let (_tmp, store) = setup_store();
    let out = extract(&store, &file("torque_log.pdf", MediaType::Pdf)).await;
    assert!(out.error.is_none(), "unexpected error: {:?}", out.error);
    assert!(out.text.unwrap().contains("torque spec 45Nm exceeded"));
}

#[tokio::test]
async fn file_support_docx_paragraphs() {
    let (_tmp, store) = setup_store();
    let out = extract(&store, &file("8d_report.docx", MediaType::Docx)).await;
    assert_eq!(out.source_name, "8d_report.docx");
    assert!(out.text.unwrap().contains("containment action started"));
}

#[tokio::test]
async fn file_support_xlsx_sheets_in_order() {
    let (_tmp, store) = setup_store();
    let out = extract(&store, &file("spc.xlsx", MediaType::Xlsx)).await;
    let text = out.text.unwrap();
    let torque = text.find("--- Sheet: Torque ---").unwrap();
    let notes = text.find("--- Sheet: Notes ---").unwrap();
    assert!(torque < notes);
    assert!(text.contains("station,Nm"));
    assert!(text.contains("7,52"));
    assert!(text.contains("check fixture"));
}

#[tokio::test]
async fn file_support_plaintext_verbatim() {
    let (_tmp, store) = setup_store();
    let out = extract(&store, &file("shift.txt", MediaType::Plaintext)).await;
    assert_eq!(out.text.as_deref(), Some("operator changed at 14:00\n"));
}

#[tokio::test]
async fn file_support_unsupported_type_is_marker_not_error() {
    let (_tmp, store) = setup_store();
    let out = extract(&store, &file("crack.png", MediaType::Unknown)).await;
    assert!(out.error.is_none());
    assert_eq!(out.text, Some(unsupported_marker(MediaType::Unknown)));
}

#[tokio::test]
async fn file_support_corrupt_and_missing_files_fail_alone() {
    let (_tmp, store) = setup_store();
    let broken = extract(&store, &file("broken.docx", MediaType::Docx)).await;
    assert!(broken.text.is_none());
    assert!(broken.error.is_some());

    let missing = extract(&store, &file("gone.pdf", MediaType::Pdf)).await;
    assert!(missing.error.unwrap().contains("not found"));

    let sibling = extract(&store, &file("shift.txt", MediaType::Plaintext)).await;
    assert!(sibling.text.is_some());
}

#[tokio::test]
async fn file_support_store_rejects_path_traversal() {
    let (_tmp, store) = setup_store();
    assert!(store.get_object("../etc/passwd").await.is_err());
    assert!(store.get_object("uploads/../../secret").await.is_err());
}

#[tokio::test]
async fn file_support_image_locator_is_data_url() {
    let (_tmp, store) = setup_store();
    let url = store
        .sign_url("uploads/crack.png", Duration::from_secs(300))
        .await
        .unwrap();
    assert!(url.starts_with("data:image/png;base64,"));
}

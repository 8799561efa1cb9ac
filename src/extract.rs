//! Uploaded-document text extraction.
//!
//! Dispatches on the original file name's extension. Markdown and plain text
//! are read as UTF-8; PDF goes through `pdf-extract`; DOCX, PPTX and XLSX are
//! read as ZIP archives and their XML text runs collected with `quick-xml`.
//! Anything else is [`ExtractError::UnsupportedFileType`].

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;

/// Decompressed size cap for a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("file is not valid UTF-8 text")]
    NotUtf8,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("office document extraction failed: {0}")]
    Ooxml(String),
}

fn ooxml(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// Whether `file_name` is prose that should be chunked by headings.
pub fn is_markdown(file_name: &str) -> bool {
    matches!(extension(file_name).as_str(), "md" | "markdown" | "mdx")
}

fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Plain text of `bytes`, interpreted according to `file_name`.
pub fn extract_text(bytes: &[u8], file_name: &str) -> Result<String, ExtractError> {
    match extension(file_name).as_str() {
        "md" | "markdown" | "mdx" | "txt" | "text" | "rst" | "adoc" => {
            String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::NotUtf8)
        }
        "pdf" => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        "docx" => {
            let mut archive = open_archive(bytes)?;
            let xml = read_entry(&mut archive, "word/document.xml")?;
            Ok(collect_text(&xml, b"t", "\n")?)
        }
        "pptx" => {
            let mut archive = open_archive(bytes)?;
            let slides = numbered_entries(&archive, "ppt/slides/slide");
            let mut parts = Vec::new();
            for name in slides {
                let xml = read_entry(&mut archive, &name)?;
                let text = collect_text(&xml, b"t", " ")?;
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            Ok(parts.join("\n\n"))
        }
        "xlsx" => extract_xlsx(bytes),
        "" => Err(ExtractError::UnsupportedFileType(file_name.to_string())),
        other => Err(ExtractError::UnsupportedFileType(format!(".{}", other))),
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml)
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(ooxml)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!("{} exceeds size limit", name)));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, ordered by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Text content of every `<*:tag>` element. Runs inside one paragraph
/// (`<*:p>`) are concatenated; paragraphs are joined with `paragraph_sep`.
fn collect_text(xml: &[u8], tag: &[u8], paragraph_sep: &str) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_tag = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml)? {
            Event::Start(e) if e.local_name().as_ref() == tag => in_tag = true,
            Event::End(e) if e.local_name().as_ref() == tag => in_tag = false,
            Event::End(e) if e.local_name().as_ref() == b"p" => {
                if !current.trim().is_empty() {
                    paragraphs.push(current.trim().to_string());
                }
                current.clear();
            }
            Event::Text(t) if in_tag => {
                current.push_str(&t.unescape().map_err(ooxml)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    Ok(paragraphs.join(paragraph_sep))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(_) => Vec::new(),
    };

    let mut rows = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        rows.extend(sheet_rows(&xml, &shared)?);
    }
    Ok(rows.join("\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_t = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_t = false,
            Event::End(e) if e.local_name().as_ref() == b"si" => {
                out.push(std::mem::take(&mut current));
            }
            Event::Text(t) if in_t => current.push_str(&t.unescape().map_err(ooxml)?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// One tab-separated line per `<row>`. Shared-string cells are resolved,
/// numeric cells kept as written.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml)? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                shared_cell = e.attributes().flatten().any(|a| {
                    a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                });
            }
            Event::Start(e) if e.local_name().as_ref() == b"v" => in_value = true,
            Event::End(e) if e.local_name().as_ref() == b"v" => in_value = false,
            Event::End(e) if e.local_name().as_ref() == b"row" => {
                if !cells.is_empty() {
                    rows.push(cells.join("\t"));
                }
                cells.clear();
            }
            Event::Text(t) if in_value => {
                let raw = t.unescape().map_err(ooxml)?;
                let raw = raw.trim();
                let value = if shared_cell {
                    raw.parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                } else {
                    Some(raw.to_string())
                };
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    cells.push(v);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut w = zip::ZipWriter::new(&mut out);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                w.start_file(*name, opts).unwrap();
                w.write_all(body.as_bytes()).unwrap();
            }
            w.finish().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = extract_text(b"\x00\x01", "archive.tar").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType(ref ext) if ext == ".tar"));
        let err = extract_text(b"hello", "Makefile").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType(_)));
    }

    #[test]
    fn markdown_is_read_verbatim() {
        let text = extract_text("# Title\n\nBody".as_bytes(), "NOTES.MD").unwrap();
        assert_eq!(text, "# Title\n\nBody");
        assert!(matches!(
            extract_text(&[0xff, 0xfe], "bad.txt"),
            Err(ExtractError::NotUtf8)
        ));
    }

    #[test]
    fn invalid_pdf_and_zip_are_errors() {
        assert!(matches!(
            extract_text(b"not a pdf", "manual.pdf"),
            Err(ExtractError::Pdf(_))
        ));
        assert!(matches!(
            extract_text(b"not a zip", "manual.docx"),
            Err(ExtractError::Ooxml(_))
        ));
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let doc = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = extract_text(&bytes, "design.docx").unwrap();
        assert_eq!(text, "Hello world\nSecond & last");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |s: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, s);
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = extract_text(&bytes, "deck.pptx").unwrap();
        assert_eq!(text, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn xlsx_rows_resolve_shared_strings() {
        let shared = r#"<sst><si><t>name</t></si><si><t>alice</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row><c t="s"><v>0</v></c><c><v>42</v></c></row>
            <row><c t="s"><v>1</v></c></row>
        </sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract_text(&bytes, "people.xlsx").unwrap();
        assert_eq!(text, "name\t42\nalice");
    }
}

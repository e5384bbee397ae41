use crate::error::{RagError, Result};
use calamine::{open_workbook_auto, Reader};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text_by_pages;
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions the loader knows how to extract
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["pdf", "txt", "md", "csv", "xlsx", "xls"];

/// Text extracted from one file, or from one page, row or sheet of it
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The extracted text content
    pub text: String,
    /// Name of the file the text came from
    pub source: String,
    /// Page, row or sheet index within the file, when the format has one
    pub page: Option<usize>,
    /// The file's MIME type
    pub mime_type: String,
}

/// Lowercased extension of a path, without the dot
pub fn file_extension<P: AsRef<Path>>(file_path: P) -> Option<String> {
    file_path
        .as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Whether the loader has an extractor for this path
pub fn is_supported<P: AsRef<Path>>(file_path: P) -> bool {
    file_extension(file_path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Load every document unit from a single file.
///
/// Either all units of the file are returned or the whole file fails.
pub fn load_document<P: AsRef<Path>>(file_path: P) -> Result<Vec<Document>> {
    let path = file_path.as_ref();
    let source = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .ok_or_else(|| RagError::load(path.display().to_string(), "invalid file name"))?;

    let extension = file_extension(path).unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(RagError::UnsupportedFormat {
            path: source,
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{}", extension)
            },
        });
    }

    let mime_type = from_path(path).first_or_octet_stream().to_string();
    debug!("Detected MIME type: {}", mime_type);

    let units = match extension.as_str() {
        "pdf" => read_pdf(path, &source)?,
        "txt" | "md" => vec![(None, read_text(path, &source)?)],
        "csv" => read_csv(path, &source)?,
        _ => read_spreadsheet(path, &source)?,
    };

    let documents: Vec<Document> = units
        .into_iter()
        .map(|(page, text)| Document {
            text,
            source: source.clone(),
            page,
            mime_type: mime_type.clone(),
        })
        .collect();

    info!("Loaded {} document unit(s) from {}", documents.len(), source);
    Ok(documents)
}

/// Documents found under a directory
#[derive(Debug, Default)]
pub struct LoadedDirectory {
    pub documents: Vec<Document>,
    /// Files that loaded successfully
    pub files: usize,
}

/// Recursively load every supported file under a directory.
///
/// Files that fail to load are logged and skipped.
pub fn load_directory<P: AsRef<Path>>(dir: P) -> Result<LoadedDirectory> {
    let mut paths = Vec::new();
    collect_files(dir.as_ref(), &mut paths)?;
    paths.sort();

    let mut loaded = LoadedDirectory::default();
    for path in paths.into_iter().filter(|p| is_supported(p)) {
        match load_document(&path) {
            Ok(mut docs) => {
                loaded.documents.append(&mut docs);
                loaded.files += 1;
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(loaded)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn read_pdf(path: &Path, source: &str) -> Result<Vec<(Option<usize>, String)>> {
    info!("Processing PDF document: {}", path.display());

    // pdf-extract panics on some malformed files instead of returning an error
    let pages = std::panic::catch_unwind(|| extract_text_by_pages(path))
        .map_err(|_| RagError::load(source, "PDF parser crashed"))?
        .map_err(|e| RagError::load(source, format!("failed to extract text from PDF: {}", e)))?;

    let pages: Vec<(Option<usize>, String)> = pages
        .iter()
        .enumerate()
        .map(|(idx, page)| (Some(idx), normalize_whitespace(page)))
        .collect();

    if pages.iter().all(|(_, text)| text.is_empty()) {
        warn!("Extracted PDF content is empty or contains only whitespace");
    }

    Ok(pages)
}

fn read_text(path: &Path, source: &str) -> Result<String> {
    info!("Processing text document: {}", path.display());
    fs::read_to_string(path)
        .map_err(|e| RagError::load(source, format!("failed to read text file: {}", e)))
}

/// One unit per row, rendered as `header: value` lines
fn read_csv(path: &Path, source: &str) -> Result<Vec<(Option<usize>, String)>> {
    info!("Processing CSV document: {}", path.display());

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| RagError::load(source, e))?;
    let headers = reader
        .headers()
        .map_err(|e| RagError::load(source, e))?
        .clone();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| RagError::load(source, e))?;
        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect::<Vec<String>>()
            .join("\n");
        rows.push((Some(idx), text));
    }

    Ok(rows)
}

/// One unit per non-empty worksheet, rows rendered tab-separated
fn read_spreadsheet(path: &Path, source: &str) -> Result<Vec<(Option<usize>, String)>> {
    info!("Processing spreadsheet: {}", path.display());

    let mut workbook = open_workbook_auto(path).map_err(|e| RagError::load(source, e))?;

    let mut sheets = Vec::new();
    for (idx, name) in workbook.sheet_names().into_iter().enumerate() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| RagError::load(source, format!("sheet {}: {}", name, e)))?;

        let text = range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<String>>()
                    .join("\t")
                    .trim_end()
                    .to_string()
            })
            .filter(|line| !line.is_empty())
            .collect::<Vec<String>>()
            .join("\n");

        if text.is_empty() {
            debug!("Sheet {} of {} is empty", name, source);
            continue;
        }
        sheets.push((Some(idx), text));
    }

    Ok(sheets)
}

/// Normalize whitespace in text (remove multiple consecutive spaces, newlines, etc.)
fn normalize_whitespace(text: &str) -> String {
    let result = text.replace('\r', "");

    let mut prev_char = ' ';
    let mut newline_count = 0;
    let mut normalized = String::with_capacity(result.len());

    for c in result.chars() {
        if c == '\n' {
            newline_count += 1;
        } else {
            if newline_count > 0 {
                // Keep at most one blank line between paragraphs
                if newline_count >= 2 {
                    normalized.push_str("\n\n");
                } else {
                    normalized.push('\n');
                }
                newline_count = 0;
            }

            if !(c == ' ' && prev_char == ' ') {
                normalized.push(c);
            }

            prev_char = c;
        }
    }

    normalized.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_normalize_whitespace() {
        let text = "This  has   multiple    spaces.\n\n\nAnd multiple newlines.\r\nAnd Windows line endings.";
        let expected =
            "This has multiple spaces.\n\nAnd multiple newlines.\nAnd Windows line endings.";
        assert_eq!(normalize_whitespace(text), expected);
    }

    #[test]
    fn test_load_text_and_markdown() {
        let dir = TempDir::new().unwrap();
        let txt = write(&dir, "notes.txt", "Plain notes.");
        let md = write(&dir, "README.MD", "# Title\n\nBody.");

        let docs = load_document(&txt).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "notes.txt");
        assert_eq!(docs[0].text, "Plain notes.");
        assert_eq!(docs[0].page, None);

        let docs = load_document(&md).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "README.MD");
    }

    #[test]
    fn test_load_csv_one_document_per_row() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "people.csv", "name, city\nAda, London\nGrace, Arlington\n");

        let docs = load_document(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "name: Ada\ncity: London");
        assert_eq!(docs[1].page, Some(1));
        assert!(docs.iter().all(|d| d.source == "people.csv"));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "slides.pptx", "binary");

        let err = load_document(&path).unwrap_err();
        match err {
            RagError::UnsupportedFormat { path, extension } => {
                assert_eq!(path, "slides.pptx");
                assert_eq!(extension, ".pptx");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_is_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.txt");
        fs::write(&path, [0xff, 0xfe, 0xfd]).unwrap();

        let err = load_document(&path).unwrap_err();
        assert!(matches!(err, RagError::Load { ref path, .. } if path == "broken.txt"));
    }

    #[test]
    fn test_corrupt_spreadsheet_is_load_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "budget.xlsx", "not a zip archive");

        assert!(matches!(
            load_document(&path),
            Err(RagError::Load { .. })
        ));
    }

    #[test]
    fn test_load_directory_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.txt", "first");
        write(&dir, "ignored.bin", "nope");
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.md"), "second").unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), [0xff, 0xfe]).unwrap();

        let loaded = load_directory(dir.path()).unwrap();
        let sources: Vec<&str> = loaded.documents.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["a.txt", "b.md"]);
        assert_eq!(loaded.files, 2);
    }

    #[test]
    fn test_load_directory_counts_same_named_files_separately() {
        let dir = TempDir::new().unwrap();
        write(&dir, "notes.txt", "top level");
        fs::create_dir(dir.path().join("archive")).unwrap();
        fs::write(dir.path().join("archive").join("notes.txt"), "archived").unwrap();

        let loaded = load_directory(dir.path()).unwrap();
        assert_eq!(loaded.files, 2);
        assert_eq!(loaded.documents.len(), 2);
        assert!(loaded.documents.iter().all(|d| d.source == "notes.txt"));
    }

    #[test]
    fn test_load_pdf_one_document_per_page() {
        let docs = load_document(fixture("handbook.pdf")).unwrap();

        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.source == "handbook.pdf"));
        assert!(docs.iter().all(|d| d.mime_type == "application/pdf"));
        assert_eq!(docs[0].page, Some(0));
        assert_eq!(docs[1].page, Some(1));
        assert!(docs[0].text.contains("handbook"));
        assert!(docs[1].text.contains("portal"));
    }

    #[test]
    fn test_load_xlsx_skips_empty_sheets() {
        let docs = load_document(fixture("inventory.xlsx")).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "inventory.xlsx");
        assert_eq!(docs[0].page, Some(0));
        assert_eq!(docs[0].text, "Item\tCount\nbolts\ttwelve");
    }

    #[test]
    fn test_load_legacy_xls() {
        let docs = load_document(fixture("inventory.xls")).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "inventory.xls");
        assert_eq!(docs[0].page, Some(0));
        assert_eq!(docs[0].text, "Item\tCount\nbolts\ttwelve");
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("report.PDF"));
        assert!(is_supported("sheet.xls"));
        assert!(!is_supported("archive.zip"));
        assert!(!is_supported("Makefile"));
    }
}

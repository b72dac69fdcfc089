//! Document parsing and text extraction
//!
//! The indexer only needs one capability from a parser: turn a source file
//! into markdown text and save it somewhere the engine can reload it. Rich
//! formats (PDF, Office, OCR) are expected to come from other
//! [`DocumentParser`] implementations; [`FileParser`] covers text formats.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Content types we can parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Markdown,
    PlainText,
    Csv,
    Unknown,
}

impl ContentType {
    /// Detect content type from file extension
    pub fn from_extension(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("html") | Some("htm") => ContentType::Html,
            Some("md") | Some("markdown") | Some("mdx") => ContentType::Markdown,
            Some("txt") | Some("text") | Some("rst") | Some("log") => ContentType::PlainText,
            Some("csv") | Some("tsv") => ContentType::Csv,
            _ => ContentType::Unknown,
        }
    }

    /// Detect content type from MIME type
    pub fn from_mime(mime: &str) -> Self {
        let mime_lower = mime.to_lowercase();
        if mime_lower.contains("text/html") || mime_lower.contains("application/xhtml") {
            ContentType::Html
        } else if mime_lower.contains("text/markdown") {
            ContentType::Markdown
        } else if mime_lower.contains("text/csv") {
            ContentType::Csv
        } else if mime_lower.starts_with("text/") {
            ContentType::PlainText
        } else {
            ContentType::Unknown
        }
    }

    /// Extension first, then the guessed MIME type
    pub fn detect(path: &Path) -> Self {
        let detected = Self::from_extension(path);
        if detected != ContentType::Unknown {
            return detected;
        }
        mime_guess::from_path(path)
            .first()
            .map(|m| Self::from_mime(m.essence_str()))
            .unwrap_or(ContentType::Unknown)
    }
}

/// Whether [`FileParser`] can handle `path`
pub fn is_supported(path: &Path) -> bool {
    ContentType::detect(path) != ContentType::Unknown
}

/// Parser collaborator used by the background indexer
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse `source` to markdown, save it at or near `target`, and return
    /// the text with the path actually written
    async fn parse(&self, source: &Path, target: &Path) -> anyhow::Result<(String, PathBuf)>;
}

/// Parser for HTML, markdown, CSV and plain-text files
#[derive(Debug, Default, Clone)]
pub struct FileParser;

impl FileParser {
    pub fn new() -> Self {
        Self
    }

    /// Extract markdown from raw file content
    pub fn to_markdown(content_type: ContentType, raw: &str) -> anyhow::Result<String> {
        let text = match content_type {
            ContentType::Html => {
                let text = html2text::from_read(raw.as_bytes(), 120)
                    .context("Failed to convert HTML")?;
                normalize_whitespace(&text)
            }
            ContentType::Markdown | ContentType::PlainText => normalize_whitespace(raw),
            // Rows stay one per line for the newline separator
            ContentType::Csv => raw.replace("\r\n", "\n"),
            ContentType::Unknown => bail!("Unsupported document format"),
        };
        Ok(text)
    }
}

#[async_trait]
impl DocumentParser for FileParser {
    async fn parse(&self, source: &Path, target: &Path) -> anyhow::Result<(String, PathBuf)> {
        let content_type = ContentType::detect(source);
        if content_type == ContentType::Unknown {
            bail!("Unsupported document format: {}", source.display());
        }

        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let raw = String::from_utf8_lossy(&bytes);
        let text = Self::to_markdown(content_type, &raw)?;
        if text.trim().is_empty() {
            bail!("No text extracted from {}", source.display());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(target, &text)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        debug!(source = %source.display(), chars = text.chars().count(), "Parsed document");
        Ok((text, target.to_path_buf()))
    }
}

/// Normalize line endings, trim trailing spaces and collapse runs of blank lines
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.replace("\r\n", "\n").lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_matches('\n').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_type_detection() {
        assert_eq!(ContentType::detect(Path::new("a.HTML")), ContentType::Html);
        assert_eq!(ContentType::detect(Path::new("a.md")), ContentType::Markdown);
        assert_eq!(ContentType::detect(Path::new("a.csv")), ContentType::Csv);
        assert_eq!(ContentType::detect(Path::new("a.txt")), ContentType::PlainText);
        assert_eq!(ContentType::detect(Path::new("a.png")), ContentType::Unknown);
        assert!(is_supported(Path::new("notes.markdown")));
        assert!(!is_supported(Path::new("report.pdf")));
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_whitespace("a  \r\n\r\n\r\n\nb\n\n"),
            "a\n\nb".to_string()
        );
    }

    #[tokio::test]
    async fn test_parse_html_to_markdown_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("page.html");
        std::fs::write(
            &source,
            "<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>",
        )
        .unwrap();
        let target = temp_dir.path().join("out").join("doc.md");

        let (text, saved) = FileParser::new().parse(&source, &target).await.unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("world"));
        assert_eq!(saved, target);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), text);
    }

    #[tokio::test]
    async fn test_parse_failures() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.md");

        let empty = temp_dir.path().join("empty.txt");
        std::fs::write(&empty, "  \n\n ").unwrap();
        assert!(FileParser::new().parse(&empty, &target).await.is_err());

        let binary = temp_dir.path().join("image.png");
        std::fs::write(&binary, [0u8, 1, 2]).unwrap();
        assert!(FileParser::new().parse(&binary, &target).await.is_err());

        let missing = temp_dir.path().join("missing.md");
        assert!(FileParser::new().parse(&missing, &target).await.is_err());
        assert!(!target.exists());
    }
}

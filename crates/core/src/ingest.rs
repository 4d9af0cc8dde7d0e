use crate::classifier::classify_with_snippet;
use crate::config::{ExtractionConfig, PriorityWeights};
use crate::error::IngestError;
use crate::models::LogicalDocument;
use crate::pdf::{split_pages, PdfExtractor};
use crate::text::decode_text;
use scraper::Html;
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 5] = ["zip", "pdf", "txt", "html", "htm"];

/// Archives and loose documents under `folder`, sorted by path.
pub fn discover_archives(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    Ok(digest_bytes(&bytes))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn archive_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })
}

/// One stripped text node per line; script and style content is ignored.
pub fn html_to_text(raw: &[u8]) -> String {
    let document = Html::parse_document(&decode_text(raw));
    let mut lines = Vec::new();

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| matches!(element.name(), "script" | "style"))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    lines.join("\n")
}

/// Priority score of a document; lower is read first.
pub fn document_priority(name: &str, text: &str, weights: &PriorityWeights) -> i32 {
    let name = name.to_lowercase();
    let text = text.to_lowercase();

    let mut score = weights.base;
    if name.contains("despacho") {
        score -= weights.despacho_name;
    }
    if name.contains("laudo") {
        score -= weights.laudo_name;
    }
    if text.contains("autoriz") || text.contains("honor") {
        score -= weights.authorization_text;
    }
    if name.contains("certidao") {
        score -= weights.certidao_name;
    }
    if name.contains("laudo") {
        score -= weights.laudo_name_extra;
    }
    if name.ends_with(".html") || name.ends_with(".htm") {
        score -= weights.html_name;
    }
    score
}

pub fn document_importance(score: i32, weights: &PriorityWeights) -> u32 {
    u32::try_from((weights.importance_ceiling - score).max(1)).unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

/// Text content of one archive, ordered by priority.
#[derive(Debug, Clone)]
pub struct LoadedArchive {
    pub name: String,
    pub path: PathBuf,
    pub checksum: String,
    pub size_bytes: u64,
    pub documents: Vec<LogicalDocument>,
    pub skipped_entries: Vec<SkippedEntry>,
}

pub struct DocumentLoader<'a> {
    extractor: &'a dyn PdfExtractor,
    config: &'a ExtractionConfig,
}

impl<'a> DocumentLoader<'a> {
    pub fn new(extractor: &'a dyn PdfExtractor, config: &'a ExtractionConfig) -> Self {
        Self { extractor, config }
    }

    /// Loads a `.zip` archive, or a loose `.pdf`/`.txt`/`.html` file treated
    /// as a one-entry archive.
    pub fn load(&self, path: &Path) -> Result<LoadedArchive, IngestError> {
        let name = archive_name(path)?;
        let bytes = fs::read(path)?;
        let checksum = digest_bytes(&bytes);
        let size_bytes = bytes.len() as u64;

        let mut skipped_entries = Vec::new();
        let entries = if name.to_lowercase().ends_with(".zip") {
            read_zip_entries(&bytes, &mut skipped_entries)?
        } else {
            vec![(name.clone(), bytes)]
        };

        let documents = self.documents_from_entries(entries, &mut skipped_entries);
        for skipped in &skipped_entries {
            warn!(archive = %name, entry = %skipped.name, reason = %skipped.reason, "skipped unreadable entry");
        }

        Ok(LoadedArchive {
            name,
            path: path.to_path_buf(),
            checksum,
            size_bytes,
            documents,
            skipped_entries,
        })
    }

    fn documents_from_entries(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        skipped: &mut Vec<SkippedEntry>,
    ) -> Vec<LogicalDocument> {
        let mut raw: Vec<(String, String)> = Vec::new();

        let single_pdf = entries.len() == 1 && entries[0].0.to_lowercase().ends_with(".pdf");
        if single_pdf {
            let (name, bytes) = &entries[0];
            match self.extractor.extract_pages(bytes) {
                Ok(pages) => {
                    let texts: Vec<String> = pages.into_iter().map(|page| page.text).collect();
                    raw.extend(
                        split_pages(&texts, name)
                            .into_iter()
                            .map(|doc| (doc.name, doc.text)),
                    );
                    debug!(entry = %name, documents = raw.len(), "split combined pdf");
                }
                Err(error) => skipped.push(SkippedEntry {
                    name: name.clone(),
                    reason: error.to_string(),
                }),
            }
        } else {
            for (name, bytes) in entries {
                match self.entry_text(&name, &bytes) {
                    Ok(Some(text)) if !text.trim().is_empty() => raw.push((name, text)),
                    Ok(_) => {}
                    Err(error) => skipped.push(SkippedEntry {
                        name,
                        reason: error.to_string(),
                    }),
                }
            }
        }

        let weights = &self.config.priority;
        let mut documents: Vec<(i32, LogicalDocument)> = raw
            .into_iter()
            .map(|(name, text)| {
                let score = document_priority(&name, &text, weights);
                let bucket = classify_with_snippet(&name, &text, self.config.classifier_snippet_chars);
                let document = LogicalDocument::new(name, text, bucket)
                    .with_importance(document_importance(score, weights));
                (score, document)
            })
            .collect();

        documents.sort_by_key(|(score, document)| (*score, Reverse(document.text.len())));
        documents.into_iter().map(|(_, document)| document).collect()
    }

    /// Text of a single entry; `None` for unsupported entry types.
    fn entry_text(&self, name: &str, bytes: &[u8]) -> Result<Option<String>, IngestError> {
        let lower = name.to_lowercase();
        if lower.ends_with(".html") || lower.ends_with(".htm") || lower.contains("despacho") {
            return Ok(Some(html_to_text(bytes)));
        }
        if lower.ends_with(".pdf") {
            let pages = self.extractor.extract_pages(bytes)?;
            let text = pages
                .into_iter()
                .map(|page| page.text)
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(Some(text));
        }
        if lower.ends_with(".txt") {
            return Ok(Some(decode_text(bytes)));
        }
        Ok(None)
    }
}

fn read_zip_entries(
    bytes: &[u8],
    skipped: &mut Vec<SkippedEntry>,
) -> Result<Vec<(String, Vec<u8>)>, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::new();

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(error) => {
                skipped.push(SkippedEntry {
                    name: format!("#{index}"),
                    reason: error.to_string(),
                });
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }

        let name = file.name().to_string();
        let mut content = Vec::new();
        match file.read_to_end(&mut content) {
            Ok(_) => entries.push((name, content)),
            Err(error) => skipped.push(SkippedEntry {
                name,
                reason: error.to_string(),
            }),
        }
    }

    Ok(entries)
}

/// Raw bytes of one named member of a zip archive, if present.
pub fn read_zip_member(path: &Path, member: &str) -> Result<Option<Vec<u8>>, IngestError> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = match archive.by_name(member) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Ok(Some(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bucket;
    use crate::pdf::{LopdfExtractor, PageText};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    struct PagesExtractor(Vec<&'static str>);

    impl PdfExtractor for PagesExtractor {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(index, text)| PageText {
                    number: index as u32 + 1,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = zip::ZipWriter::new(File::create(path)?);
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default())?;
            writer.write_all(content)?;
        }
        writer.finish()?;
        Ok(())
    }

    #[test]
    fn discover_archives_is_recursive_and_filtered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        fs::write(base.join("a.zip"), b"PK")?;
        fs::write(nested.join("b.PDF"), b"%PDF-1.4")?;
        fs::write(base.join("notes.md"), b"ignored")?;

        let files = discover_archives(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.zip");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn html_text_keeps_one_node_per_line() {
        let html = b"<html><head><style>p{}</style><script>var x=1;</script></head>\
                     <body><p> Processo n\xc2\xba 1 </p><div>Perito: <b>Maria</b></div></body></html>";
        let text = html_to_text(html);
        assert_eq!(text, "Processo nº 1\nPerito:\nMaria");
    }

    #[test]
    fn priority_prefers_despacho_and_longer_text() {
        let weights = PriorityWeights::default();
        assert_eq!(document_priority("despacho.html", "honorários", &weights), 1);
        assert_eq!(document_priority("laudo.pdf", "", &weights), 4);
        assert_eq!(document_priority("outro.txt", "", &weights), 10);
        assert_eq!(document_importance(1, &weights), 19);
        assert_eq!(document_importance(25, &weights), 1);
    }

    #[test]
    fn zip_entries_are_classified_and_ordered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("caso.zip");
        write_zip(
            &path,
            &[
                ("anexo.txt", "texto qualquer".as_bytes()),
                ("despacho_123.html", "<p>Diretoria Especial</p>".as_bytes()),
                ("imagem.png", b"\x89PNG".as_slice()),
            ],
        )?;

        let config = ExtractionConfig::default();
        let extractor = LopdfExtractor;
        let loaded = DocumentLoader::new(&extractor, &config).load(&path)?;

        assert_eq!(loaded.name, "caso.zip");
        assert_eq!(loaded.documents.len(), 2);
        assert_eq!(loaded.documents[0].name, "despacho_123.html");
        assert_eq!(loaded.documents[0].bucket, Bucket::Principal);
        assert_eq!(loaded.documents[1].bucket, Bucket::Outro);
        assert!(loaded.skipped_entries.is_empty());
        Ok(())
    }

    #[test]
    fn unreadable_pdf_entry_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("caso.zip");
        write_zip(
            &path,
            &[
                ("quebrado.pdf", b"%PDF-1.4\n%broken".as_slice()),
                ("nota.txt", "conteúdo".as_bytes()),
            ],
        )?;

        let config = ExtractionConfig::default();
        let extractor = LopdfExtractor;
        let loaded = DocumentLoader::new(&extractor, &config).load(&path)?;

        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.skipped_entries.len(), 1);
        assert_eq!(loaded.skipped_entries[0].name, "quebrado.pdf");
        Ok(())
    }

    #[test]
    fn single_pdf_entry_is_split_by_footer() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("processo.zip");
        write_zip(&path, &[("processo.pdf", b"%PDF".as_slice())])?;

        let config = ExtractionConfig::default();
        let extractor = PagesExtractor(vec![
            "1\notnemucod\nDespacho - Assunto: Autorização de pagamento",
            "2\notnemucod\nLaudo pericial",
        ]);
        let loaded = DocumentLoader::new(&extractor, &config).load(&path)?;

        let names: Vec<&str> = loaded.documents.iter().map(|doc| doc.name.as_str()).collect();
        assert_eq!(names, ["processo_doc01.pdf", "processo_doc02.pdf"]);
        assert_eq!(loaded.documents[0].bucket, Bucket::Principal);
        assert_eq!(loaded.documents[1].bucket, Bucket::Laudo);
        Ok(())
    }

    #[test]
    fn loose_text_file_is_a_one_entry_archive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("certidao.txt");
        fs::write(&path, [b'P', b'e', b'r', b'i', b't', b'o', b':', b' ', b'J', b'o', 0xe3, b'o'])?;

        let config = ExtractionConfig::default();
        let extractor = LopdfExtractor;
        let loaded = DocumentLoader::new(&extractor, &config).load(&path)?;

        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.documents[0].text, "Perito: João");
        Ok(())
    }

    #[test]
    fn corrupt_zip_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("ruim.zip");
        fs::write(&path, b"not a zip")?;

        let config = ExtractionConfig::default();
        let extractor = LopdfExtractor;
        assert!(DocumentLoader::new(&extractor, &config).load(&path).is_err());
        Ok(())
    }
}

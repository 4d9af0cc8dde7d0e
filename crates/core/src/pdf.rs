use crate::error::IngestError;
use lopdf::Document;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// "documento" written backwards, as it appears in the footer watermark of
/// combined case PDFs.
pub const FOOTER_MARKER: &str = "otnemucod";

/// How many characters before the marker may hold the reversed document id.
pub const FOOTER_ID_WINDOW: usize = 12;

static FOOTER_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3})\s*$").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    /// Text of every page in order; pages without text are kept as empty
    /// strings so page positions survive.
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(IngestError::PdfParse(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages)
    }
}

/// Page-local document id carried by the footer marker: up to three digits
/// right before the marker, printed in reverse.
pub fn footer_document_id(page_text: &str) -> Option<u32> {
    let lowered = page_text.to_lowercase();
    let index = lowered.find(FOOTER_MARKER)?;

    let before: Vec<char> = lowered[..index].chars().collect();
    let start = before.len().saturating_sub(FOOTER_ID_WINDOW);
    let window: String = before[start..].iter().collect();

    let digits = FOOTER_ID_RE.captures(&window)?.get(1)?.as_str();
    digits.chars().rev().collect::<String>().parse().ok()
}

/// A sub-document recovered from a combined PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitDocument {
    pub name: String,
    pub text: String,
}

/// Groups pages of a combined PDF by footer id.
///
/// Pages without a fresh id join the currently open id; pages seen before any
/// id are buffered and join the first id found. Leftover buffered pages go to
/// id 0, which like any non-positive id is renamed to the smallest positive
/// id not used by a real document.
pub fn split_pages(pages: &[String], base_name: &str) -> Vec<SplitDocument> {
    let mut groups: Vec<(u32, Vec<&str>)> = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut current: Option<u32> = None;

    fn group_for<'a, 'b>(groups: &'b mut Vec<(u32, Vec<&'a str>)>, id: u32) -> &'b mut Vec<&'a str> {
        let position = match groups.iter().position(|(existing, _)| *existing == id) {
            Some(position) => position,
            None => {
                groups.push((id, Vec::new()));
                groups.len() - 1
            }
        };
        &mut groups[position].1
    }

    for page in pages {
        if let Some(id) = footer_document_id(page) {
            current = Some(id);
            let group = group_for(&mut groups, id);
            group.append(&mut buffer);
            group.push(page);
            continue;
        }
        match current {
            Some(id) => group_for(&mut groups, id).push(page),
            None if !page.is_empty() => buffer.push(page),
            None => {}
        }
    }

    if !buffer.is_empty() {
        let target = current.unwrap_or(0);
        group_for(&mut groups, target).append(&mut buffer);
    }

    let stem = Path::new(base_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("documento");

    let used: Vec<u32> = groups.iter().map(|(id, _)| *id).filter(|id| *id > 0).collect();
    let mut next_free = 1u32;
    let mut documents = Vec::new();

    for (id, chunks) in groups {
        let text = chunks
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();
        if text.is_empty() {
            continue;
        }

        let label = if id > 0 {
            id
        } else {
            while used.contains(&next_free) {
                next_free += 1;
            }
            next_free += 1;
            next_free - 1
        };

        documents.push(SplitDocument {
            name: format!("{stem}_doc{label:02}.pdf"),
            text,
        });
    }

    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn footer_id_is_read_reversed() {
        let text = "0-12345.67890.00000.11111.EMDA\n,odanissa\n1\nanigáp\n41\notnemucoD";
        assert_eq!(footer_document_id(text), Some(14));
        assert_eq!(footer_document_id("sem marcador"), None);
        assert_eq!(footer_document_id("otnemucod no início"), None);
    }

    #[test]
    fn cover_pages_join_the_first_document() {
        let docs = split_pages(
            &pages(&[
                "Poder Judiciário\nProcesso Administrativo 2023",
                "1\notnemucoD\nDespacho – Assunto: Autorização de pagamento de honorários ao perito",
                "1\notnemucoD\nSegue o despacho com os dados do promovente",
                "2\notnemucoD\nLaudo pericial descrevendo conclusões finais",
            ]),
            "consolidado.pdf",
        );

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].name, "consolidado_doc01.pdf");
        assert_eq!(docs[1].name, "consolidado_doc02.pdf");
        assert!(docs[0].text.starts_with("Poder Judiciário"));
        assert!(docs[0].text.contains("Segue o despacho"));
    }

    #[test]
    fn pdf_without_markers_becomes_one_document() {
        let docs = split_pages(&pages(&["Conteúdo breve sem marcador explícito"]), "unico.pdf");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "unico_doc01.pdf");
    }

    #[test]
    fn synthesized_ids_avoid_real_ids() {
        let docs = split_pages(
            &pages(&["0\notnemucod\nprimeiro", "1\notnemucod\nsegundo"]),
            "misto.pdf",
        );
        let names: Vec<&str> = docs.iter().map(|doc| doc.name.as_str()).collect();
        assert_eq!(names, ["misto_doc02.pdf", "misto_doc01.pdf"]);
    }

    #[test]
    fn empty_pages_produce_nothing() {
        assert!(split_pages(&pages(&["", "  "]), "vazio.pdf").is_empty());
    }

    #[test]
    fn unreadable_bytes_are_a_parse_error() {
        let result = LopdfExtractor.extract_pages(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }
}

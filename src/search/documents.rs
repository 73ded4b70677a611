use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::utils::truncate_chars;

/// Longest page text handed to the prompt builder
const MAX_EXCERPT_CHARS: usize = 1500;

/// Extracted-text exporters separate pages with a form feed
const PAGE_BREAK: char = '\u{000C}';

const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub pdf_id: String,
    pub filename: String,
    pub title: String,
    pub page_count: u32,
}

/// A document and its page texts (page 1 first)
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub info: DocumentInfo,
    pub pages: Vec<String>,
}

/// One ranked page hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentExcerpt {
    pub pdf_id: String,
    pub filename: String,
    pub title: String,
    pub page: u32,
    pub text: String,
}

pub trait DocumentIndex: Send + Sync {
    fn is_empty(&self) -> bool;

    /// Ranked excerpts for `query`. With `pdf_ids`, every page of those documents is
    /// returned in page order instead of keyword hits.
    fn search(&self, query: &str, pdf_ids: Option<&[String]>, limit: usize) -> Vec<DocumentExcerpt>;

    fn document(&self, pdf_id: &str) -> Option<DocumentInfo>;
}

#[derive(Clone, Default)]
pub struct InMemoryDocumentIndex {
    inner: Arc<DashMap<String, DocumentRecord>>,
}

impl InMemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: DocumentRecord) {
        self.inner.insert(record.info.pdf_id.clone(), record);
    }

    pub fn remove(&self, pdf_id: &str) -> Option<DocumentRecord> {
        self.inner.remove(pdf_id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Index every `.txt`/`.md` file directly under `dir`, returning how many were added.
    /// The file stem becomes the document id and its first non-empty line the title.
    /// Unreadable files are skipped with a warning.
    pub fn load_dir(&self, dir: &Path) -> io::Result<usize> {
        let mut loaded = 0;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_text = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if !path.is_file() || !is_text {
                continue;
            }

            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                    continue;
                }
            };

            match text_record(&path, &text) {
                Some(record) => {
                    debug!(pdf_id = %record.info.pdf_id, pages = record.pages.len(), "Indexed document");
                    self.insert(record);
                    loaded += 1;
                }
                None => debug!(path = %path.display(), "Skipping empty document"),
            }
        }

        info!(dir = %dir.display(), documents = loaded, "Loaded documents");
        Ok(loaded)
    }

    fn excerpt(record: &DocumentRecord, page_index: usize, text: &str) -> DocumentExcerpt {
        DocumentExcerpt {
            pdf_id: record.info.pdf_id.clone(),
            filename: record.info.filename.clone(),
            title: record.info.title.clone(),
            page: page_index as u32 + 1,
            text: truncate_chars(text, MAX_EXCERPT_CHARS).to_string(),
        }
    }
}

fn text_record(path: &Path, text: &str) -> Option<DocumentRecord> {
    let pdf_id = path.file_stem()?.to_str()?.to_string();
    let filename = path.file_name()?.to_str()?.to_string();

    let pages: Vec<String> = text
        .split(PAGE_BREAK)
        .map(|page| page.trim().to_string())
        .collect();
    if pages.iter().all(|page| page.is_empty()) {
        return None;
    }

    let title = text
        .lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .unwrap_or(pdf_id.as_str())
        .to_string();

    Some(DocumentRecord {
        info: DocumentInfo {
            pdf_id,
            filename,
            title,
            page_count: pages.len() as u32,
        },
        pages,
    })
}

/// A page matches when it contains the whole query or any query word longer than two
/// characters
fn page_matches(query: &str, words: &[&str], text_lower: &str) -> bool {
    text_lower.contains(query) || words.iter().any(|w| w.len() > 2 && text_lower.contains(w))
}

fn relevance(words: &[&str], text_lower: &str) -> usize {
    words.iter().filter(|w| text_lower.contains(*w)).count()
}

impl DocumentIndex for InMemoryDocumentIndex {
    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn search(&self, query: &str, pdf_ids: Option<&[String]>, limit: usize) -> Vec<DocumentExcerpt> {
        if let Some(ids) = pdf_ids.filter(|ids| !ids.is_empty()) {
            let mut results = Vec::new();
            for id in ids {
                if let Some(record) = self.inner.get(id) {
                    for (i, text) in record.pages.iter().enumerate() {
                        results.push(Self::excerpt(&record, i, text));
                    }
                }
            }
            results.truncate(limit);
            return results;
        }

        let query_lower = query.to_lowercase();
        let words: Vec<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut scored: Vec<(usize, DocumentExcerpt)> = Vec::new();
        for entry in self.inner.iter() {
            let record = entry.value();
            for (i, text) in record.pages.iter().enumerate() {
                let text_lower = text.to_lowercase();
                if page_matches(&query_lower, &words, &text_lower) {
                    scored.push((relevance(&words, &text_lower), Self::excerpt(record, i, text)));
                }
            }
        }

        // Most query words first; id and page break ties so results are stable
        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .cmp(a_score)
                .then_with(|| a.pdf_id.cmp(&b.pdf_id))
                .then_with(|| a.page.cmp(&b.page))
        });

        scored.into_iter().take(limit).map(|(_, excerpt)| excerpt).collect()
    }

    fn document(&self, pdf_id: &str) -> Option<DocumentInfo> {
        self.inner.get(pdf_id).map(|record| record.info.clone())
    }
}

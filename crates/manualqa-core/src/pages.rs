//! Extracted page sources on disk.
//!
//! A manual is provided either as `<id>.pages.json` (an array of
//! `{page_number, page_label?, text}`) or as `<id>.txt` with pages separated by
//! form feeds, which is what `pdftotext` writes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{ManualId, PageRecord};

const FORM_FEED: char = '\x0c';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualSource {
    pub manual_id: ManualId,
    pub path: PathBuf,
}

impl ManualSource {
    pub fn load_pages(&self) -> Result<Vec<PageRecord>> {
        load_pages(&self.path)
    }
}

/// Find manual sources under `root`, one per manual id. When both forms exist
/// for an id, the `.pages.json` file wins.
pub fn discover(root: &Path) -> Result<Vec<ManualSource>> {
    if !root.is_dir() {
        return Err(Error::NotFound(format!("manuals directory {}", root.display())));
    }
    let mut by_id: BTreeMap<ManualId, PathBuf> = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        let is_json = name.ends_with(".pages.json");
        if !is_json && !name.ends_with(".txt") {
            continue;
        }
        let id = ManualId::from_path(path);
        let keep_existing = by_id.get(&id).is_some_and(|p| is_pages_json(p));
        if !keep_existing {
            by_id.insert(id, path.to_path_buf());
        }
    }
    Ok(by_id.into_iter().map(|(manual_id, path)| ManualSource { manual_id, path }).collect())
}

fn is_pages_json(path: &Path) -> bool {
    path.file_name().and_then(|s| s.to_str()).is_some_and(|n| n.ends_with(".pages.json"))
}

pub fn load_pages(path: &Path) -> Result<Vec<PageRecord>> {
    let content = read_file_content(path)?;
    let pages = if is_pages_json(path) {
        let mut pages: Vec<PageRecord> = serde_json::from_str(&content)?;
        pages.sort_by_key(|p| p.page_number);
        pages
    } else {
        split_form_feed(&content)
    };
    if pages.is_empty() {
        warn!(path = %path.display(), "manual source has no pages");
    }
    Ok(pages)
}

/// Split form-feed separated text into numbered pages. The empty page after a
/// trailing form feed is dropped.
pub fn split_form_feed(content: &str) -> Vec<PageRecord> {
    let body = content.strip_suffix(FORM_FEED).unwrap_or(content);
    if body.is_empty() {
        return Vec::new();
    }
    body.split(FORM_FEED)
        .enumerate()
        .map(|(i, text)| PageRecord::new(i as u32 + 1, text))
        .collect()
}

fn read_file_content(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(path)?).to_string()),
    }
}

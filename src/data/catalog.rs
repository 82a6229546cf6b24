use crate::error::RegistrationError;
use std::path::{Path, PathBuf};

/// File extensions (lowercase) that are considered image files
pub const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg", "bmp"];

/// One image file in the input folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub file_name: String,
    /// Lowercase file stem used for token matching
    pub base_name: String,
}

impl CatalogEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            base_name,
        }
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.base_name.contains(&token.to_lowercase())
    }
}

/// The files making up one imaging round
#[derive(Debug, Clone)]
pub struct ImageRound {
    pub index: usize,
    /// Non-reference channels, ascending by file name
    pub channels: Vec<CatalogEntry>,
    /// Only set for round 1
    pub reference: Option<CatalogEntry>,
}

/// Image files of a flat input folder, ascending by file name.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    entries: Vec<CatalogEntry>,
}

impl ImageCatalog {
    /// List eligible image files directly inside `folder`. Hidden files and
    /// subdirectories are skipped.
    pub fn scan(folder: &Path) -> Result<Self, RegistrationError> {
        let read_dir = std::fs::read_dir(folder).map_err(|e| RegistrationError::io(folder, e))?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| RegistrationError::io(folder, e))?;
            let path = entry.path();
            if !path.is_file() || !is_image_file(&path) {
                continue;
            }
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            if !hidden {
                paths.push(path);
            }
        }

        Ok(Self::from_paths(paths))
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut entries: Vec<CatalogEntry> = paths.into_iter().map(CatalogEntry::new).collect();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Files whose base name contains the common-marker token, in file name order.
    /// The first one is the run's reference image.
    pub fn marker_files(&self, marker: &str) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| e.contains_token(marker))
            .cloned()
            .collect()
    }

    /// Non-reference channels of round `round`: base name contains
    /// `{keyword}{round}` and not the marker token.
    ///
    /// Matching is by substring, so `Layer1` also matches `Layer10`.
    pub fn round_channels(&self, keyword: &str, round: usize, marker: &str) -> Vec<CatalogEntry> {
        let token = round_token(keyword, round);
        self.entries
            .iter()
            .filter(|e| e.contains_token(&token) && !e.contains_token(marker))
            .cloned()
            .collect()
    }

    /// Assign files to rounds `1..=rounds`. Round 1 also carries the reference.
    pub fn rounds(&self, marker: &str, keyword: &str, rounds: usize) -> Vec<ImageRound> {
        let reference = self.marker_files(marker).into_iter().next();
        (1..=rounds)
            .map(|index| ImageRound {
                index,
                channels: self.round_channels(keyword, index, marker),
                reference: if index == 1 { reference.clone() } else { None },
            })
            .collect()
    }
}

pub fn round_token(keyword: &str, round: usize) -> String {
    format!("{keyword}{round}")
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

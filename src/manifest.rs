//! Case metadata manifest.
//!
//! A batch run may come with a CSV manifest keyed by case number, carrying
//! the title, opinion type, publication status, filing date, and source
//! URLs that the court website lists alongside each PDF. Files with no
//! manifest row fall back to filename inference: `39300-3_III.pdf` yields
//! case number `39300-3` and division `III`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::models::CaseMetadata;

/// One manifest row as it appears in the CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestRow {
    pub case_number: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub opinion_type: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[serde(default)]
    pub publication_status: Option<String>,
    #[serde(default)]
    pub file_date: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
    #[serde(default)]
    pub case_info_url: Option<String>,
}

/// Manifest rows keyed by case number.
pub struct Manifest {
    rows: HashMap<String, ManifestRow>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open manifest: {}", path.display()))?;
        let mut rows = HashMap::new();
        for record in reader.deserialize() {
            let row: ManifestRow = record.context("Malformed manifest row")?;
            rows.insert(row.case_number.clone(), row);
        }
        Ok(Self { rows })
    }

    pub fn get(&self, case_number: &str) -> Option<&ManifestRow> {
        self.rows.get(case_number)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Resolve metadata for a PDF: manifest row when one exists, filename
/// inference otherwise.
pub fn metadata_for(path: &Path, manifest: Option<&Manifest>) -> CaseMetadata {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (case_number, division) = infer_from_filename(&filename);

    let row = manifest.and_then(|m| m.get(&case_number));
    let division = row
        .and_then(|r| r.division.clone())
        .or(division);
    let opinion_type = row.and_then(|r| r.opinion_type.clone());
    let court_level = derive_court_level(opinion_type.as_deref());

    CaseMetadata {
        case_number,
        division,
        title: row.and_then(|r| r.title.clone()),
        opinion_type,
        court_level,
        publication_status: row.and_then(|r| r.publication_status.clone()),
        file_date: row.and_then(|r| r.file_date.clone()),
        pdf_url: row.and_then(|r| r.pdf_url.clone()),
        case_info_url: row.and_then(|r| r.case_info_url.clone()),
        pdf_filename: filename,
    }
}

/// Split a filename stem at its last underscore into case number and
/// division. A stem without an underscore is all case number.
pub fn infer_from_filename(filename: &str) -> (String, Option<String>) {
    let stem = filename
        .strip_suffix(".pdf")
        .or_else(|| filename.strip_suffix(".PDF"))
        .unwrap_or(filename);
    match stem.rsplit_once('_') {
        Some((case_number, division)) if !division.is_empty() => {
            (case_number.to_string(), Some(division.to_string()))
        }
        _ => (stem.to_string(), None),
    }
}

/// Court level from the opinion type string. Unrecognized types pass
/// through; a missing type is "Unknown".
pub fn derive_court_level(opinion_type: Option<&str>) -> String {
    match opinion_type {
        Some(t) => {
            let lower = t.to_lowercase();
            if lower.contains("supreme") {
                "Supreme Court".to_string()
            } else if lower.contains("appeals") || lower.contains("appellate") {
                "Court of Appeals".to_string()
            } else {
                t.to_string()
            }
        }
        None => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn filename_inference_splits_division() {
        assert_eq!(
            infer_from_filename("39300-3_III.pdf"),
            ("39300-3".to_string(), Some("III".to_string()))
        );
        assert_eq!(
            infer_from_filename("1015691_I.pdf"),
            ("1015691".to_string(), Some("I".to_string()))
        );
        assert_eq!(infer_from_filename("995823.pdf"), ("995823".to_string(), None));
    }

    #[test]
    fn court_level_derivation() {
        assert_eq!(
            derive_court_level(Some("Supreme Court Opinion")),
            "Supreme Court"
        );
        assert_eq!(
            derive_court_level(Some("Court of Appeals Published Opinion")),
            "Court of Appeals"
        );
        assert_eq!(derive_court_level(Some("Commissioner Ruling")), "Commissioner Ruling");
        assert_eq!(derive_court_level(None), "Unknown");
    }

    #[test]
    fn manifest_row_overrides_filename() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "case_number,title,opinion_type,division,publication_status,file_date,pdf_url,case_info_url"
        )
        .unwrap();
        writeln!(
            f,
            "39300-3,State v. Smith,Court of Appeals Published Opinion,III,Published,2024-03-14,,"
        )
        .unwrap();
        let manifest = Manifest::load(f.path()).unwrap();
        assert_eq!(manifest.len(), 1);

        let meta = metadata_for(Path::new("/in/39300-3_III.pdf"), Some(&manifest));
        assert_eq!(meta.case_number, "39300-3");
        assert_eq!(meta.title.as_deref(), Some("State v. Smith"));
        assert_eq!(meta.court_level, "Court of Appeals");
        assert_eq!(meta.division.as_deref(), Some("III"));
        assert_eq!(meta.file_date.as_deref(), Some("2024-03-14"));
    }

    #[test]
    fn missing_manifest_row_falls_back_to_filename() {
        let meta = metadata_for(Path::new("/in/87654-1_II.pdf"), None);
        assert_eq!(meta.case_number, "87654-1");
        assert_eq!(meta.division.as_deref(), Some("II"));
        assert_eq!(meta.court_level, "Unknown");
        assert_eq!(meta.pdf_filename, "87654-1_II.pdf");
    }
}

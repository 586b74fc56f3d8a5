//! Dimension table resolution with per-run caching.
//!
//! Case types, stage types, document types, courts, and the two-level legal
//! taxonomy are all get-or-create lookups. A resolver is constructed per
//! batch run and carries its own cache; nothing here is global state.
//! Concurrent creators are resolved at the database with insert-or-ignore
//! followed by a re-select.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Canonical category spellings for taxonomy placement. The model returns
/// free-form category names; this folds the common variants together.
const CATEGORY_NORMALIZATION: &[(&str, &str)] = &[
    ("tort", "Tort Law"),
    ("tort law", "Tort Law"),
    ("torts", "Tort Law"),
    ("criminal", "Criminal Law"),
    ("criminal law", "Criminal Law"),
    ("civil", "Civil Procedure"),
    ("civil law", "Civil Procedure"),
    ("civil procedure", "Civil Procedure"),
    ("constitutional", "Constitutional Law"),
    ("constitutional law", "Constitutional Law"),
    ("administrative", "Administrative Law"),
    ("administrative law", "Administrative Law"),
    ("admin law", "Administrative Law"),
    ("family", "Family Law"),
    ("family law", "Family Law"),
    ("domestic", "Family Law"),
    ("domestic relations", "Family Law"),
    ("property", "Property Law"),
    ("property law", "Property Law"),
    ("real property", "Property Law"),
    ("real estate", "Property Law"),
    ("contract", "Contract Law"),
    ("contracts", "Contract Law"),
    ("contract law", "Contract Law"),
    ("employment", "Employment Law"),
    ("employment law", "Employment Law"),
    ("labor", "Employment Law"),
    ("labor law", "Employment Law"),
    ("evidence", "Evidence"),
    ("evidentiary", "Evidence"),
];

/// Fold a model-supplied category name onto its canonical spelling.
/// Unrecognized names pass through trimmed.
pub fn normalize_category(raw: &str) -> String {
    let key = raw.trim().to_lowercase();
    for (variant, canonical) in CATEGORY_NORMALIZATION {
        if key == *variant {
            return canonical.to_string();
        }
    }
    raw.trim().to_string()
}

#[derive(Hash, PartialEq, Eq, Clone)]
enum DimKey {
    CaseType(String),
    StageType(String),
    DocumentType(String),
    Court(String),
    Taxonomy(String, String),
}

/// Get-or-create front-end for the dimension tables.
pub struct DimensionResolver {
    pool: SqlitePool,
    cache: Mutex<HashMap<DimKey, i64>>,
}

impl DimensionResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn case_type_id(&self, name: &str) -> Result<i64> {
        self.simple("case_types", DimKey::CaseType(name.to_string()), name)
            .await
    }

    pub async fn stage_type_id(&self, name: &str) -> Result<i64> {
        self.simple("stage_types", DimKey::StageType(name.to_string()), name)
            .await
    }

    pub async fn document_type_id(&self, name: &str) -> Result<i64> {
        self.simple(
            "document_types",
            DimKey::DocumentType(name.to_string()),
            name,
        )
        .await
    }

    pub async fn court_id(&self, name: &str, level: &str) -> Result<i64> {
        let key = DimKey::Court(name.to_string());
        if let Some(id) = self.cache.lock().await.get(&key) {
            return Ok(*id);
        }
        sqlx::query("INSERT OR IGNORE INTO courts_dim (name, level) VALUES (?, ?)")
            .bind(name)
            .bind(level)
            .execute(&self.pool)
            .await?;
        let id: i64 = sqlx::query_scalar("SELECT court_id FROM courts_dim WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        self.cache.lock().await.insert(key, id);
        Ok(id)
    }

    /// Resolve a (category, subcategory) pair to a taxonomy node, creating
    /// both levels as needed. An empty subcategory resolves to the category.
    pub async fn taxonomy_id(&self, category: &str, subcategory: &str) -> Result<i64> {
        let category = normalize_category(category);
        let subcategory = subcategory.trim().to_string();
        let key = DimKey::Taxonomy(category.clone(), subcategory.clone());
        if let Some(id) = self.cache.lock().await.get(&key) {
            return Ok(*id);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO legal_taxonomy (parent_id, name, level) VALUES (NULL, ?, 'category')",
        )
        .bind(&category)
        .execute(&self.pool)
        .await?;
        let category_id: i64 = sqlx::query_scalar(
            "SELECT taxonomy_id FROM legal_taxonomy WHERE parent_id IS NULL AND name = ? AND level = 'category'",
        )
        .bind(&category)
        .fetch_one(&self.pool)
        .await?;

        let id = if subcategory.is_empty() {
            category_id
        } else {
            sqlx::query(
                "INSERT OR IGNORE INTO legal_taxonomy (parent_id, name, level) VALUES (?, ?, 'subcategory')",
            )
            .bind(category_id)
            .bind(&subcategory)
            .execute(&self.pool)
            .await?;
            sqlx::query_scalar(
                "SELECT taxonomy_id FROM legal_taxonomy WHERE parent_id = ? AND name = ? AND level = 'subcategory'",
            )
            .bind(category_id)
            .bind(&subcategory)
            .fetch_one(&self.pool)
            .await?
        };

        self.cache.lock().await.insert(key, id);
        Ok(id)
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn simple(&self, table: &str, key: DimKey, name: &str) -> Result<i64> {
        if let Some(id) = self.cache.lock().await.get(&key) {
            return Ok(*id);
        }
        sqlx::query(&format!("INSERT OR IGNORE INTO {} (name) VALUES (?)", table))
            .bind(name)
            .execute(&self.pool)
            .await?;
        let id: Option<i64> =
            sqlx::query_scalar(&format!("SELECT id FROM {} WHERE name = ?", table))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        let id = id.ok_or_else(|| anyhow!("dimension row vanished in {}: {}", table, name))?;
        self.cache.lock().await.insert(key, id);
        Ok(id)
    }
}

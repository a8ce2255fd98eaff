//! SQLite FTS5 search index

use super::document::RecipeDocument;
use super::traits::{FulltextIndex, IndexResult};
use crate::graph::TermStemmer;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Column weights for `bm25()`: recipe_id, title, subtitle, description,
/// ingredients, tags.
const RANK: &str = "bm25(recipe_fts, 0.0, 10.0, 4.0, 2.0, 3.0, 3.0)";

/// FTS5-backed recipe index
///
/// Documents live in a `recipe_fts` virtual table keyed by an unindexed
/// `recipe_id` column; tags are also kept in a plain table for exact and
/// enumeration lookups.
///
/// Text is stemmed with the configured [`TermStemmer`] before it reaches
/// FTS5, on both the indexing and the query side, so matching follows the
/// recipe language. The tokenizer itself only folds case and diacritics.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    stemmer: TermStemmer,
}

impl SqliteIndex {
    fn init_schema(conn: &Connection) -> IndexResult<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS recipe_fts USING fts5(
                recipe_id UNINDEXED,
                title,
                subtitle,
                description,
                ingredients,
                tags,
                tokenize = 'unicode61 remove_diacritics 2'
            );

            CREATE TABLE IF NOT EXISTS recipe_tags (
                recipe_id TEXT NOT NULL,
                tag TEXT NOT NULL COLLATE NOCASE,
                PRIMARY KEY (recipe_id, tag)
            );

            CREATE INDEX IF NOT EXISTS idx_recipe_tags_tag ON recipe_tags(tag);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            stemmer: TermStemmer::default(),
        })
    }

    pub fn open_in_memory() -> IndexResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            stemmer: TermStemmer::default(),
        })
    }

    /// Stem indexed text and queries for this language.
    pub fn with_stemmer(mut self, stemmer: TermStemmer) -> Self {
        self.stemmer = stemmer;
        self
    }
}

/// Turn free text into an FTS5 expression: every word must match.
///
/// Words are quoted, so operators and punctuation in user input are inert.
/// Returns `None` when the input has no words.
pub fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

impl FulltextIndex for SqliteIndex {
    fn index_document(&self, doc: &RecipeDocument) -> IndexResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM recipe_fts WHERE recipe_id = ?1",
            params![doc.recipe_id],
        )?;
        tx.execute(
            "DELETE FROM recipe_tags WHERE recipe_id = ?1",
            params![doc.recipe_id],
        )?;
        tx.execute(
            r#"
            INSERT INTO recipe_fts (recipe_id, title, subtitle, description, ingredients, tags)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                doc.recipe_id,
                self.stemmer.stem(&doc.title),
                self.stemmer.stem(&doc.subtitle),
                self.stemmer.stem(&doc.description),
                self.stemmer.stem(&doc.ingredients_text()),
                self.stemmer.stem(&doc.tags_text()),
            ],
        )?;
        for tag in &doc.tags {
            tx.execute(
                "INSERT OR IGNORE INTO recipe_tags (recipe_id, tag) VALUES (?1, ?2)",
                params![doc.recipe_id, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_recipe(&self, recipe_id: &str) -> IndexResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM recipe_fts WHERE recipe_id = ?1", params![recipe_id])?;
        tx.execute("DELETE FROM recipe_tags WHERE recipe_id = ?1", params![recipe_id])?;
        tx.commit()?;
        Ok(())
    }

    fn search_recipes(&self, query: &str, limit: usize) -> IndexResult<Vec<String>> {
        let Some(expr) = match_expression(&self.stemmer.stem(query)) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT recipe_id FROM recipe_fts WHERE recipe_fts MATCH ?1 ORDER BY {}, recipe_id LIMIT ?2",
            RANK
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let ids = stmt
            .query_map(params![expr, limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn search_by_tag(&self, tag: &str) -> IndexResult<Vec<String>> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare_cached("SELECT recipe_id FROM recipe_tags WHERE tag = ?1 ORDER BY recipe_id")?;
        let ids = stmt
            .query_map(params![tag], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn all_tags(&self) -> IndexResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT DISTINCT tag FROM recipe_tags ORDER BY tag")?;
        let tags = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    }

    fn document_count(&self) -> IndexResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM recipe_fts", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

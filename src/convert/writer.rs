//! Database writer
//!
//! The only holder of the output connection. Rows arrive over a channel and
//! are applied in batched transactions; a failed batch is rolled back and
//! ends the run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::OutputRow;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    content TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_title ON articles (title COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    mimetype TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS redirects (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL COLLATE NOCASE,
    target_url TEXT NOT NULL,
    UNIQUE (title, target_url)
);

CREATE TABLE IF NOT EXISTS metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    source_file TEXT NOT NULL,
    tool_version TEXT NOT NULL,
    article_count INTEGER NOT NULL,
    image_count INTEGER NOT NULL,
    generated_at TEXT NOT NULL
);
"#;

const REFS_SCHEMA: &str = "CREATE TEMP TABLE IF NOT EXISTS image_refs (url TEXT PRIMARY KEY);";

/// Database writer errors. All of them are fatal to the run.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Failed to open database '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Failed to create schema: {0}")]
    Schema(#[source] rusqlite::Error),

    #[error("Write transaction failed (batch rolled back): {0}")]
    Transaction(#[source] rusqlite::Error),

    #[error("Failed to write metadata: {0}")]
    Metadata(#[source] rusqlite::Error),

    #[error("Failed to close database: {0}")]
    Close(#[source] rusqlite::Error),
}

/// Counters kept by the writer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub articles_written: u64,
    pub images_written: u64,
    pub redirects_written: u64,
    /// Rows whose url was already present
    pub duplicates_ignored: u64,
    pub batches_committed: u64,
    /// Distinct referenced image urls with no stored image.
    /// Only tracked when images are included.
    pub dangling_image_refs: Option<u64>,
}

/// Contents of the single `metadata` row
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub source_file: String,
    pub tool_version: String,
    pub generated_at: DateTime<Utc>,
}

/// Batched SQLite writer
pub struct DatabaseWriter {
    conn: Connection,
    path: PathBuf,
    batch_size: usize,
    track_refs: bool,
    pending: Vec<OutputRow>,
    stats: WriterStats,
}

impl DatabaseWriter {
    /// Create the output database and its schema.
    ///
    /// With `track_refs`, image references of written articles are recorded
    /// so dangling ones can be counted at the end.
    pub fn open(path: impl AsRef<Path>, batch_size: usize, track_refs: bool) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|e| WriterError::Open {
            path: path.display().to_string(),
            source: e,
        })?;

        // rollback journal: the file on disk is always at a commit boundary
        conn.execute_batch("PRAGMA journal_mode=DELETE; PRAGMA synchronous=NORMAL;")
            .map_err(WriterError::Schema)?;
        conn.execute_batch(SCHEMA).map_err(WriterError::Schema)?;
        if track_refs {
            conn.execute_batch(REFS_SCHEMA).map_err(WriterError::Schema)?;
        }

        debug!("Opened output database {}", path.display());

        Ok(Self {
            conn,
            path,
            batch_size: batch_size.max(1),
            track_refs,
            pending: Vec::with_capacity(batch_size.max(1)),
            stats: WriterStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Number of rows received but not yet committed
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Queue a row, committing once a full batch is pending.
    pub fn write(&mut self, row: OutputRow) -> Result<(), WriterError> {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Receive rows until every sender is gone.
    pub fn drain(&mut self, rx: &mut mpsc::Receiver<OutputRow>) -> Result<(), WriterError> {
        while let Some(row) = rx.blocking_recv() {
            self.write(row)?;
        }
        self.flush()
    }

    /// Commit all pending rows in one transaction.
    pub fn flush(&mut self) -> Result<(), WriterError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let rows = std::mem::take(&mut self.pending);
        let mut articles = 0u64;
        let mut images = 0u64;
        let mut redirects = 0u64;
        let mut duplicates = 0u64;

        let tx = self.conn.transaction().map_err(WriterError::Transaction)?;
        {
            let mut insert_article = tx
                .prepare_cached("INSERT OR IGNORE INTO articles (url, title, content) VALUES (?1, ?2, ?3)")
                .map_err(WriterError::Transaction)?;
            let mut insert_image = tx
                .prepare_cached("INSERT OR IGNORE INTO images (url, mimetype, data) VALUES (?1, ?2, ?3)")
                .map_err(WriterError::Transaction)?;
            let mut insert_redirect = tx
                .prepare_cached("INSERT OR IGNORE INTO redirects (title, target_url) VALUES (?1, ?2)")
                .map_err(WriterError::Transaction)?;

            for row in &rows {
                let changed = match row {
                    OutputRow::Article(article) => {
                        let n = insert_article
                            .execute(params![article.url, article.title, article.content])
                            .map_err(WriterError::Transaction)?;
                        articles += n as u64;
                        if n > 0 && self.track_refs {
                            for url in &article.image_refs {
                                tx.execute("INSERT OR IGNORE INTO temp.image_refs (url) VALUES (?1)", [url])
                                    .map_err(WriterError::Transaction)?;
                            }
                        }
                        n
                    }
                    OutputRow::Image(image) => {
                        let n = insert_image
                            .execute(params![image.url, image.mimetype, image.data])
                            .map_err(WriterError::Transaction)?;
                        images += n as u64;
                        n
                    }
                    OutputRow::Redirect(alias) => {
                        let n = insert_redirect
                            .execute(params![alias.title, alias.target_url])
                            .map_err(WriterError::Transaction)?;
                        redirects += n as u64;
                        n
                    }
                };
                if changed == 0 {
                    debug!("Duplicate url ignored: {}", row.url());
                    duplicates += 1;
                }
            }
        }
        // dropping an uncommitted transaction rolls it back
        tx.commit().map_err(WriterError::Transaction)?;

        self.stats.articles_written += articles;
        self.stats.images_written += images;
        self.stats.redirects_written += redirects;
        self.stats.duplicates_ignored += duplicates;
        self.stats.batches_committed += 1;
        debug!(
            "Committed batch {} ({} rows, {} duplicates)",
            self.stats.batches_committed,
            rows.len(),
            duplicates
        );
        Ok(())
    }

    /// Commit the remaining rows, write the metadata row and close.
    pub fn finish(mut self, metadata: &RunMetadata) -> Result<WriterStats, WriterError> {
        self.flush()?;
        self.count_dangling_refs()?;

        let article_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM articles", [], |r| r.get(0))
            .map_err(WriterError::Metadata)?;
        let image_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get(0))
            .map_err(WriterError::Metadata)?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata
                 (id, source_file, tool_version, article_count, image_count, generated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5)",
                params![
                    metadata.source_file,
                    metadata.tool_version,
                    article_count,
                    image_count,
                    metadata.generated_at.to_rfc3339(),
                ],
            )
            .map_err(WriterError::Metadata)?;

        info!(
            "Wrote {} articles and {} images to {}",
            article_count,
            image_count,
            self.path.display()
        );
        self.close()
    }

    /// Commit the rows already received and close without a metadata row.
    pub fn abort(mut self) -> Result<WriterStats, WriterError> {
        self.flush()?;
        self.count_dangling_refs()?;
        warn!(
            "Output {} left without metadata after {} committed batches",
            self.path.display(),
            self.stats.batches_committed
        );
        self.close()
    }

    fn count_dangling_refs(&mut self) -> Result<(), WriterError> {
        if !self.track_refs {
            return Ok(());
        }
        let dangling: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM temp.image_refs r
                 WHERE NOT EXISTS (SELECT 1 FROM images i WHERE i.url = r.url)",
                [],
                |r| r.get(0),
            )
            .map_err(WriterError::Metadata)?;
        if dangling > 0 {
            warn!("{} referenced images are missing from the output", dangling);
        }
        self.stats.dangling_image_refs = Some(dangling as u64);
        Ok(())
    }

    fn close(self) -> Result<WriterStats, WriterError> {
        let stats = self.stats;
        self.conn.close().map_err(|(_, e)| WriterError::Close(e))?;
        Ok(stats)
    }
}

impl std::fmt::Debug for DatabaseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseWriter")
            .field("path", &self.path)
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::types::{ImageAsset, RedirectAlias, ResolvedArticle};
    use tempfile::TempDir;

    fn article(url: &str, refs: &[&str]) -> OutputRow {
        OutputRow::Article(ResolvedArticle {
            url: url.to_string(),
            title: url.trim_start_matches("A/").to_string(),
            content: format!("<p>{}</p>", url),
            image_refs: refs.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn image(url: &str) -> OutputRow {
        OutputRow::Image(ImageAsset {
            url: url.to_string(),
            mimetype: "image/png".to_string(),
            data: vec![1, 2, 3],
        })
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            source_file: "test.zim".to_string(),
            tool_version: "zimdb test".to_string(),
            generated_at: Utc::now(),
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_batches_and_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let mut writer = DatabaseWriter::open(&path, 2, false).unwrap();
        writer.write(article("A/One", &[])).unwrap();
        assert_eq!(writer.pending(), 1);
        writer.write(article("A/Two", &[])).unwrap();
        assert_eq!(writer.pending(), 0);
        writer.write(image("I/x.png")).unwrap();

        let stats = writer.finish(&metadata()).unwrap();
        assert_eq!(stats.articles_written, 2);
        assert_eq!(stats.images_written, 1);
        assert_eq!(stats.batches_committed, 2);
        assert_eq!(stats.dangling_image_refs, None);

        let conn = Connection::open(&path).unwrap();
        assert_eq!(count(&conn, "articles"), 2);
        assert_eq!(count(&conn, "images"), 1);
        let (source, articles, images, generated): (String, i64, i64, String) = conn
            .query_row(
                "SELECT source_file, article_count, image_count, generated_at FROM metadata WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(source, "test.zim");
        assert_eq!(articles, 2);
        assert_eq!(images, 1);
        assert!(DateTime::parse_from_rfc3339(&generated).is_ok());
    }

    #[test]
    fn test_duplicate_urls_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let mut writer = DatabaseWriter::open(&path, 10, false).unwrap();
        writer.write(article("A/Same", &[])).unwrap();
        writer.write(article("A/Same", &[])).unwrap();
        writer.write(image("I/a.png")).unwrap();
        writer.write(image("I/a.png")).unwrap();
        let stats = writer.finish(&metadata()).unwrap();

        assert_eq!(stats.articles_written, 1);
        assert_eq!(stats.images_written, 1);
        assert_eq!(stats.duplicates_ignored, 2);
    }

    #[test]
    fn test_abort_commits_rows_without_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let mut writer = DatabaseWriter::open(&path, 100, false).unwrap();
        writer.write(article("A/One", &[])).unwrap();
        writer.abort().unwrap();

        let conn = Connection::open(&path).unwrap();
        assert_eq!(count(&conn, "articles"), 1);
        assert_eq!(count(&conn, "metadata"), 0);
    }

    #[test]
    fn test_dangling_image_refs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let mut writer = DatabaseWriter::open(&path, 100, true).unwrap();
        writer
            .write(article("A/One", &["I/present.png", "I/missing.png"]))
            .unwrap();
        writer.write(article("A/Two", &["I/missing.png"])).unwrap();
        writer.write(image("I/present.png")).unwrap();
        let stats = writer.finish(&metadata()).unwrap();

        assert_eq!(stats.dangling_image_refs, Some(1));

        // the tracking table is connection-local
        let conn = Connection::open(&path).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'image_refs'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[tokio::test]
    async fn test_drain_until_senders_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");
        let writer = DatabaseWriter::open(&path, 3, false).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            writer.drain(&mut rx).map(|_| writer)
        });

        for i in 0..10 {
            tx.send(article(&format!("A/{}", i), &[])).await.unwrap();
        }
        drop(tx);

        let writer = handle.await.unwrap().unwrap();
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.stats().articles_written, 10);
        assert_eq!(writer.stats().batches_committed, 4);
    }

    #[test]
    fn test_title_index_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");
        let mut writer = DatabaseWriter::open(&path, 10, false).unwrap();
        writer.write(article("A/Hello", &[])).unwrap();
        writer.finish(&metadata()).unwrap();

        let conn = Connection::open(&path).unwrap();
        let url: String = conn
            .query_row(
                "SELECT url FROM articles WHERE title = 'hELLO' COLLATE NOCASE",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(url, "A/Hello");
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let mut writer = DatabaseWriter::open(&path, 2, false).unwrap();
        writer.write(article("A/One", &[])).unwrap();
        writer.write(article("A/Two", &[])).unwrap();
        assert_eq!(writer.stats().batches_committed, 1);

        {
            let other = Connection::open(&path).unwrap();
            other
                .execute_batch(
                    "CREATE TRIGGER reject_bad BEFORE INSERT ON articles
                     WHEN NEW.url = 'A/Bad'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )
                .unwrap();
        }

        writer.write(article("A/Three", &[])).unwrap();
        let err = writer.write(article("A/Bad", &[])).unwrap_err();
        assert!(matches!(err, WriterError::Transaction(_)));
        assert_eq!(writer.stats().batches_committed, 1);
        assert_eq!(writer.stats().articles_written, 2);
        drop(writer);

        let conn = Connection::open(&path).unwrap();
        let mut stmt = conn.prepare("SELECT url FROM articles ORDER BY url").unwrap();
        let urls: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(urls, vec!["A/One", "A/Two"]);
        assert_eq!(count(&conn, "metadata"), 0);
    }

    #[tokio::test]
    async fn test_drain_stops_at_failed_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");
        let writer = DatabaseWriter::open(&path, 2, false).unwrap();
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON articles
                 WHEN NEW.url = 'A/3'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        for i in 0..6 {
            tx.send(article(&format!("A/{}", i), &[])).await.unwrap();
        }
        drop(tx);

        let result = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            writer.drain(&mut rx)
        })
        .await
        .unwrap();
        assert!(matches!(result, Err(WriterError::Transaction(_))));

        let conn = Connection::open(&path).unwrap();
        assert_eq!(count(&conn, "articles"), 2);
    }

    #[test]
    fn test_redirect_titles_resolve_to_targets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.db");

        let alias = |source: &str, title: &str, target: &str| {
            OutputRow::Redirect(RedirectAlias {
                source_url: source.to_string(),
                title: title.to_string(),
                target_url: target.to_string(),
            })
        };

        let mut writer = DatabaseWriter::open(&path, 10, false).unwrap();
        writer.write(article("A/Hello", &[])).unwrap();
        writer.write(alias("A/Hi", "Hi", "A/Hello")).unwrap();
        writer.write(alias("A/hi", "hi", "A/Hello")).unwrap();
        writer.write(alias("A/Hey", "Hey", "A/Hello")).unwrap();
        let stats = writer.finish(&metadata()).unwrap();

        assert_eq!(stats.articles_written, 1);
        assert_eq!(stats.redirects_written, 2);
        assert_eq!(stats.duplicates_ignored, 1);

        let conn = Connection::open(&path).unwrap();
        let target: String = conn
            .query_row("SELECT target_url FROM redirects WHERE title = 'HI'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(target, "A/Hello");
        assert_eq!(count(&conn, "articles"), 1);
    }

    #[test]
    fn test_open_fails_for_directory() {
        let dir = TempDir::new().unwrap();
        let err = DatabaseWriter::open(dir.path(), 10, false).unwrap_err();
        assert!(matches!(err, WriterError::Open { .. } | WriterError::Schema(_)));
    }
}

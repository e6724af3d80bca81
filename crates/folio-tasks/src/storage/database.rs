//! SQLite document repository
//!
//! Nodes of both kinds live in one `nodes` table keyed by id with a `kind`
//! discriminant; documents, versions and pages hang off it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::repository::{current_of, DocumentRepository};
use crate::types::document::aggregate_text;
use crate::types::{
    Document, DocumentId, DocumentVersion, Folder, FolderId, NewVersion, Node, NodeKind, Page,
    PageId, UserId,
};

/// SQLite-backed document repository
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        repo.migrate()?;
        Ok(repo)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        repo.migrate()?;
        Ok(repo)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
        "#)?;

        conn.execute_batch(r#"
            -- Tree nodes; kind is 'folder' or 'document'
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT REFERENCES nodes(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_parent_id ON nodes(parent_id);

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
                search_text TEXT
            );

            -- Append-only version history
            CREATE TABLE IF NOT EXISTS document_versions (
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                number INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                lang TEXT NOT NULL,
                size INTEGER NOT NULL,
                text TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (document_id, number)
            );

            CREATE TABLE IF NOT EXISTS pages (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                number INTEGER NOT NULL,
                text TEXT NOT NULL,
                normalized_text TEXT,
                normalized INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (document_id, version_number)
                    REFERENCES document_versions(document_id, number) ON DELETE CASCADE,
                UNIQUE(document_id, version_number, number)
            );

            CREATE INDEX IF NOT EXISTS idx_pages_version ON pages(document_id, version_number);
        "#)?;

        tracing::debug!("Database migrations complete");
        Ok(())
    }

    // ==================== Tree Operations ====================

    /// Insert a folder node
    pub fn insert_folder(&self, folder: &Folder) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO nodes (id, parent_id, kind, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                folder.id.to_string(),
                folder.parent_id.map(|p| p.to_string()),
                NodeKind::Folder.as_str(),
                folder.user_id.to_string(),
                folder.title,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Insert a document with its full version history
    pub fn insert_document(&self, document: &Document) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO nodes (id, parent_id, kind, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                document.id.to_string(),
                document.parent_id.map(|p| p.to_string()),
                NodeKind::Document.as_str(),
                document.user_id.to_string(),
                document.title,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.execute(
            "INSERT INTO documents (id, search_text) VALUES (?1, ?2)",
            params![document.id.to_string(), document.search_text],
        )?;
        for version in &document.versions {
            insert_version(&tx, document.id, version)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Insert a raw node row with an arbitrary kind string
    pub fn insert_node_row(&self, id: Uuid, parent: Option<FolderId>, kind: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO nodes (id, parent_id, kind, user_id, title, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                parent.map(|p| p.to_string()),
                kind,
                Uuid::nil().to_string(),
                title,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete a document and everything below it
    pub fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "DELETE FROM nodes WHERE id = ?1 AND kind = 'document'",
            params![id.to_string()],
        )?;
        Ok(count > 0)
    }

    fn load_document(conn: &Connection, id: DocumentId) -> Result<Document> {
        let row = conn
            .query_row(
                r#"
                SELECT n.user_id, n.parent_id, n.title, d.search_text
                FROM nodes n JOIN documents d ON d.id = n.id
                WHERE n.id = ?1 AND n.kind = 'document'
                "#,
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let (user_id, parent_id, title, search_text) = row.ok_or(Error::DocumentNotFound(id))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT number, file_name, lang, size, text, created_at
            FROM document_versions WHERE document_id = ?1 ORDER BY number
            "#,
        )?;
        let version_rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut versions = Vec::with_capacity(version_rows.len());
        for (number, file_name, lang, size, text, created_at) in version_rows {
            let number = to_u32(number, "version number")?;
            versions.push(DocumentVersion {
                number,
                file_name,
                lang,
                size: u64::try_from(size).map_err(|_| {
                    Error::data_integrity(format!("negative size {} on version {}", size, number))
                })?,
                pages: Self::load_pages(conn, id, number)?,
                text,
                created_at: parse_timestamp(&created_at)?,
            });
        }

        Ok(Document {
            id,
            user_id: UserId(parse_uuid(&user_id)?),
            parent_id: parent_id.map(|p| parse_uuid(&p).map(FolderId)).transpose()?,
            title,
            versions,
            search_text,
        })
    }

    fn load_pages(conn: &Connection, id: DocumentId, version: u32) -> Result<Vec<Page>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, number, text, normalized_text, normalized
            FROM pages WHERE document_id = ?1 AND version_number = ?2 ORDER BY number
            "#,
        )?;
        let rows = stmt
            .query_map(params![id.to_string(), version as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(page_id, number, text, normalized_text, normalized)| {
                Ok(Page {
                    id: PageId(parse_uuid(&page_id)?),
                    number: to_u32(number, "page number")?,
                    text,
                    normalized_text,
                    normalized,
                })
            })
            .collect()
    }

    fn current_number(conn: &Connection, id: DocumentId) -> Result<Option<u32>> {
        let number: Option<i64> = conn.query_row(
            "SELECT MAX(number) FROM document_versions WHERE document_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        number.map(|n| to_u32(n, "version number")).transpose()
    }

    fn document_exists(conn: &Connection, id: DocumentId) -> Result<bool> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

impl DocumentRepository for SqliteRepository {
    fn get_document(&self, id: DocumentId) -> Result<Document> {
        let conn = self.conn.lock();
        Self::load_document(&conn, id)
    }

    fn get_current_version(&self, document: &Document) -> Result<DocumentVersion> {
        let stored = self.get_document(document.id)?;
        current_of(&stored)
    }

    fn get_pages(&self, id: DocumentId) -> Result<Vec<Page>> {
        let conn = self.conn.lock();
        if !Self::document_exists(&conn, id)? {
            return Err(Error::DocumentNotFound(id));
        }
        let current = Self::current_number(&conn, id)?
            .ok_or_else(|| Error::data_integrity(format!("document {} has no versions", id)))?;
        Self::load_pages(&conn, id, current)
    }

    fn get_descendants(&self, folder: FolderId) -> Result<Vec<Node>> {
        let conn = self.conn.lock();

        let exists = conn
            .query_row(
                "SELECT 1 FROM nodes WHERE id = ?1 AND kind = 'folder'",
                params![folder.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(Error::FolderNotFound(folder));
        }

        let mut stmt =
            conn.prepare("SELECT id, kind FROM nodes WHERE parent_id = ?1 ORDER BY rowid")?;
        let rows = stmt
            .query_map(params![folder.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, kind)| Ok(Node::from_parts(&kind, parse_uuid(&id)?)))
            .collect()
    }

    fn append_version(
        &self,
        id: DocumentId,
        expected_current: u32,
        version: NewVersion,
    ) -> Result<DocumentVersion> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !Self::document_exists(&tx, id)? {
            return Err(Error::DocumentNotFound(id));
        }
        let found = Self::current_number(&tx, id)?.unwrap_or(0);
        if found != expected_current {
            return Err(Error::VersionConflict {
                document_id: id,
                expected: expected_current,
                found,
            });
        }
        if version.number != expected_current + 1 {
            return Err(Error::data_integrity(format!(
                "version {} cannot follow version {} of document {}",
                version.number, expected_current, id
            )));
        }

        let version = version.into_version();
        insert_version(&tx, id, &version)?;
        tx.commit()?;

        Ok(version)
    }

    fn update_page(&self, id: DocumentId, page: &Page) -> Result<()> {
        let conn = self.conn.lock();
        let current = Self::current_number(&conn, id)?.ok_or(Error::DocumentNotFound(id))?;

        let count = conn.execute(
            r#"
            UPDATE pages SET text = ?1, normalized_text = ?2, normalized = ?3
            WHERE id = ?4 AND document_id = ?5 AND version_number = ?6
            "#,
            params![
                page.text,
                page.normalized_text,
                page.normalized,
                page.id.to_string(),
                id.to_string(),
                current as i64,
            ],
        )?;

        if count == 0 {
            return Err(Error::data_integrity(format!(
                "page {} is not part of the current version of document {}",
                page.id, id
            )));
        }
        Ok(())
    }

    fn update_search_text(&self, id: DocumentId) -> Result<String> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if !Self::document_exists(&tx, id)? {
            return Err(Error::DocumentNotFound(id));
        }
        let current = Self::current_number(&tx, id)?
            .ok_or_else(|| Error::data_integrity(format!("document {} has no versions", id)))?;
        let pages = Self::load_pages(&tx, id, current)?;
        let text = aggregate_text(&pages);

        tx.execute(
            "UPDATE document_versions SET text = ?1 WHERE document_id = ?2 AND number = ?3",
            params![text, id.to_string(), current as i64],
        )?;
        tx.execute(
            "UPDATE documents SET search_text = ?1 WHERE id = ?2",
            params![text, id.to_string()],
        )?;
        tx.commit()?;

        Ok(text)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

fn insert_version(conn: &Connection, id: DocumentId, version: &DocumentVersion) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO document_versions (document_id, number, file_name, lang, size, text, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            id.to_string(),
            version.number as i64,
            version.file_name,
            version.lang,
            i64::try_from(version.size).map_err(|_| {
                Error::data_integrity(format!("size {} does not fit the store", version.size))
            })?,
            version.text,
            version.created_at.to_rfc3339(),
        ],
    )?;

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO pages (id, document_id, version_number, number, text, normalized_text, normalized)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )?;
    for page in &version.pages {
        stmt.execute(params![
            page.id.to_string(),
            id.to_string(),
            version.number as i64,
            page.number as i64,
            page.text,
            page.normalized_text,
            page.normalized,
        ])?;
    }
    Ok(())
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::data_integrity(format!("malformed id '{}': {}", value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::data_integrity(format!("malformed timestamp '{}': {}", value, e)))
}

fn to_u32(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::data_integrity(format!("{} {} out of range", what, value)))
}

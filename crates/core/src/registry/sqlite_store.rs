//! SQLite-backed registry implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Category, ContinentRedirect, Directory, FileDetail, Host, HostCategory, HostCategoryDir,
    HostCategoryUrl, HostCommit, HostFilter, ManifestEntry, MirrorRegistry, RegistryError,
};

const HOST_COLUMNS: &str = "h.id, h.site_id, h.name, h.private, h.admin_active, h.user_active, \
     h.crawl_failures, h.last_crawled, h.last_crawl_duration, h.disable_reason";

fn db_err(e: rusqlite::Error) -> RegistryError {
    RegistryError::Database(e.to_string())
}

/// SQLite-backed mirror registry.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) a registry database file.
    pub fn new(path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory registry (useful for testing).
    pub fn in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::Database("registry connection poisoned".to_string()))
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RegistryError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS site (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                private INTEGER NOT NULL DEFAULT 0,
                admin_active INTEGER NOT NULL DEFAULT 1,
                user_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS host (
                id INTEGER PRIMARY KEY,
                site_id INTEGER NOT NULL REFERENCES site(id),
                name TEXT NOT NULL,
                private INTEGER NOT NULL DEFAULT 0,
                admin_active INTEGER NOT NULL DEFAULT 1,
                user_active INTEGER NOT NULL DEFAULT 1,
                crawl_failures INTEGER NOT NULL DEFAULT 0,
                last_crawled TEXT,
                last_crawl_duration INTEGER,
                disable_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                topdir TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS directory (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                readable INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS directory_file (
                directory_id INTEGER NOT NULL REFERENCES directory(id),
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (directory_id, name)
            );

            CREATE TABLE IF NOT EXISTS host_category (
                id INTEGER PRIMARY KEY,
                host_id INTEGER NOT NULL REFERENCES host(id),
                category_id INTEGER NOT NULL REFERENCES category(id),
                always_up2date INTEGER NOT NULL DEFAULT 0,
                UNIQUE (host_id, category_id)
            );

            CREATE TABLE IF NOT EXISTS host_category_url (
                id INTEGER PRIMARY KEY,
                host_category_id INTEGER NOT NULL REFERENCES host_category(id),
                url TEXT NOT NULL,
                private INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS host_category_dir (
                id INTEGER PRIMARY KEY,
                host_category_id INTEGER NOT NULL REFERENCES host_category(id),
                path TEXT NOT NULL,
                up2date INTEGER NOT NULL DEFAULT 1,
                directory_id INTEGER REFERENCES directory(id),
                UNIQUE (host_category_id, path)
            );

            CREATE TABLE IF NOT EXISTS file_detail (
                id INTEGER PRIMARY KEY,
                directory_id INTEGER NOT NULL REFERENCES directory(id),
                filename TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                size INTEGER,
                sha256 TEXT
            );

            CREATE TABLE IF NOT EXISTS country_continent_redirect (
                country TEXT PRIMARY KEY,
                continent TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_host_category_host ON host_category(host_id);
            CREATE INDEX IF NOT EXISTS idx_hcd_host_category ON host_category_dir(host_category_id);
            CREATE INDEX IF NOT EXISTS idx_file_detail_lookup
                ON file_detail(directory_id, filename, timestamp DESC);
            "#,
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn row_to_host(row: &rusqlite::Row) -> rusqlite::Result<Host> {
        let last_crawled: Option<String> = row.get(7)?;
        let last_crawled = last_crawled.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Ok(Host {
            id: row.get(0)?,
            site_id: row.get(1)?,
            name: row.get(2)?,
            private: row.get(3)?,
            admin_active: row.get(4)?,
            user_active: row.get(5)?,
            crawl_failures: row.get(6)?,
            last_crawled,
            last_crawl_duration: row.get(8)?,
            disable_reason: row.get(9)?,
        })
    }

    fn row_to_file_detail(row: &rusqlite::Row) -> rusqlite::Result<FileDetail> {
        let size: Option<i64> = row.get(4)?;
        Ok(FileDetail {
            id: row.get(0)?,
            directory_id: row.get(1)?,
            filename: row.get(2)?,
            timestamp: row.get(3)?,
            size: size.map(|s| s.max(0) as u64),
            sha256: row.get(5)?,
        })
    }

    fn load_manifests(
        conn: &Connection,
        dirs: &mut [Directory],
    ) -> Result<(), RegistryError> {
        let mut stmt = conn
            .prepare(
                "SELECT directory_id, name, size, timestamp FROM directory_file \
                 WHERE directory_id = ?1 ORDER BY name",
            )
            .map_err(db_err)?;

        for dir in dirs.iter_mut() {
            dir.files = stmt
                .query_map(params![dir.id], |row| {
                    let size: i64 = row.get(2)?;
                    Ok(ManifestEntry {
                        name: row.get(1)?,
                        size: size.max(0) as u64,
                        timestamp: row.get(3)?,
                    })
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
        }
        Ok(())
    }

    // Seeding helpers. The admin workflow owns these records in production.

    pub fn add_site(&self, name: &str, private: bool) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO site (name, private) VALUES (?1, ?2)",
            params![name, private],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_host(&self, site_id: i64, name: &str, private: bool) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO host (site_id, name, private) VALUES (?1, ?2, ?3)",
            params![site_id, name, private],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_host_active(&self, host_id: i64, user_active: bool) -> Result<(), RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE host SET user_active = ?2 WHERE id = ?1",
            params![host_id, user_active],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Insert a category, or return the id of the existing one with that name.
    pub fn add_category(&self, name: &str, topdir: &str) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO category (name, topdir) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
            params![name, topdir],
        )
        .map_err(db_err)?;
        conn.query_row(
            "SELECT id FROM category WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    pub fn add_directory(
        &self,
        name: &str,
        readable: bool,
        files: &[ManifestEntry],
    ) -> Result<i64, RegistryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO directory (name, readable) VALUES (?1, ?2)",
            params![name, readable],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid();
        for file in files {
            tx.execute(
                "INSERT INTO directory_file (directory_id, name, size, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, file.name, file.size as i64, file.timestamp],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(id)
    }

    pub fn add_host_category(
        &self,
        host_id: i64,
        category_id: i64,
        always_up2date: bool,
    ) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO host_category (host_id, category_id, always_up2date) VALUES (?1, ?2, ?3)",
            params![host_id, category_id, always_up2date],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_host_category_url(
        &self,
        host_category_id: i64,
        url: &str,
    ) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO host_category_url (host_category_id, url) VALUES (?1, ?2)",
            params![host_category_id, url],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_host_category_dir(
        &self,
        host_category_id: i64,
        path: &str,
        directory_id: Option<i64>,
        up2date: bool,
    ) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO host_category_dir (host_category_id, path, directory_id, up2date) \
             VALUES (?1, ?2, ?3, ?4)",
            params![host_category_id, path, directory_id, up2date],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_file_detail(
        &self,
        directory_id: i64,
        filename: &str,
        timestamp: i64,
        size: Option<u64>,
        sha256: Option<&str>,
    ) -> Result<i64, RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO file_detail (directory_id, filename, timestamp, size, sha256) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                directory_id,
                filename,
                timestamp,
                size.map(|s| s as i64),
                sha256
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_continent_redirect(
        &self,
        country: &str,
        continent: &str,
    ) -> Result<(), RegistryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO country_continent_redirect (country, continent) VALUES (?1, ?2)",
            params![country.to_uppercase(), continent.to_uppercase()],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl MirrorRegistry for SqliteRegistry {
    fn list_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>, RegistryError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM host h JOIN site s ON s.id = h.site_id \
             WHERE h.admin_active = 1 AND h.user_active = 1 \
               AND s.admin_active = 1 AND s.user_active = 1 \
               AND (?1 OR (h.private = 0 AND s.private = 0)) \
               AND (?2 IS NULL OR h.id >= ?2) \
               AND (?3 IS NULL OR h.id <= ?3) \
             ORDER BY COALESCE(h.last_crawl_duration, 0) DESC, h.id",
            HOST_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let hosts = stmt
            .query_map(
                params![filter.include_private, filter.start_id, filter.stop_id],
                Self::row_to_host,
            )
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(hosts)
    }

    fn get_host(&self, id: i64) -> Result<Option<Host>, RegistryError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM host h WHERE h.id = ?1", HOST_COLUMNS);
        conn.query_row(&sql, params![id], Self::row_to_host)
            .optional()
            .map_err(db_err)
    }

    fn host_categories(&self, host_id: i64) -> Result<Vec<HostCategory>, RegistryError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT hc.id, hc.host_id, hc.always_up2date, c.id, c.name, c.topdir \
                 FROM host_category hc JOIN category c ON c.id = hc.category_id \
                 WHERE hc.host_id = ?1 ORDER BY c.name",
            )
            .map_err(db_err)?;
        let mut categories = stmt
            .query_map(params![host_id], |row| {
                Ok(HostCategory {
                    id: row.get(0)?,
                    host_id: row.get(1)?,
                    always_up2date: row.get(2)?,
                    category: Category {
                        id: row.get(3)?,
                        name: row.get(4)?,
                        topdir: row.get(5)?,
                    },
                    urls: Vec::new(),
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut url_stmt = conn
            .prepare(
                "SELECT id, host_category_id, url, private FROM host_category_url \
                 WHERE host_category_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        for hc in &mut categories {
            hc.urls = url_stmt
                .query_map(params![hc.id], |row| {
                    Ok(HostCategoryUrl {
                        id: row.get(0)?,
                        host_category_id: row.get(1)?,
                        url: row.get(2)?,
                        private: row.get(3)?,
                    })
                })
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
        }

        Ok(categories)
    }

    fn category_directories(
        &self,
        category_id: i64,
        repodata_only: bool,
    ) -> Result<Vec<Directory>, RegistryError> {
        let conn = self.conn()?;
        let topdir: String = conn
            .query_row(
                "SELECT topdir FROM category WHERE id = ?1",
                params![category_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or(RegistryError::NotFound {
                entity: "category",
                id: category_id,
            })?;
        let topdir = topdir.trim_end_matches('/').to_string();

        let mut stmt = conn
            .prepare(
                "SELECT id, name, readable FROM directory \
                 WHERE name = ?1 OR substr(name, 1, length(?1) + 1) = ?1 || '/' \
                 ORDER BY name",
            )
            .map_err(db_err)?;
        let mut dirs = stmt
            .query_map(params![topdir], |row| {
                Ok(Directory {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    readable: row.get(2)?,
                    files: Vec::new(),
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        if repodata_only {
            dirs.retain(|d| d.is_repodata());
        }

        Self::load_manifests(&conn, &mut dirs)?;
        Ok(dirs)
    }

    fn host_category_dirs(
        &self,
        host_category_id: i64,
    ) -> Result<Vec<HostCategoryDir>, RegistryError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT hcd.id, hcd.host_category_id, hcd.path, hcd.up2date, hcd.directory_id, \
                        d.readable \
                 FROM host_category_dir hcd LEFT JOIN directory d ON d.id = hcd.directory_id \
                 WHERE hcd.host_category_id = ?1 ORDER BY hcd.path",
            )
            .map_err(db_err)?;
        let dirs = stmt
            .query_map(params![host_category_id], |row| {
                Ok(HostCategoryDir {
                    id: row.get(0)?,
                    host_category_id: row.get(1)?,
                    path: row.get(2)?,
                    up2date: row.get(3)?,
                    directory_id: row.get(4)?,
                    directory_readable: row.get(5)?,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(dirs)
    }

    fn directory_by_name(&self, name: &str) -> Result<Option<Directory>, RegistryError> {
        let conn = self.conn()?;
        let dir = conn
            .query_row(
                "SELECT id, name, readable FROM directory WHERE name = ?1",
                params![name.trim_end_matches('/')],
                |row| {
                    Ok(Directory {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        readable: row.get(2)?,
                        files: Vec::new(),
                    })
                },
            )
            .optional()
            .map_err(db_err)?;

        match dir {
            Some(dir) => {
                let mut dirs = vec![dir];
                Self::load_manifests(&conn, &mut dirs)?;
                Ok(dirs.pop())
            }
            None => Ok(None),
        }
    }

    fn latest_file_detail(
        &self,
        directory_id: i64,
        filename: &str,
    ) -> Result<Option<FileDetail>, RegistryError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, directory_id, filename, timestamp, size, sha256 FROM file_detail \
             WHERE directory_id = ?1 AND filename = ?2 \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            params![directory_id, filename],
            Self::row_to_file_detail,
        )
        .optional()
        .map_err(db_err)
    }

    fn file_detail_with_checksum(
        &self,
        directory_id: i64,
        filename: &str,
        sha256: &str,
        since: i64,
    ) -> Result<Option<FileDetail>, RegistryError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, directory_id, filename, timestamp, size, sha256 FROM file_detail \
             WHERE directory_id = ?1 AND filename = ?2 AND sha256 = ?3 AND timestamp >= ?4 \
             ORDER BY timestamp DESC, id DESC LIMIT 1",
            params![directory_id, filename, sha256, since],
            Self::row_to_file_detail,
        )
        .optional()
        .map_err(db_err)
    }

    fn continent_redirects(&self) -> Result<Vec<ContinentRedirect>, RegistryError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT country, continent FROM country_continent_redirect")
            .map_err(db_err)?;
        let redirects = stmt
            .query_map([], |row| {
                Ok(ContinentRedirect {
                    country: row.get(0)?,
                    continent: row.get(1)?,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(redirects)
    }

    fn commit_host(&self, commit: &HostCommit) -> Result<(), RegistryError> {
        if commit.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        if commit.mark_not_up2date {
            tx.execute(
                "UPDATE host_category_dir SET up2date = 0 WHERE host_category_id IN \
                 (SELECT id FROM host_category WHERE host_id = ?1)",
                params![commit.host_id],
            )
            .map_err(db_err)?;
        }

        for create in &commit.creates {
            tx.execute(
                "INSERT INTO host_category_dir (host_category_id, path, directory_id, up2date) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    create.host_category_id,
                    create.path,
                    create.directory_id,
                    create.up2date
                ],
            )
            .map_err(db_err)?;
        }

        for update in &commit.updates {
            tx.execute(
                "UPDATE host_category_dir SET up2date = ?2 WHERE id = ?1",
                params![update.id, update.up2date],
            )
            .map_err(db_err)?;
        }

        if let Some(ref update) = commit.host_update {
            let changed = tx
                .execute(
                    "UPDATE host SET crawl_failures = ?2, user_active = ?3, \
                     disable_reason = COALESCE(?4, disable_reason), \
                     last_crawled = COALESCE(?5, last_crawled), \
                     last_crawl_duration = COALESCE(?6, last_crawl_duration) \
                     WHERE id = ?1",
                    params![
                        commit.host_id,
                        update.crawl_failures,
                        update.user_active,
                        update.disable_reason,
                        update.last_crawled.map(|t| t.to_rfc3339()),
                        update.last_crawl_duration
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(RegistryError::NotFound {
                    entity: "host",
                    id: commit.host_id,
                });
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }
}

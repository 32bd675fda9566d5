//! Registry access trait.

use thiserror::Error;

use super::{
    ContinentRedirect, Directory, FileDetail, Host, HostCategory, HostCategoryDir, HostCommit,
    HostFilter,
};

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database error: {0}")]
    Database(String),
}

/// Read/write access to the mirror registry.
///
/// Writes are limited to host crawl metadata and directory freshness records,
/// and always arrive as one [`HostCommit`] per host.
pub trait MirrorRegistry: Send + Sync {
    /// Active hosts matching the filter, longest previous crawl first.
    fn list_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>, RegistryError>;

    fn get_host(&self, id: i64) -> Result<Option<Host>, RegistryError>;

    /// Host categories of a host with their category and base URLs.
    fn host_categories(&self, host_id: i64) -> Result<Vec<HostCategory>, RegistryError>;

    /// Directories of a category's tree, ordered by name.
    fn category_directories(
        &self,
        category_id: i64,
        repodata_only: bool,
    ) -> Result<Vec<Directory>, RegistryError>;

    fn host_category_dirs(
        &self,
        host_category_id: i64,
    ) -> Result<Vec<HostCategoryDir>, RegistryError>;

    fn directory_by_name(&self, name: &str) -> Result<Option<Directory>, RegistryError>;

    /// Most recent checksum record for a file.
    fn latest_file_detail(
        &self,
        directory_id: i64,
        filename: &str,
    ) -> Result<Option<FileDetail>, RegistryError>;

    /// Most recent record with the given checksum, recorded at or after `since` (epoch seconds).
    fn file_detail_with_checksum(
        &self,
        directory_id: i64,
        filename: &str,
        sha256: &str,
        since: i64,
    ) -> Result<Option<FileDetail>, RegistryError>;

    fn continent_redirects(&self) -> Result<Vec<ContinentRedirect>, RegistryError>;

    /// Apply every write of one host crawl in a single transaction.
    fn commit_host(&self, commit: &HostCommit) -> Result<(), RegistryError>;
}

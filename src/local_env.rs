//! The environment a fleet is built in: directories, binaries, addresses.

use camino::Utf8PathBuf;

use crate::id::{TenantId, TimelineId};
use crate::remote_storage::LocalFsStorage;

/// Directory within the repo dir used for local_fs remote storage.
pub const PAGESERVER_REMOTE_STORAGE_DIR: &str = "local_fs_remote_storage/pageserver";

/// Everything fleet setup needs to know about one local environment.
///
/// This is deliberately an explicit value threaded through every call rather
/// than process-global state, so several environments can be driven from one
/// process (e.g. parallel test execution).
#[derive(Debug, Clone)]
pub struct LocalEnv {
    /// Root of the environment. The pageserver workdir and the local_fs
    /// remote storage live under it, and snapshots capture it wholesale.
    pub repo_dir: Utf8PathBuf,

    /// Path to the pageserver binary.
    pub pageserver_bin: Utf8PathBuf,

    /// Path to the companion utility that rewrites the tenant id embedded in
    /// a layer file header (`pagectl layer rewrite-summary`).
    pub pagectl_bin: Utf8PathBuf,

    /// `host:port` of the pageserver's management API.
    pub pageserver_http_addr: String,

    /// Whether a prepared environment may be persisted as a snapshot.
    pub snapshot_retention: bool,
}

impl LocalEnv {
    /// The retention default: interactive runs keep snapshots, automated runs
    /// (`CI=true`) always rebuild.
    pub fn snapshot_retention_from_env() -> bool {
        std::env::var("CI").map(|v| v != "true").unwrap_or(true)
    }

    pub fn remote_storage(&self) -> LocalFsStorage {
        LocalFsStorage::new(self.repo_dir.join(PAGESERVER_REMOTE_STORAGE_DIR))
    }

    pub fn pageserver_workdir(&self) -> Utf8PathBuf {
        self.repo_dir.join("pageserver")
    }

    pub fn tenant_dir(&self, tenant_id: TenantId) -> Utf8PathBuf {
        self.pageserver_workdir()
            .join("tenants")
            .join(tenant_id.to_string())
    }

    pub fn timeline_dir(&self, tenant_id: TenantId, timeline_id: TimelineId) -> Utf8PathBuf {
        self.tenant_dir(tenant_id)
            .join("timelines")
            .join(timeline_id.to_string())
    }
}

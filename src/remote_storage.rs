//! Layout of filesystem-backed remote storage.

use camino::Utf8PathBuf;

use crate::id::{TenantId, TimelineId};

/// Remote storage backed by a local directory, as benchmark environments use
/// it. The tree mirrors local tenant storage:
/// `tenants/<TenantId>/timelines/<TimelineId>/<layer files>`.
#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    pub root: Utf8PathBuf,
}

impl LocalFsStorage {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn tenant_path(&self, tenant_id: TenantId) -> Utf8PathBuf {
        self.root.join("tenants").join(tenant_id.to_string())
    }

    pub fn timelines_path(&self, tenant_id: TenantId) -> Utf8PathBuf {
        self.tenant_path(tenant_id).join("timelines")
    }

    pub fn timeline_path(&self, tenant_id: TenantId, timeline_id: TimelineId) -> Utf8PathBuf {
        self.timelines_path(tenant_id).join(timeline_id.to_string())
    }
}

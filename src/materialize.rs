//! Downloads remote layer files into local tenant storage.

use std::collections::HashMap;
use std::fs;
use std::io;

use anyhow::{bail, Context};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::id::{TenantId, TimelineId};
use crate::layer_name;
use crate::local_env::LocalEnv;
use crate::work_queue;

/// Copy every remote layer file of the given (tenant, timeline) pairs into
/// the local tenant directories, canonicalizing names on the way.
///
/// Two remote files canonicalizing to the same local name mean the remote
/// store holds two live versions of one logical layer (split brain); that is
/// a fatal error, not a conflict to resolve. Running this twice for the same
/// timeline yields the identical set of local files.
pub fn copy_all_remote_layer_files_to_local_tenant_dir(
    env: &LocalEnv,
    tenant_timelines: &[(TenantId, TimelineId)],
    concurrency: usize,
) -> anyhow::Result<()> {
    let remote_storage = env.remote_storage();

    let mut work: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::new();
    for &(tenant, timeline) in tenant_timelines {
        let remote_timeline_path = remote_storage.timeline_path(tenant, timeline);
        let local_timeline_path = env.timeline_dir(tenant, timeline);
        fs::create_dir_all(&local_timeline_path)
            .with_context(|| format!("create {local_timeline_path}"))?;

        let mut downloads: HashMap<String, Utf8PathBuf> = HashMap::new();
        for entry in remote_timeline_path
            .read_dir_utf8()
            .with_context(|| format!("list {remote_timeline_path}"))?
        {
            let entry = entry?;
            let remote_name = entry.file_name();
            if !remote_name.contains("__") {
                // The timeline's index file is not a layer and stays remote.
                continue;
            }
            let local_name = layer_name::local_layer_file_name(remote_name)?.to_string();
            if let Some(previous) = downloads.insert(local_name, entry.path().to_owned()) {
                bail!(
                    "remote storage must have had split brain: {previous} and {} canonicalize \
                     to the same local name",
                    entry.path()
                );
            }
        }
        work.extend(
            downloads
                .into_iter()
                .map(|(local_name, remote_path)| (remote_path, local_timeline_path.join(local_name))),
        );
    }

    info!(
        "downloading {} remote layer files for {} timelines",
        work.len(),
        tenant_timelines.len()
    );
    work_queue::run(concurrency, work, |(remote_path, local_path)| {
        copy_layer(&remote_path, &local_path)
            .with_context(|| format!("download {remote_path} to {local_path}"))
    })
}

/// Plain copy without source metadata, so the local file looks like a fresh
/// download in case anything (e.g. eviction) considers file age. Symlinks are
/// recreated as symlinks.
fn copy_layer(remote_path: &Utf8Path, local_path: &Utf8Path) -> anyhow::Result<()> {
    let file_type = remote_path
        .symlink_metadata()
        .with_context(|| format!("stat {remote_path}"))?
        .file_type();
    if file_type.is_symlink() {
        let target = remote_path.read_link_utf8()?;
        match std::os::unix::fs::symlink(&target, local_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                fs::remove_file(local_path)?;
                std::os::unix::fs::symlink(&target, local_path)?;
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        fs::copy(remote_path, local_path)?;
    }
    Ok(())
}

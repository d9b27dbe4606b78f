//! Duplication of a template tenant's remote storage tree.

use std::collections::HashMap;
use std::fs;
use std::process::Command;

use anyhow::{bail, ensure, Context};
use camino::Utf8Path;
use tracing::info;

use crate::id::TenantId;
use crate::layer_name;
use crate::local_env::LocalEnv;
use crate::work_queue;

/// Clone the template tenant's remote tree under `ncopies` freshly generated
/// tenant ids and rewrite the tenant id embedded in every data layer header.
///
/// Either every copy succeeds or the call fails as a whole; a partial fleet
/// is never returned.
pub fn duplicate_tenant(
    env: &LocalEnv,
    template_tenant: TenantId,
    ncopies: usize,
    concurrency: usize,
) -> anyhow::Result<Vec<TenantId>> {
    let new_tenants: Vec<TenantId> = (0..ncopies).map(|_| TenantId::generate()).collect();
    info!("duplicating template tenant {template_tenant} {ncopies} times in remote storage");
    work_queue::run(concurrency, new_tenants.clone(), |new_tenant| {
        duplicate_one_tenant(env, template_tenant, new_tenant)
            .with_context(|| format!("duplicate {template_tenant} as {new_tenant}"))
    })?;
    Ok(new_tenants)
}

/// Replicate the template's `timelines/` tree under `new_tenant`.
///
/// Directory creation is exclusive at every level: a destination that already
/// exists means an id collision or leftovers of an earlier run, and fails the
/// call rather than silently merging state. Two source files canonicalizing
/// to the same layer name (remote split brain) are fatal for the same reason;
/// the copy must end up file-for-file isomorphic to the template.
pub fn duplicate_one_tenant(
    env: &LocalEnv,
    template_tenant: TenantId,
    new_tenant: TenantId,
) -> anyhow::Result<()> {
    let remote_storage = env.remote_storage();
    let src_timelines_dir = remote_storage.timelines_path(template_tenant);
    ensure!(
        src_timelines_dir.is_dir(),
        "{src_timelines_dir} is not a directory"
    );

    let dst_timelines_dir = remote_storage.timelines_path(new_tenant);
    let dst_tenant_dir = dst_timelines_dir
        .parent()
        .expect("timelines dir has a tenant dir parent");
    fs::create_dir(dst_tenant_dir).with_context(|| format!("create {dst_tenant_dir}"))?;
    fs::create_dir(&dst_timelines_dir).with_context(|| format!("create {dst_timelines_dir}"))?;

    for timeline in src_timelines_dir
        .read_dir_utf8()
        .with_context(|| format!("list {src_timelines_dir}"))?
    {
        let timeline = timeline?;
        let src_tl_dir = timeline.path();
        ensure!(src_tl_dir.is_dir(), "{src_tl_dir} is not a directory");
        let dst_tl_dir = dst_timelines_dir.join(timeline.file_name());
        fs::create_dir(&dst_tl_dir).with_context(|| format!("create {dst_tl_dir}"))?;

        let mut installed: HashMap<String, String> = HashMap::new();
        for file in src_tl_dir
            .read_dir_utf8()
            .with_context(|| format!("list {src_tl_dir}"))?
        {
            let file = file?;
            let file_name = file.file_name();
            if file_name.contains("__") {
                // Data layer: install it under its canonical local name and
                // patch the tenant id in its header.
                let local_name = layer_name::local_layer_file_name(file_name)?.to_string();
                if let Some(previous) =
                    installed.insert(local_name.clone(), file_name.to_owned())
                {
                    bail!(
                        "remote storage must have had split brain: {previous} and {file_name} \
                         canonicalize to the same local name {local_name}"
                    );
                }
                let dst = dst_tl_dir.join(local_name);
                copy_preserving_mtime(file.path(), &dst)?;
                rewrite_layer_tenant_id(env, &dst, new_tenant)?;
            } else {
                // index_part etc carry no tenant id needing a rewrite.
                copy_preserving_mtime(file.path(), &dst_tl_dir.join(file_name))?;
            }
        }
    }
    Ok(())
}

fn copy_preserving_mtime(src: &Utf8Path, dst: &Utf8Path) -> anyhow::Result<()> {
    fs::copy(src, dst).with_context(|| format!("copy {src} to {dst}"))?;
    let metadata = fs::metadata(src)?;
    let times = fs::FileTimes::new()
        .set_accessed(metadata.accessed()?)
        .set_modified(metadata.modified()?);
    fs::File::options()
        .write(true)
        .open(dst)?
        .set_times(times)
        .with_context(|| format!("set file times on {dst}"))?;
    Ok(())
}

/// Rewrite the tenant id in a layer file's header in place, via the external
/// `pagectl` utility. Must succeed; a layer with a stale tenant id would be
/// rejected at attach time.
fn rewrite_layer_tenant_id(
    env: &LocalEnv,
    layer_path: &Utf8Path,
    new_tenant: TenantId,
) -> anyhow::Result<()> {
    let output = Command::new(&env.pagectl_bin)
        .args([
            "layer",
            "rewrite-summary",
            layer_path.as_str(),
            "--new-tenant-id",
            &new_tenant.to_string(),
        ])
        .output()
        .with_context(|| format!("run {} on {layer_path}", env.pagectl_bin))?;
    ensure!(
        output.status.success(),
        "pagectl layer rewrite-summary failed for {layer_path}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

//! Drives a duplicated fleet through attach, local materialization and
//! activation.
//!
//! The pipeline is strictly sequential at this level; concurrency exists only
//! inside each stage, via [`crate::work_queue`].

use std::time::Duration;

use anyhow::{bail, ensure};
use tracing::info;

use crate::duplicate::duplicate_tenant;
use crate::id::{TenantId, TimelineId};
use crate::local_env::LocalEnv;
use crate::materialize;
use crate::mgmt_api;
use crate::models::TenantState;
use crate::pageserver::PageServerNode;
use crate::snapshot::{SnapshotDir, SnapshotStrategy};
use crate::work_queue;

/// Failpoint that makes an attach fail after it has persisted enough on-disk
/// state to be retried on the next start, but before background activation
/// (and with it, layer downloads) begins.
pub const ATTACH_BEFORE_ACTIVATE_FAILPOINT: &str = "attach-before-activate";

/// Worker-pool sizes and polling periods.
///
/// The defaults keep the intent of the original tuning: stages bound by local
/// disk I/O run narrow, the control-plane attach stage runs wide.
#[derive(Debug, Clone)]
pub struct FleetTuning {
    pub duplicate_concurrency: usize,
    pub attach_concurrency: usize,
    pub copy_concurrency: usize,
    pub state_poll_period: Duration,
    /// How many polls to grant each tenant to reach `Broken` after attach.
    pub broken_poll_iterations: usize,
}

impl Default for FleetTuning {
    fn default() -> Self {
        Self {
            duplicate_concurrency: 8,
            attach_concurrency: 22,
            copy_concurrency: 8,
            state_poll_period: Duration::from_secs(1),
            broken_poll_iterations: 10,
        }
    }
}

/// A prepared fleet: tenants all sharing the template's single timeline.
pub struct SingleTimeline {
    pub tenants: Vec<TenantId>,
}

/// Create (or rehydrate from `snapshot`) an environment holding `ncopies`
/// copies of a template tenant with a single timeline, all active and with
/// every layer locally resident.
///
/// On a cache miss, `init_env` runs first and must bring up the on-disk
/// environment (pageserver workdir, remote storage tree). With the overlay
/// strategy the repo dir starts out as an empty mount, so the hook has to be
/// able to initialize everything from scratch. `setup_template` is then
/// invoked against the freshly started pageserver and must return the
/// template tenant, its timeline, and the tenant config the copies are
/// attached with.
pub fn single_timeline(
    env: &LocalEnv,
    ps: &PageServerNode,
    snapshot: &SnapshotDir,
    strategy: SnapshotStrategy,
    init_env: impl FnOnce(&LocalEnv) -> anyhow::Result<()>,
    setup_template: impl FnOnce(&PageServerNode) -> anyhow::Result<(TenantId, TimelineId, serde_json::Value)>,
    ncopies: usize,
    tuning: &FleetTuning,
) -> anyhow::Result<SingleTimeline> {
    snapshot.get_or_build(&env.repo_dir, strategy, env.snapshot_retention, || {
        build_fleet(env, ps, init_env, setup_template, ncopies, tuning)
    })?;

    ps.start()?;
    let client = &ps.http_client;

    info!("waiting for all tenants to become active");
    // One unit of patience per tenant: large fleets activate serially.
    wait_until_all_tenants_state(client, "Active", ncopies.max(1), tuning.state_poll_period)?;

    // All layers must be resident for predictable benchmark performance.
    assert_all_layers_resident(client)?;

    let tenants = client.tenant_list()?.into_iter().map(|t| t.id).collect();
    info!("fleet ready");
    Ok(SingleTimeline { tenants })
}

/// The cache-miss path: initialize, duplicate, attach-to-broken, materialize.
/// Leaves the pageserver stopped so the environment can be snapshotted
/// quiescent.
fn build_fleet(
    env: &LocalEnv,
    ps: &PageServerNode,
    init_env: impl FnOnce(&LocalEnv) -> anyhow::Result<()>,
    setup_template: impl FnOnce(&PageServerNode) -> anyhow::Result<(TenantId, TimelineId, serde_json::Value)>,
    ncopies: usize,
    tuning: &FleetTuning,
) -> anyhow::Result<()> {
    info!("initializing the environment in {}", env.repo_dir);
    init_env(env)?;
    ps.start()?;
    let client = &ps.http_client;

    info!("invoking callback to create the template tenant");
    let (template_tenant, template_timeline, template_config) = setup_template(ps)?;
    info!("template tenant is {template_tenant}, timeline {template_timeline}");

    info!("detaching template tenant from the pageserver");
    client.tenant_detach(template_tenant)?;

    let tenants = duplicate_tenant(env, template_tenant, ncopies, tuning.duplicate_concurrency)?;

    // Environment initialization may have created an initial tenant; only
    // fleet members may be attached during the bulk attach.
    for tenant in client.tenant_list()? {
        info!("deleting leftover tenant {}", tenant.id);
        client.tenant_delete(tenant.id)?;
    }

    // Attaching and letting the pageserver download on demand would work too,
    // but on-demand downloads are far slower than copying the files ourselves
    // while it is stopped.
    ensure!(
        client.tenant_list()?.is_empty(),
        "pageserver must hold no tenants before the bulk attach"
    );
    attach_all_broken(client, &tenants, &template_config, tuning)?;

    // Immediate stop; failpoint configuration dies with the process, so the
    // eventual restart needs no explicit failpoint cleanup.
    ps.stop(true)?;

    let tenant_timelines: Vec<_> = tenants.iter().map(|&t| (t, template_timeline)).collect();
    info!("downloading the layer files into the local tenant dirs");
    materialize::copy_all_remote_layer_files_to_local_tenant_dir(
        env,
        &tenant_timelines,
        tuning.copy_concurrency,
    )?;
    Ok(())
}

/// Attach every tenant and wait for it to land in `Broken`, which the enabled
/// failpoint makes the expected outcome of every attach.
fn attach_all_broken(
    client: &mgmt_api::Client,
    tenants: &[TenantId],
    template_config: &serde_json::Value,
    tuning: &FleetTuning,
) -> anyhow::Result<()> {
    client.configure_failpoints(&[(ATTACH_BEFORE_ACTIVATE_FAILPOINT, "return")])?;
    info!(
        "attaching {} tenants, expecting each to break on the failpoint",
        tenants.len()
    );
    work_queue::run(tuning.attach_concurrency, tenants.to_vec(), |tenant| {
        client.tenant_attach(tenant, template_config.clone())?;
        std::thread::sleep(Duration::from_millis(100));
        wait_until_tenant_state(
            client,
            tenant,
            "Broken",
            tuning.broken_poll_iterations,
            tuning.state_poll_period,
        )?;
        Ok(())
    })
}

/// Poll one tenant until it reports the desired state. The bound is an
/// iteration count, and exceeding it is an error naming the tenant and the
/// last state seen.
pub fn wait_until_tenant_state(
    client: &mgmt_api::Client,
    tenant: TenantId,
    desired: &str,
    iterations: usize,
    period: Duration,
) -> anyhow::Result<TenantState> {
    let mut last_state: Option<TenantState> = None;
    for _ in 0..iterations {
        let state = client.tenant_details(tenant)?.tenant_info.state;
        if state.as_ref() == desired {
            return Ok(state);
        }
        last_state = Some(state);
        std::thread::sleep(period);
    }
    bail!("tenant {tenant} did not reach state {desired}, last observed state: {last_state:?}");
}

/// Poll until every tenant reports the desired state. On timeout, the error
/// names exactly the tenants that are stuck, with their last observed states.
pub fn wait_until_all_tenants_state(
    client: &mgmt_api::Client,
    desired: &str,
    iterations: usize,
    period: Duration,
) -> anyhow::Result<()> {
    let mut stragglers: Vec<(TenantId, TenantState)> = Vec::new();
    for _ in 0..iterations {
        stragglers = client
            .tenant_list()?
            .into_iter()
            .filter(|t| t.state.as_ref() != desired)
            .map(|t| (t.id, t.state))
            .collect();
        if stragglers.is_empty() {
            return Ok(());
        }
        std::thread::sleep(period);
    }
    bail!(
        "{} tenants did not reach state {desired}: {stragglers:?}",
        stragglers.len()
    );
}

/// Functional acceptance check of materialization: the pageserver must report
/// every layer of every tenant as locally resident.
fn assert_all_layers_resident(client: &mgmt_api::Client) -> anyhow::Result<()> {
    for tenant in client.tenant_list()? {
        let details = client.tenant_details(tenant.id)?;
        for timeline in details.timelines {
            let info = client.layer_map_info(tenant.id, timeline)?;
            for layer in info.historic_layers {
                ensure!(
                    !layer.is_remote(),
                    "layer {} of tenant {} timeline {timeline} is still remote",
                    layer.layer_file_name(),
                    tenant.id
                );
            }
        }
    }
    Ok(())
}

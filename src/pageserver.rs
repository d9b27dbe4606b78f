//! Control of the pageserver process a fleet is attached to.
//!
//! The pageserver is treated as a single exclusively-owned resource: only one
//! pipeline stage at a time talks to it, and start/stop transitions never
//! overlap with in-flight worker-pool activity.

use camino::Utf8PathBuf;
use tracing::info;

use crate::background_process;
use crate::local_env::LocalEnv;
use crate::mgmt_api;

pub struct PageServerNode {
    pub env: LocalEnv,
    pub http_client: mgmt_api::Client,
}

impl PageServerNode {
    pub fn from_env(env: &LocalEnv) -> Self {
        Self {
            http_client: mgmt_api::Client::new(format!("http://{}", env.pageserver_http_addr)),
            env: env.clone(),
        }
    }

    pub fn workdir(&self) -> Utf8PathBuf {
        self.env.pageserver_workdir()
    }

    fn pid_file(&self) -> Utf8PathBuf {
        self.workdir().join("pageserver.pid")
    }

    /// Start the pageserver and wait until its management API responds.
    pub fn start(&self) -> anyhow::Result<()> {
        let datadir = self.workdir();
        info!("starting pageserver in {datadir}");
        background_process::start_process(
            "pageserver",
            &datadir,
            &self.env.pageserver_bin,
            &["-D", datadir.as_str()],
            &self.pid_file(),
            || match self.http_client.status() {
                Ok(()) => Ok(true),
                // Not listening yet.
                Err(mgmt_api::Error::ReceiveBody(_)) => Ok(false),
                Err(e) => Err(anyhow::anyhow!("pageserver status check failed: {e}")),
            },
        )
    }

    /// Stop the pageserver. `immediate` uses SIGQUIT, skipping graceful
    /// shutdown; since failpoint configuration does not survive the process,
    /// a subsequent start also comes up with all failpoints cleared.
    pub fn stop(&self, immediate: bool) -> anyhow::Result<()> {
        background_process::stop_process(immediate, "pageserver", &self.pid_file())
    }
}

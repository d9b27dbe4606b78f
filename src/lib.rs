//! Provisioning of large synthetic tenant fleets for pageserver benchmarks.
//!
//! Given a template tenant with a single timeline, this crate duplicates the
//! template's remote storage tree under fresh tenant ids, drives the
//! duplicates through a failpoint-gated attach sequence, downloads their
//! layer files into local tenant storage, and caches the fully prepared
//! environment so repeated benchmark runs skip the setup cost.
//!
//! The entry point is [`fleet::single_timeline`].

pub mod background_process;
pub mod duplicate;
pub mod fleet;
pub mod id;
pub mod layer_name;
pub mod local_env;
pub mod lsn;
pub mod materialize;
pub mod mgmt_api;
pub mod models;
pub mod pageserver;
pub mod remote_storage;
pub mod snapshot;
pub mod work_queue;

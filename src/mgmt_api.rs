//! Blocking client for the pageserver management API.
//!
//! Only the calls this harness issues are wrapped. Notably absent is the
//! server's bulk layer-download trigger: the materializer copies layer files
//! itself, which is much faster than on-demand downloads through the server.

use reqwest::blocking::{RequestBuilder, Response};
use reqwest::{Method, StatusCode};

use crate::id::{TenantId, TimelineId};
use crate::models::{
    ConfigureFailpointsRequest, FailpointConfig, LayerMapInfo, TenantAttachRequest, TenantDetails,
    TenantInfo,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request could not be sent or the response body not received.
    #[error("send request or receive body: {0}")]
    ReceiveBody(#[from] reqwest::Error),

    /// The server responded with a non-success status.
    #[error("management API error {0}: {1}")]
    ApiError(StatusCode, String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Client {
    mgmt_api_endpoint: String,
    client: reqwest::blocking::Client,
}

impl Client {
    pub fn new(mgmt_api_endpoint: String) -> Self {
        Self {
            mgmt_api_endpoint,
            client: reqwest::blocking::Client::new(),
        }
    }

    pub fn status(&self) -> Result<()> {
        self.get(format!("{}/v1/status", self.mgmt_api_endpoint))?;
        Ok(())
    }

    pub fn tenant_list(&self) -> Result<Vec<TenantInfo>> {
        Ok(self
            .get(format!("{}/v1/tenant", self.mgmt_api_endpoint))?
            .json()?)
    }

    pub fn tenant_details(&self, tenant_id: TenantId) -> Result<TenantDetails> {
        Ok(self
            .get(format!("{}/v1/tenant/{tenant_id}", self.mgmt_api_endpoint))?
            .json()?)
    }

    /// Attach `tenant_id` with the given tenant config, passed through
    /// verbatim. The attach itself is asynchronous on the server side.
    pub fn tenant_attach(&self, tenant_id: TenantId, config: serde_json::Value) -> Result<()> {
        self.request(
            Method::POST,
            format!("{}/v1/tenant/{tenant_id}/attach", self.mgmt_api_endpoint),
            &TenantAttachRequest { config },
        )?;
        Ok(())
    }

    pub fn tenant_detach(&self, tenant_id: TenantId) -> Result<()> {
        self.request_no_body(
            Method::POST,
            format!("{}/v1/tenant/{tenant_id}/detach", self.mgmt_api_endpoint),
        )?;
        Ok(())
    }

    pub fn tenant_delete(&self, tenant_id: TenantId) -> Result<()> {
        self.request_no_body(
            Method::DELETE,
            format!("{}/v1/tenant/{tenant_id}", self.mgmt_api_endpoint),
        )?;
        Ok(())
    }

    pub fn layer_map_info(
        &self,
        tenant_id: TenantId,
        timeline_id: TimelineId,
    ) -> Result<LayerMapInfo> {
        Ok(self
            .get(format!(
                "{}/v1/tenant/{tenant_id}/timeline/{timeline_id}/layer",
                self.mgmt_api_endpoint
            ))?
            .json()?)
    }

    /// Configure named failpoints; the disposition `"return"` makes a
    /// failpoint fail immediately when hit.
    pub fn configure_failpoints(&self, failpoints: &[(&str, &str)]) -> Result<()> {
        let body: ConfigureFailpointsRequest = failpoints
            .iter()
            .map(|(name, actions)| FailpointConfig {
                name: (*name).to_owned(),
                actions: (*actions).to_owned(),
            })
            .collect();
        self.request(
            Method::PUT,
            format!("{}/v1/failpoints", self.mgmt_api_endpoint),
            &body,
        )?;
        Ok(())
    }

    fn get(&self, uri: String) -> Result<Response> {
        self.request_no_body(Method::GET, uri)
    }

    /// A request acting purely on the URI; no body, no content type.
    fn request_no_body(&self, method: Method, uri: String) -> Result<Response> {
        self.execute(self.client.request(method, uri))
    }

    fn request<B: serde::Serialize>(&self, method: Method, uri: String, body: &B) -> Result<Response> {
        self.execute(self.client.request(method, uri).json(body))
    }

    fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let res = request.send()?;
        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else {
            let msg = res.text().unwrap_or_default();
            Err(Error::ApiError(status, msg))
        }
    }
}

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ticket::Ticket;
use crate::endpoints::Service;
use crate::error::ErrorRecord;
use crate::soap;

/// SOAP namespace of the WSAA `loginCms` operation.
const WSAA_NAMESPACE: &str = "https://wsaa.view.sua.dvadac.desein.afip.gov";

/// Exchanges a signed CMS envelope for an access ticket at the WSAA
/// endpoint.
#[derive(Debug, Clone)]
pub struct LoginExchange {
    client: reqwest::Client,
    url: String,
}

impl LoginExchange {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Submit the CMS payload. An explicit fault passes through with its
    /// own code and message; transport problems and unusable responses
    /// collapse to the `afip_unexpected_error_wsaa` record.
    pub async fn exchange(&self, cms: &str, service: Service) -> Result<Ticket, ErrorRecord> {
        match self.try_exchange(cms, service).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(service = %service, error = %err, "wsaa login failed");
                Err(ErrorRecord::wsaa_unexpected())
            }
        }
    }

    // Outer Err: transport or parse anomaly. Inner Err: explicit fault.
    async fn try_exchange(
        &self,
        cms: &str,
        service: Service,
    ) -> Result<Result<Ticket, ErrorRecord>> {
        let mut params = Map::new();
        params.insert("in0".to_string(), Value::String(cms.to_string()));
        let envelope = soap::build_request(WSAA_NAMESPACE, "loginCms", &params)?;

        debug!(service = %service, url = %self.url, "requesting access ticket");
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .context("sending login request")?;

        let status = response.status();
        let body = response.text().await.context("reading login response")?;
        if body.trim().is_empty() {
            return Err(anyhow!("empty login response (status {status})"));
        }

        let payload = soap::parse_response(&body)
            .with_context(|| format!("parsing login response (status {status})"))?;
        if let Some(fault) = soap::extract_fault(&payload) {
            debug!(service = %service, code = %fault.code, "wsaa returned a fault");
            return Ok(Err(fault));
        }
        if !status.is_success() {
            return Err(anyhow!("login failed with status {status}"));
        }

        let ta_xml = payload
            .get("loginCmsReturn")
            .and_then(|value| value.as_str())
            .ok_or_else(|| anyhow!("login response has no loginCmsReturn"))?;
        let ticket = Ticket::from_ta_xml(ta_xml, service)?;
        debug!(
            service = %service,
            expires = %ticket.expiration_time,
            "access ticket issued"
        );
        Ok(Ok(ticket))
    }
}

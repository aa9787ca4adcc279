use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::login::LoginExchange;
use crate::auth::signer::{CmsSigner, TraSigner};
use crate::auth::store::{FileTicketStore, TicketStore};
use crate::auth::ticket::Ticket;
use crate::auth::tra::TicketRequest;
use crate::config::AfipConfig;
use crate::endpoints::{AuthScheme, EndpointRegistry, Environment, Service};
use crate::error::ErrorRecord;
use crate::soap;

/// Outcome of a dispatched call. Authentication failures and
/// remote-operation failures surface through the same shape; the error
/// list is never empty.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Success(Value),
    Failure(Vec<ErrorRecord>),
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchResult::Success(_))
    }
}

/// Credentials projected out of a valid ticket, attached to outgoing
/// parameters and never stored on their own.
struct Credentials {
    token: String,
    sign: String,
    cuit: String,
}

/// Authenticated dispatcher for the AFIP service families.
///
/// Owns the ticket lifecycle: cached tickets are reused while valid and
/// renewed through the TRA -> CMS -> WSAA chain when absent or expired.
/// Renewal completes (and the ticket is stored) before any credentials
/// are injected for the same call.
pub struct AfipClient {
    cuit: String,
    registry: EndpointRegistry,
    store: Arc<dyn TicketStore>,
    signer: Arc<dyn TraSigner>,
    http: reqwest::Client,
    // One guard per service, so concurrent dispatches that both see a
    // stale ticket collapse to a single renewal round trip.
    renewal_locks: Mutex<HashMap<Service, Arc<Mutex<()>>>>,
}

impl AfipClient {
    /// Build a client from file-based configuration: file-backed ticket
    /// store and PKCS#7 signer, pointed at the configured environment.
    pub fn new(config: &AfipConfig) -> Result<Self> {
        let store = Arc::new(FileTicketStore::new(&config.ticket_dir));
        let signer = Arc::new(CmsSigner::new(
            &config.key_file,
            &config.cert_file,
            config.cert_pass.clone(),
        ));
        let registry = EndpointRegistry::new(config.environment());
        Self::with_components(
            config.cuit.clone(),
            registry,
            store,
            signer,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Assemble a client from explicit components, for tests and for
    /// embedders that bring their own store or signer.
    pub fn with_components(
        cuit: impl Into<String>,
        registry: EndpointRegistry,
        store: Arc<dyn TicketStore>,
        signer: Arc<dyn TraSigner>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            cuit: cuit.into(),
            registry,
            store,
            signer,
            http,
            renewal_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn environment(&self) -> Environment {
        self.registry.environment()
    }

    /// Call `operation` on `service` with credentials injected into
    /// `params`. Every outcome, including authentication trouble, comes
    /// back as a `DispatchResult`.
    pub async fn dispatch(
        &self,
        service: Service,
        operation: &str,
        params: Option<Map<String, Value>>,
    ) -> DispatchResult {
        let ticket = match self.authenticate(service).await {
            Ok(ticket) => ticket,
            Err(record) => return DispatchResult::Failure(vec![record]),
        };

        let mut params = params.unwrap_or_default();
        let credentials = Credentials {
            token: ticket.token.clone(),
            sign: ticket.sign.clone(),
            cuit: self.cuit.clone(),
        };
        inject_credentials(&mut params, self.registry.scheme_for(service), &credentials);

        match self.invoke(service, operation, &params).await {
            Ok(Ok(payload)) => DispatchResult::Success(payload),
            Ok(Err(fault)) => DispatchResult::Failure(vec![fault]),
            Err(err) => {
                warn!(service = %service, operation, error = %err, "service call failed");
                DispatchResult::Failure(vec![ErrorRecord::service_unexpected()])
            }
        }
    }

    /// Resolve a usable ticket, renewing through WSAA when the cached one
    /// is absent or no longer valid. Nothing is stored on failure.
    async fn authenticate(&self, service: Service) -> Result<Ticket, ErrorRecord> {
        let environment = self.registry.environment();
        if let Some(ticket) = self.store.get(service, environment) {
            if ticket.is_valid_at(Utc::now()) {
                debug!(service = %service, "using cached ticket");
                return Ok(ticket);
            }
            debug!(service = %service, "cached ticket expired");
        }

        let lock = self.renewal_lock(service).await;
        let _guard = lock.lock().await;

        // Another dispatch may have renewed while this one waited.
        if let Some(ticket) = self.store.get(service, environment) {
            if ticket.is_valid_at(Utc::now()) {
                return Ok(ticket);
            }
        }

        let ticket = self.renew(service).await?;
        if let Err(err) = self.store.put(service, environment, &ticket) {
            // The ticket is still usable for this call; the next dispatch
            // will renew again.
            warn!(service = %service, error = %err, "could not persist renewed ticket");
        }
        Ok(ticket)
    }

    async fn renewal_lock(&self, service: Service) -> Arc<Mutex<()>> {
        let mut locks = self.renewal_locks.lock().await;
        locks
            .entry(service)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run the TRA -> sign -> login chain. A signing failure never
    /// reaches the network.
    async fn renew(&self, service: Service) -> Result<Ticket, ErrorRecord> {
        let request = TicketRequest::new(service, Utc::now());
        let document = match request.to_xml() {
            Ok(xml) => xml,
            Err(err) => {
                warn!(service = %service, error = %err, "could not render ticket request");
                return Err(ErrorRecord::sign_failed());
            }
        };
        let cms = match self.signer.sign(document.as_bytes()) {
            Ok(cms) => cms,
            Err(err) => {
                warn!(service = %service, error = %err, "ticket request signing failed");
                return Err(ErrorRecord::sign_failed());
            }
        };

        info!(service = %service, "renewing access ticket");
        let login = LoginExchange::new(self.http.clone(), self.registry.login_url());
        login.exchange(&cms, service).await
    }

    // Outer Err: transport or parse anomaly. Inner Err: explicit fault.
    async fn invoke(
        &self,
        service: Service,
        operation: &str,
        params: &Map<String, Value>,
    ) -> Result<Result<Value, ErrorRecord>> {
        let envelope = soap::build_request(self.registry.namespace_for(service), operation, params)?;
        let url = self.registry.url_for(service);
        debug!(service = %service, operation, url, "invoking remote operation");

        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .context("sending service request")?;

        let status = response.status();
        let body = response.text().await.context("reading service response")?;
        if body.trim().is_empty() {
            return Err(anyhow!("empty service response (status {status})"));
        }

        let payload = soap::parse_response(&body)
            .with_context(|| format!("parsing service response (status {status})"))?;
        if let Some(fault) = soap::extract_fault(&payload) {
            debug!(service = %service, operation, code = %fault.code, "service returned a fault");
            return Ok(Err(fault));
        }
        if !status.is_success() {
            return Err(anyhow!("service call failed with status {status}"));
        }
        Ok(Ok(payload))
    }
}

/// Fill the service's credential scheme into `params`. Insert-if-absent:
/// a key the caller already set is never overwritten, while the other
/// fields of the same scheme are still filled.
fn inject_credentials(params: &mut Map<String, Value>, scheme: AuthScheme, credentials: &Credentials) {
    match scheme {
        AuthScheme::TopLevelAuth => {
            inject_block(
                params,
                "Auth",
                &[
                    ("Token", &credentials.token),
                    ("Sign", &credentials.sign),
                    ("Cuit", &credentials.cuit),
                ],
            );
        }
        AuthScheme::NestedAuthRequest => {
            inject_block(
                params,
                "authRequest",
                &[
                    ("token", &credentials.token),
                    ("sign", &credentials.sign),
                    ("cuitRepresentada", &credentials.cuit),
                ],
            );
        }
        AuthScheme::FlatTokenSign => {
            insert_absent(params, "token", &credentials.token);
            insert_absent(params, "sign", &credentials.sign);
            insert_absent(params, "cuitRepresentada", &credentials.cuit);
        }
        AuthScheme::None => {}
    }
}

fn inject_block(params: &mut Map<String, Value>, block: &str, fields: &[(&str, &str)]) {
    let entry = params
        .entry(block.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    // A caller that set the block to a non-object wins; it goes out as-is.
    if let Value::Object(map) = entry {
        for (key, value) in fields {
            insert_absent(map, key, value);
        }
    }
}

fn insert_absent(map: &mut Map<String, Value>, key: &str, value: &str) {
    map.entry(key.to_string())
        .or_insert_with(|| Value::String(value.to_string()));
}

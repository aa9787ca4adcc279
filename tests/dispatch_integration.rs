use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use afip_ws::auth::signer::TraSigner;
use afip_ws::auth::store::{MemoryTicketStore, TicketStore};
use afip_ws::auth::ticket::Ticket;
use afip_ws::dispatch::{AfipClient, DispatchResult};
use afip_ws::endpoints::{EndpointRegistry, Environment, Service};
use afip_ws::error::{SERVICE_UNEXPECTED, TRA_SIGN_ERR};
use chrono::{Duration as ChronoDuration, Utc};
use mockito::Matcher;
use serde_json::{json, Map, Value};

const CUIT: &str = "20111111112";
const ISSUED_TOKEN: &str = "dG9rZW4taXNzdWVk";
const ISSUED_SIGN: &str = "c2lnbi1pc3N1ZWQ=";

/// Signer double: counts invocations and optionally fails, so tests can
/// prove how many sign round trips a dispatch performed.
struct RecordingSigner {
    calls: AtomicUsize,
    fail: bool,
}

impl RecordingSigner {
    fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TraSigner for RecordingSigner {
    fn sign(&self, _document: &[u8]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("could not load key material");
        }
        Ok("U0lHTkVELVRSQQ==".to_string())
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn ticket(token: &str, sign: &str, expires_in_secs: i64, service: Service) -> Ticket {
    let now = Utc::now();
    Ticket {
        token: token.to_string(),
        sign: sign.to_string(),
        generation_time: now - ChronoDuration::seconds(600),
        expiration_time: now + ChronoDuration::seconds(expires_in_secs),
        service,
    }
}

fn login_success_body() -> String {
    let issued = ticket(ISSUED_TOKEN, ISSUED_SIGN, 43200, Service::Wsfe);
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"http://www.w3.org/2003/05/soap-envelope\">\
         <soapenv:Body><loginCmsResponse>\
         <loginCmsReturn>{}</loginCmsReturn>\
         </loginCmsResponse></soapenv:Body></soapenv:Envelope>",
        xml_escape(&issued.to_ta_xml().unwrap())
    )
}

fn fault_body(code: &str, message: &str) -> String {
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\">\
         <soapenv:Body><soapenv:Fault>\
         <faultcode>{code}</faultcode>\
         <faultstring>{message}</faultstring>\
         </soapenv:Fault></soapenv:Body></soapenv:Envelope>"
    )
}

fn wsfe_dummy_body() -> &'static str {
    "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\">\
     <soap:Body><FEDummyResponse xmlns=\"http://ar.gov.afip.dif.FEV1/\">\
     <FEDummyResult><AppServer>OK</AppServer><DbServer>OK</DbServer>\
     <AuthServer>OK</AuthServer></FEDummyResult>\
     </FEDummyResponse></soap:Body></soap:Envelope>"
}

fn client(
    server: &mockito::Server,
    store: Arc<dyn TicketStore>,
    signer: Arc<dyn TraSigner>,
) -> AfipClient {
    afip_ws::utils::logging::init();
    let mut registry = EndpointRegistry::new(Environment::Sandbox);
    registry.override_login_url(format!("{}/wsaa", server.url()));
    registry.override_service_url(Service::Wsfe, format!("{}/wsfe", server.url()));
    registry.override_service_url(Service::PadronA5, format!("{}/padron", server.url()));
    AfipClient::with_components(CUIT, registry, store, signer, Duration::from_secs(5)).unwrap()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

#[tokio::test]
async fn cold_cache_runs_the_full_chain_and_succeeds() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/wsaa")
        .match_body(Matcher::Regex("U0lHTkVELVRSQQ==".to_string()))
        .with_status(200)
        .with_body(login_success_body())
        .create_async()
        .await;
    let operation = server
        .mock("POST", "/wsfe")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(format!("<Token>{ISSUED_TOKEN}</Token>")),
            Matcher::Regex(format!("<Sign>{ISSUED_SIGN}</Sign>")),
            Matcher::Regex(format!("<Cuit>{CUIT}</Cuit>")),
        ]))
        .with_status(200)
        .with_body(wsfe_dummy_body())
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    let signer = Arc::new(RecordingSigner::ok());
    let client = client(&server, store.clone(), signer.clone());

    let result = client.dispatch(Service::Wsfe, "FEDummy", None).await;

    match result {
        DispatchResult::Success(payload) => {
            assert_eq!(payload["FEDummyResult"]["AppServer"], json!("OK"));
        }
        DispatchResult::Failure(errors) => panic!("expected success, got {errors:?}"),
    }
    assert_eq!(signer.call_count(), 1);
    let cached = store.get(Service::Wsfe, Environment::Sandbox).unwrap();
    assert_eq!(cached.token, ISSUED_TOKEN);
    login.assert_async().await;
    operation.assert_async().await;
}

#[tokio::test]
async fn expired_cached_ticket_is_renewed_and_replaced() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/wsaa")
        .with_status(200)
        .with_body(login_success_body())
        .expect(1)
        .create_async()
        .await;
    let operation = server
        .mock("POST", "/wsfe")
        .match_body(Matcher::Regex(format!("<Token>{ISSUED_TOKEN}</Token>")))
        .with_status(200)
        .with_body(wsfe_dummy_body())
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    store
        .put(
            Service::Wsfe,
            Environment::Sandbox,
            &ticket("stale-token", "stale-sign", -1, Service::Wsfe),
        )
        .unwrap();
    let signer = Arc::new(RecordingSigner::ok());
    let client = client(&server, store.clone(), signer.clone());

    let result = client.dispatch(Service::Wsfe, "FEDummy", None).await;

    assert!(result.is_success());
    assert_eq!(signer.call_count(), 1);
    let cached = store.get(Service::Wsfe, Environment::Sandbox).unwrap();
    assert_eq!(cached.token, ISSUED_TOKEN);
    assert!(cached.is_valid_at(Utc::now()));
    login.assert_async().await;
    operation.assert_async().await;
}

#[tokio::test]
async fn signing_failure_short_circuits_before_any_network_call() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/wsaa")
        .expect(0)
        .create_async()
        .await;
    let operation = server
        .mock("POST", "/wsfe")
        .expect(0)
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    let client = client(&server, store.clone(), Arc::new(RecordingSigner::failing()));

    let result = client.dispatch(Service::Wsfe, "FEDummy", None).await;

    match result {
        DispatchResult::Failure(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code, TRA_SIGN_ERR);
        }
        DispatchResult::Success(_) => panic!("expected failure"),
    }
    assert!(store.get(Service::Wsfe, Environment::Sandbox).is_none());
    login.assert_async().await;
    operation.assert_async().await;
}

#[tokio::test]
async fn login_fault_aborts_dispatch_with_the_fault_code() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/wsaa")
        .with_status(500)
        .with_body(fault_body("ns1:auth.invalidCert", "Certificate not valid"))
        .create_async()
        .await;
    let operation = server
        .mock("POST", "/wsfe")
        .expect(0)
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    let client = client(&server, store.clone(), Arc::new(RecordingSigner::ok()));

    let result = client.dispatch(Service::Wsfe, "FEDummy", None).await;

    match result {
        DispatchResult::Failure(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code, "ns1:auth.invalidCert");
            assert_eq!(errors[0].message, "Certificate not valid");
        }
        DispatchResult::Success(_) => panic!("expected failure"),
    }
    assert!(store.get(Service::Wsfe, Environment::Sandbox).is_none());
    operation.assert_async().await;
}

#[tokio::test]
async fn service_fault_is_not_conflated_with_auth_failures() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/wsaa")
        .expect(0)
        .create_async()
        .await;
    server
        .mock("POST", "/wsfe")
        .with_status(500)
        .with_body(fault_body("ns:600", "ValidacionDeToken: No validaron las credenciales"))
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    store
        .put(
            Service::Wsfe,
            Environment::Sandbox,
            &ticket("cached-token", "cached-sign", 43200, Service::Wsfe),
        )
        .unwrap();
    let signer = Arc::new(RecordingSigner::ok());
    let client = client(&server, store, signer.clone());

    let result = client
        .dispatch(Service::Wsfe, "FECAESolicitar", Some(Map::new()))
        .await;

    match result {
        DispatchResult::Failure(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].code, "ns:600");
            assert!(errors[0].message.starts_with("ValidacionDeToken"));
        }
        DispatchResult::Success(_) => panic!("expected failure"),
    }
    assert_eq!(signer.call_count(), 0);
    login.assert_async().await;
}

#[tokio::test]
async fn empty_service_response_maps_to_the_generic_code() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/wsfe")
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    store
        .put(
            Service::Wsfe,
            Environment::Sandbox,
            &ticket("cached-token", "cached-sign", 43200, Service::Wsfe),
        )
        .unwrap();
    let client = client(&server, store, Arc::new(RecordingSigner::ok()));

    let result = client.dispatch(Service::Wsfe, "FEDummy", None).await;

    match result {
        DispatchResult::Failure(errors) => {
            assert_eq!(errors[0].code, SERVICE_UNEXPECTED);
        }
        DispatchResult::Success(_) => panic!("expected failure"),
    }
}

#[tokio::test]
async fn caller_supplied_credentials_survive_injection() {
    let mut server = mockito::Server::new_async().await;
    let operation = server
        .mock("POST", "/wsfe")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("<Token>CALLER-TOKEN</Token>".to_string()),
            Matcher::Regex("<Sign>cached-sign</Sign>".to_string()),
            Matcher::Regex(format!("<Cuit>{CUIT}</Cuit>")),
        ]))
        .with_status(200)
        .with_body(wsfe_dummy_body())
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    store
        .put(
            Service::Wsfe,
            Environment::Sandbox,
            &ticket("cached-token", "cached-sign", 43200, Service::Wsfe),
        )
        .unwrap();
    let client = client(&server, store, Arc::new(RecordingSigner::ok()));

    let params = object(json!({"Auth": {"Token": "CALLER-TOKEN"}}));
    let result = client.dispatch(Service::Wsfe, "FEDummy", Some(params)).await;

    assert!(result.is_success());
    operation.assert_async().await;
}

#[tokio::test]
async fn flat_scheme_fills_all_fields_for_registry_lookups() {
    let mut server = mockito::Server::new_async().await;
    let operation = server
        .mock("POST", "/padron")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("<token>cached-token</token>".to_string()),
            Matcher::Regex("<sign>cached-sign</sign>".to_string()),
            Matcher::Regex(format!("<cuitRepresentada>{CUIT}</cuitRepresentada>")),
            Matcher::Regex("<idPersona>20000000001</idPersona>".to_string()),
        ]))
        .with_status(200)
        .with_body(
            "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\">\
             <soap:Body><getPersonaResponse><personaReturn>\
             <persona><idPersona>20000000001</idPersona></persona>\
             </personaReturn></getPersonaResponse></soap:Body></soap:Envelope>",
        )
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    store
        .put(
            Service::PadronA5,
            Environment::Sandbox,
            &ticket("cached-token", "cached-sign", 43200, Service::PadronA5),
        )
        .unwrap();
    let client = client(&server, store, Arc::new(RecordingSigner::ok()));

    let params = object(json!({"idPersona": "20000000001"}));
    let result = client
        .dispatch(Service::PadronA5, "getPersona", Some(params))
        .await;

    assert!(result.is_success());
    operation.assert_async().await;
}

#[tokio::test]
async fn valid_cached_ticket_is_reused_across_dispatches() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/wsaa")
        .with_status(200)
        .with_body(login_success_body())
        .expect(1)
        .create_async()
        .await;
    let operation = server
        .mock("POST", "/wsfe")
        .with_status(200)
        .with_body(wsfe_dummy_body())
        .expect(2)
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    let signer = Arc::new(RecordingSigner::ok());
    let client = client(&server, store, signer.clone());

    assert!(client.dispatch(Service::Wsfe, "FEDummy", None).await.is_success());
    assert!(client.dispatch(Service::Wsfe, "FEDummy", None).await.is_success());

    assert_eq!(signer.call_count(), 1);
    login.assert_async().await;
    operation.assert_async().await;
}

#[tokio::test]
async fn concurrent_cold_dispatches_share_one_renewal() {
    let mut server = mockito::Server::new_async().await;
    let login = server
        .mock("POST", "/wsaa")
        .with_status(200)
        .with_body(login_success_body())
        .expect(1)
        .create_async()
        .await;
    let operation = server
        .mock("POST", "/wsfe")
        .with_status(200)
        .with_body(wsfe_dummy_body())
        .expect(2)
        .create_async()
        .await;

    let store = Arc::new(MemoryTicketStore::new());
    let signer = Arc::new(RecordingSigner::ok());
    let client = Arc::new(client(&server, store, signer.clone()));

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.dispatch(Service::Wsfe, "FEDummy", None).await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.dispatch(Service::Wsfe, "FEDummy", None).await })
    };

    assert!(first.await.unwrap().is_success());
    assert!(second.await.unwrap().is_success());
    assert_eq!(signer.call_count(), 1);
    login.assert_async().await;
    operation.assert_async().await;
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// AFIP service families reachable through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    /// Electronic invoicing A, B, C (no line detail).
    Wsfe,
    /// Electronic invoicing A, B with line detail.
    Wsmtxca,
    /// Export invoicing (type E).
    Wsfex,
    /// Tourism invoicing (type T).
    Wsct,
    /// Taxpayer registry lookups.
    PadronA5,
    /// Fiscal bonds.
    Wsbfev,
    /// Surety insurance.
    Wsseg,
}

impl Service {
    /// Stable identifier, used as the TRA service name and in cache file
    /// names.
    pub fn id(&self) -> &'static str {
        match self {
            Service::Wsfe => "wsfe",
            Service::Wsmtxca => "wsmtxca",
            Service::Wsfex => "wsfex",
            Service::Wsct => "wsct",
            Service::PadronA5 => "padron_a5",
            Service::Wsbfev => "wsbfev",
            Service::Wsseg => "wsseg",
        }
    }

    pub fn all() -> &'static [Service] {
        &[
            Service::Wsfe,
            Service::Wsmtxca,
            Service::Wsfex,
            Service::Wsct,
            Service::PadronA5,
            Service::Wsbfev,
            Service::Wsseg,
        ]
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Deployment the client talks to. Sandbox is AFIP's homologation
/// environment, mirroring production under a separate URL set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Production,
    Sandbox,
}

impl Environment {
    /// Suffix appended to cache file names in the sandbox environment, so
    /// homologation tickets never shadow production ones.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Environment::Production => "",
            Environment::Sandbox => "-homo",
        }
    }
}

/// Where a service expects the WSAA credentials inside the call payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Auth.Token` / `Auth.Sign` / `Auth.Cuit` block at the top level.
    TopLevelAuth,
    /// `authRequest.token` / `.sign` / `.cuitRepresentada` nested block.
    NestedAuthRequest,
    /// `token` / `sign` / `cuitRepresentada` directly at the top level.
    FlatTokenSign,
    /// The operation carries no credentials.
    None,
}

/// One service entry: both endpoint URLs, the SOAP namespace for request
/// envelopes, and the credential scheme.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub service: Service,
    pub production_url: String,
    pub sandbox_url: String,
    pub namespace: String,
    pub scheme: AuthScheme,
}

/// Static endpoint table. The environment chosen at construction selects
/// one of the two URL sets for every entry, including the WSAA login
/// endpoint.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    environment: Environment,
    login_production: String,
    login_sandbox: String,
    services: HashMap<Service, ServiceDescriptor>,
}

impl EndpointRegistry {
    pub fn new(environment: Environment) -> Self {
        let mut services = HashMap::new();
        for descriptor in default_descriptors() {
            services.insert(descriptor.service, descriptor);
        }
        Self {
            environment,
            login_production: "https://wsaa.afip.gov.ar/ws/services/LoginCms".to_string(),
            login_sandbox: "https://wsaahomo.afip.gov.ar/ws/services/LoginCms".to_string(),
            services,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// WSAA authentication endpoint for the selected environment.
    pub fn login_url(&self) -> &str {
        match self.environment {
            Environment::Production => &self.login_production,
            Environment::Sandbox => &self.login_sandbox,
        }
    }

    pub fn descriptor(&self, service: Service) -> &ServiceDescriptor {
        // The constructor inserts every Service variant.
        &self.services[&service]
    }

    pub fn url_for(&self, service: Service) -> &str {
        let descriptor = self.descriptor(service);
        match self.environment {
            Environment::Production => &descriptor.production_url,
            Environment::Sandbox => &descriptor.sandbox_url,
        }
    }

    pub fn scheme_for(&self, service: Service) -> AuthScheme {
        self.descriptor(service).scheme
    }

    pub fn namespace_for(&self, service: Service) -> &str {
        &self.descriptor(service).namespace
    }

    /// Point one service at a different URL in both environments. Meant
    /// for tests running against a local mock server.
    pub fn override_service_url(&mut self, service: Service, url: impl Into<String>) {
        let url = url.into();
        if let Some(descriptor) = self.services.get_mut(&service) {
            descriptor.production_url = url.clone();
            descriptor.sandbox_url = url;
        }
    }

    /// Point the WSAA login endpoint at a different URL in both
    /// environments.
    pub fn override_login_url(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.login_production = url.clone();
        self.login_sandbox = url;
    }
}

fn default_descriptors() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor {
            service: Service::Wsfe,
            production_url: "https://servicios1.afip.gov.ar/wsfev1/service.asmx".to_string(),
            sandbox_url: "https://wswhomo.afip.gov.ar/wsfev1/service.asmx".to_string(),
            namespace: "http://ar.gov.afip.dif.FEV1/".to_string(),
            scheme: AuthScheme::TopLevelAuth,
        },
        ServiceDescriptor {
            service: Service::Wsmtxca,
            production_url: "https://serviciosjava.afip.gob.ar/wsmtxca/services/MTXCAService"
                .to_string(),
            sandbox_url: "https://fwshomo.afip.gob.ar/wsmtxca/services/MTXCAService".to_string(),
            namespace: "http://impl.service.wsmtxca.afip.gov.ar/service/".to_string(),
            scheme: AuthScheme::NestedAuthRequest,
        },
        ServiceDescriptor {
            service: Service::Wsfex,
            production_url: "https://servicios1.afip.gov.ar/wsfexv1/service.asmx".to_string(),
            sandbox_url: "https://wswhomo.afip.gov.ar/wsfexv1/service.asmx".to_string(),
            namespace: "http://ar.gov.afip.dif.fexv1/".to_string(),
            scheme: AuthScheme::TopLevelAuth,
        },
        ServiceDescriptor {
            service: Service::Wsct,
            production_url: "https://serviciosjava.afip.gob.ar/wsct/CTService".to_string(),
            sandbox_url: "https://fwshomo.afip.gob.ar/wsct/CTService".to_string(),
            namespace: "http://impl.service.wsct.afip.gov.ar/service/".to_string(),
            scheme: AuthScheme::NestedAuthRequest,
        },
        ServiceDescriptor {
            service: Service::PadronA5,
            production_url: "https://aws.afip.gov.ar/sr-padron/webservices/personaServiceA5"
                .to_string(),
            sandbox_url: "https://awshomo.afip.gov.ar/sr-padron/webservices/personaServiceA5"
                .to_string(),
            namespace: "http://a5.soap.ws.server.puc.sr/".to_string(),
            scheme: AuthScheme::FlatTokenSign,
        },
        ServiceDescriptor {
            service: Service::Wsbfev,
            production_url: "https://servicios1.afip.gov.ar/wsbfev1/service.asmx".to_string(),
            sandbox_url: "https://wswhomo.afip.gov.ar/wsbfev1/service.asmx".to_string(),
            namespace: "http://ar.gov.afip.dif.bfev1/".to_string(),
            scheme: AuthScheme::TopLevelAuth,
        },
        ServiceDescriptor {
            service: Service::Wsseg,
            production_url: "https://servicios1.afip.gov.ar/wsseg/service.asmx".to_string(),
            sandbox_url: "https://wswhomo.afip.gov.ar/wsseg/service.asmx".to_string(),
            namespace: "http://ar.gov.afip.dif.wsseg/".to_string(),
            scheme: AuthScheme::TopLevelAuth,
        },
    ]
}

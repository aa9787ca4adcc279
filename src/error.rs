use serde::{Deserialize, Serialize};

/// Reported when the WSAA authentication endpoint is unreachable or its
/// response cannot be used.
pub const WSAA_UNEXPECTED: &str = "afip_unexpected_error_wsaa";

/// Reported when a target service call fails outside an explicit fault.
pub const SERVICE_UNEXPECTED: &str = "afip_unexpected_error";

/// Reported when the local CMS signing step fails. Calls failing here
/// never reach the network.
pub const TRA_SIGN_ERR: &str = "tra_sign_err";

/// One normalized error from the dispatch chain. Explicit server faults
/// keep their own code and message; everything else collapses to one of
/// the fixed codes above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn wsaa_unexpected() -> Self {
        Self::new(
            WSAA_UNEXPECTED,
            "Unexpected response from the AFIP authentication service.",
        )
    }

    pub fn service_unexpected() -> Self {
        Self::new(SERVICE_UNEXPECTED, "Unexpected response from the AFIP service.")
    }

    pub fn sign_failed() -> Self {
        Self::new(TRA_SIGN_ERR, "Could not sign the access ticket request.")
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_codes_are_stable() {
        assert_eq!(ErrorRecord::wsaa_unexpected().code, "afip_unexpected_error_wsaa");
        assert_eq!(ErrorRecord::service_unexpected().code, "afip_unexpected_error");
        assert_eq!(ErrorRecord::sign_failed().code, "tra_sign_err");
    }

    #[test]
    fn display_includes_code_and_message() {
        let record = ErrorRecord::new("ns1:auth.invalidCert", "Certificate not valid");
        assert_eq!(record.to_string(), "ns1:auth.invalidCert: Certificate not valid");
    }
}

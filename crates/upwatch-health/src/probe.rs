//! Reachability probe logic.
//!
//! One bounded GET per target and cycle, no retries. A target is reachable
//! when it answers with a status in `[200, 400)`. Transport failures count
//! as unreachable, except certificate name/issuer failures against a literal
//! IP host: self-signed certificates are expected when checking by IP.

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::{Client, Url};
use rustls::CertificateError;
use tracing::{debug, warn};
use url::Host;

use upwatch_state::{MonitoredTarget, TargetId};

/// Result of a single reachability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub target_id: TargetId,
    pub reachable: bool,
    /// HTTP status, when a response was received.
    pub status_code: Option<u16>,
    /// Transport error, when no response was received.
    pub error: Option<String>,
}

/// Build the HTTP client shared by every probe.
///
/// Timeouts are applied per request, redirects and TLS verification use the
/// reqwest defaults.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!("upwatch/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Probe a target's effective check URL.
///
/// Returns `None` when the URL cannot be parsed or the request cannot be
/// built; the target is then left out of this cycle entirely.
pub async fn probe_target(
    client: &Client,
    target: &MonitoredTarget,
    timeout: Duration,
) -> Option<ProbeOutcome> {
    let check_url = target.effective_check_url();

    let url = match Url::parse(check_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(target_id = %target.id, url = %check_url, error = %e, "invalid check url, skipping");
            return None;
        }
    };
    let host_is_ip = host_is_ip(&url);

    let request = match client.get(url).build() {
        Ok(req) => req,
        Err(e) => {
            warn!(target_id = %target.id, url = %check_url, error = %e, "request creation failed, skipping");
            return None;
        }
    };

    let outcome = match tokio::time::timeout(timeout, client.execute(request)).await {
        Ok(Ok(resp)) => {
            let status = resp.status().as_u16();
            debug!(target_id = %target.id, status, "probe response");
            ProbeOutcome {
                target_id: target.id.clone(),
                reachable: (200..400).contains(&status),
                status_code: Some(status),
                error: None,
            }
        }
        Ok(Err(e)) => {
            debug!(target_id = %target.id, error = %e, "probe connection error");
            let exempt = failure_is_reachable(host_is_ip, &e);
            if exempt {
                debug!(target_id = %target.id, "ignoring tls error for ip host, marking reachable");
            }
            ProbeOutcome {
                target_id: target.id.clone(),
                reachable: exempt,
                status_code: None,
                error: Some(error_chain(&e)),
            }
        }
        Err(_) => {
            debug!(target_id = %target.id, ?timeout, "probe timed out");
            ProbeOutcome {
                target_id: target.id.clone(),
                reachable: false,
                status_code: None,
                error: Some(format!("timed out after {timeout:?}")),
            }
        }
    };

    Some(outcome)
}

/// Whether the URL's host is a literal IPv4/IPv6 address rather than a name.
fn host_is_ip(url: &Url) -> bool {
    matches!(url.host(), Some(Host::Ipv4(_) | Host::Ipv6(_)))
}

/// Classify a failed request. Only certificate identity failures against an
/// IP host count as reachable.
fn failure_is_reachable(host_is_ip: bool, err: &(dyn StdError + 'static)) -> bool {
    host_is_ip && is_certificate_identity_error(err)
}

/// Whether `err` was caused by a certificate hostname mismatch or an unknown
/// issuer.
///
/// Walks the whole source chain. `io::Error` hides its payload from
/// `source()`, so wrapped payloads are inspected through `get_ref()`.
pub fn is_certificate_identity_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            if is_identity_failure(tls) {
                return true;
            }
        }
        if let Some(inner) = e.downcast_ref::<std::io::Error>().and_then(|io| io.get_ref()) {
            if is_certificate_identity_error(inner) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn is_identity_failure(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. }
                | CertificateError::UnknownIssuer
        )
    )
}

/// Render an error with its causes, `outer: inner: root`.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        out.push_str(": ");
        out.push_str(&e.to_string());
        current = e.source();
    }
    out
}

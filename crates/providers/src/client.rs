use homeagent_core::Error;
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;
use tracing::{info, warn};

/// Build a reqwest client for one provider.
///
/// `proxy`: `None` follows `HTTPS_PROXY`/`HTTP_PROXY`, `Some("")` forces a
/// direct connection, anything else is used as the proxy URL.
pub fn build_http_client(proxy: Option<&str>, api_base: &str, timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match proxy.map(str::trim) {
        Some("") => {
            info!(api_base = %api_base, "LLM provider forced to direct connect (proxy disabled)");
            builder = builder.no_proxy();
        }
        Some(proxy_url) => match Proxy::all(proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, api_base = %api_base, "LLM provider using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, falling back to direct connect");
            }
        },
        None => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with proxy, using default");
        Client::new()
    })
}

/// Map a non-success HTTP status to an error. 5xx responses are transient
/// and may be retried by the gateway; everything else is final.
pub fn status_error(provider: &str, status: StatusCode, body: &str) -> Error {
    let preview = &body[..truncate_at_char_boundary(body, 500)];
    if status.is_server_error() {
        Error::ProviderTransient(format!("{} API error {}: {}", provider, status, preview))
    } else {
        Error::Provider(format!("{} API error {}: {}", provider, status, preview))
    }
}

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
pub fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

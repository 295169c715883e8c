use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use reqwest::redirect::{Attempt, Policy};
use tracing::warn;
use url::{Host, Url};

const USER_AGENT: &str = concat!("media-relay/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// Build the shared client used by HTTP-based strategies.
///
/// No overall request timeout is set: strategies bound their own attempts and
/// long downloads must not be cut off by the client. Unless
/// `allow_internal_redirects` is set, a public URL may not redirect into a
/// loopback, private or link-local host.
pub fn build_http_client(allow_internal_redirects: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .pool_max_idle_per_host(10)
        .redirect(redirect_policy(allow_internal_redirects))
        .build()
        .unwrap_or_else(|error| {
            warn!(error = %error, "Failed to build HTTP client; falling back to reqwest defaults");
            reqwest::Client::new()
        })
}

fn redirect_policy(allow_internal: bool) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let from_public = attempt
            .previous()
            .first()
            .is_some_and(|origin| !is_internal_host(origin));
        if !allow_internal && from_public && is_internal_host(attempt.url()) {
            warn!(location = %attempt.url(), "Blocked redirect to internal host");
            return attempt.error("redirect to internal host blocked");
        }
        attempt.follow()
    })
}

/// Whether `url` names this machine or a private network by literal address
/// or `localhost`. Names are not resolved.
pub fn is_internal_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_internal_v4(ip),
        Some(Host::Ipv6(ip)) => is_internal_v6(ip),
        None => false,
    }
}

fn is_internal_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (64..128).contains(&b))
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_v4(v4);
    }
    ip.is_loopback() || ip.is_unspecified() || ip.is_unique_local() || ip.is_unicast_link_local()
}

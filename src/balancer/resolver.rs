use std::net::IpAddr;

use tracing::debug;
use tracing::error;
use url::Url;

use crate::Result;
use crate::ServiceError;

/// Turn configured service addresses into balancer nodes.
///
/// Every address must be a URL with an explicit port. Entries that fail to
/// parse or lack a port are logged and skipped. IP literals produce one
/// node; host names are resolved and produce one node per address found.
/// A failed DNS lookup aborts the whole resolution.
pub async fn resolve_nodes(
    addresses: &[String],
    weight: i64,
) -> Result<Vec<(String, i64)>> {
    let mut nodes = Vec::new();

    for addr in addresses {
        let Some((scheme, host, port)) = split_address(addr) else {
            continue;
        };

        match host.parse::<IpAddr>() {
            Ok(ip) => nodes.push((endpoint_for(&scheme, ip, port), weight)),
            Err(_) => {
                let resolved = tokio::net::lookup_host((host.as_str(), port))
                    .await
                    .map_err(|source| ServiceError::Resolve {
                        host: host.clone(),
                        source,
                    })?;
                for socket in resolved {
                    debug!(%host, ip = %socket.ip(), "resolved service host");
                    nodes.push((endpoint_for(&scheme, socket.ip(), port), weight));
                }
            }
        }
    }

    Ok(nodes)
}

/// `(scheme, host, port)` of a configured address, or `None` when unusable
pub(crate) fn split_address(addr: &str) -> Option<(String, String, u16)> {
    let url = match Url::parse(addr.trim()) {
        Ok(url) => url,
        Err(e) => {
            error!(%addr, "invalid service address: {}", e);
            return None;
        }
    };

    // `port()` is None for the scheme's default port as well; only explicit ports are accepted
    let Some(port) = url.port() else {
        error!(%addr, "service address must carry an explicit port");
        return None;
    };

    let host = match url.host() {
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        Some(host) => host.to_string(),
        None => {
            error!(%addr, "service address has no host");
            return None;
        }
    };

    Some((url.scheme().to_string(), host, port))
}

fn endpoint_for(
    scheme: &str,
    ip: IpAddr,
    port: u16,
) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{scheme}://{v4}:{port}"),
        IpAddr::V6(v6) => format!("{scheme}://[{v6}]:{port}"),
    }
}

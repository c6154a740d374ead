//! Best-effort reverse DNS for connection records.

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::IpAddr;
use tracing::debug;

/// Reverse-DNS lookups that never fail the caller: any resolver error is
/// swallowed to a debug log and reported as `None`.
#[derive(Clone)]
pub struct ReverseDns {
    resolver: TokioResolver,
}

impl ReverseDns {
    /// Build from the system resolver config, falling back to defaults.
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });

        Self { resolver }
    }

    /// First PTR name for `ip`, without the trailing dot.
    pub async fn lookup(&self, ip: IpAddr) -> Option<String> {
        match self.resolver.reverse_lookup(ip).await {
            Ok(response) => response
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!(%ip, error = %e, "reverse lookup failed");
                None
            }
        }
    }
}

impl Default for ReverseDns {
    fn default() -> Self {
        Self::new()
    }
}

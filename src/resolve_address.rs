//! Resolve IPs from hostnames, following SRV redirects first.

use async_recursion::async_recursion;
use std::net::IpAddr;
use thiserror::Error;
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::ResolveError,
    TokioAsyncResolver,
};

use crate::server_address::ServerAddress;

/// SRV redirects followed before giving up, which also breaks cycles
/// between names.
const MAX_SRV_REDIRECTS: u8 = 8;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("No SRV record found")]
    NoSrvRecord,
    #[error("No IP found")]
    NoIp,
    #[error("Could not set up the resolver: {0}")]
    Setup(#[from] ResolveError),
}

/// Resolve a server address into an IP address and port.
/// If it's already an IP address, it's returned as-is.
///
/// `service` is the SRV prefix to try first, such as `_minecraft._tcp`.
/// Pass `None` to skip the SRV lookup.
pub async fn resolve_address(
    address: &ServerAddress,
    service: Option<&str>,
) -> Result<ServerAddress, ResolverError> {
    if let Ok(ip) = address.host.parse::<IpAddr>() {
        return Ok(ServerAddress::new(ip.to_string().as_str(), address.port));
    }

    // we specify Cloudflare instead of the default resolver because
    // trust_dns_resolver has an issue on Windows where it's really slow using the
    // default resolver
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), ResolverOpts::default())?;
    resolve_with(&resolver, address, service, 0).await
}

#[async_recursion]
async fn resolve_with<'a>(
    resolver: &'a TokioAsyncResolver,
    address: &'a ServerAddress,
    service: Option<&'a str>,
    redirects: u8,
) -> Result<ServerAddress, ResolverError> {
    if let Ok(ip) = address.host.parse::<IpAddr>() {
        return Ok(ServerAddress::new(ip.to_string().as_str(), address.port));
    }

    if let Some(service) = service {
        let srv_redirect_result = resolver
            .srv_lookup(format!("{service}.{}", address.host).as_str())
            .await;

        // if it resolves that means it's a redirect so we resolve again
        // with the new host
        if let Ok(redirect_result) = srv_redirect_result {
            let redirect_srv = redirect_result
                .iter()
                .next()
                .ok_or(ResolverError::NoSrvRecord)?;
            let redirect_address = ServerAddress {
                host: redirect_srv.target().to_utf8().trim_end_matches('.').to_string(),
                port: redirect_srv.port(),
            };
            tracing::debug!("{address} redirects to {redirect_address}");

            if redirect_address.host == address.host {
                return lookup_ip(resolver, &redirect_address).await;
            }
            let redirects = follow_redirect(redirects)?;
            return resolve_with(resolver, &redirect_address, Some(service), redirects).await;
        }
    }

    lookup_ip(resolver, address).await
}

fn follow_redirect(redirects: u8) -> Result<u8, ResolverError> {
    if redirects >= MAX_SRV_REDIRECTS {
        tracing::warn!("gave up after {redirects} SRV redirects");
        return Err(ResolverError::NoSrvRecord);
    }
    Ok(redirects + 1)
}

async fn lookup_ip(
    resolver: &TokioAsyncResolver,
    address: &ServerAddress,
) -> Result<ServerAddress, ResolverError> {
    let lookup_ip = resolver
        .lookup_ip(address.host.as_str())
        .await
        .map_err(|_| ResolverError::NoIp)?;
    let ip = lookup_ip.iter().next().ok_or(ResolverError::NoIp)?;
    Ok(ServerAddress::new(ip.to_string().as_str(), address.port))
}

use super::types::IncomingPack;
use crate::error::GitDepsError;
use crate::extract::PackError;
use reqwest::blocking::Client;
use std::io::Read;
use url::Url;

/// Source of compressed pack streams.
///
/// Implementations are shared by all download workers.
pub trait PackFetcher: Send + Sync {
    fn open(&self, pack: &IncomingPack) -> Result<Box<dyn Read + Send>, PackError>;
}

/// Fetches packs over HTTP. Packs from manifests that set `IgnoreProxy` go
/// through a client with no proxy configured.
pub struct HttpPackFetcher {
    client: Client,
    direct_client: Client,
}

impl HttpPackFetcher {
    pub fn new(proxy: Option<&Url>, max_connections: usize) -> Result<Self, GitDepsError> {
        let mut builder = Self::builder(max_connections);
        builder = match proxy {
            Some(proxy) => {
                tracing::debug!(proxy = %proxy.host_str().unwrap_or_default(), "Using HTTP proxy");
                builder.proxy(reqwest::Proxy::all(proxy.as_str())?)
            }
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            direct_client: Self::builder(max_connections).no_proxy().build()?,
        })
    }

    fn builder(max_connections: usize) -> reqwest::blocking::ClientBuilder {
        // Packs can be large, so no overall request deadline.
        Client::builder()
            .timeout(None)
            .pool_max_idle_per_host(max_connections)
            .user_agent(concat!("gitdeps/", env!("CARGO_PKG_VERSION")))
    }
}

impl PackFetcher for HttpPackFetcher {
    fn open(&self, pack: &IncomingPack) -> Result<Box<dyn Read + Send>, PackError> {
        let client = if pack.ignore_proxy {
            &self.direct_client
        } else {
            &self.client
        };

        tracing::debug!(url = %pack.url, "Requesting pack");
        let response = client
            .get(&pack.url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| PackError::Network {
                url: pack.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(response))
    }
}

//! `SyftClient` facade wiring both transports to one auth provider.

use crate::auth::{AuthProvider, StaticTokenAuth};
use crate::config::{RpcConfig, TransportConfig};
use crate::network::{HttpTransport, ReqwestTransport, RetryPolicy};
use crate::rpc::RpcClient;
use crate::transport::{ConnectionManager, SocketConnector, TungsteniteConnector};
use crate::Result;
use std::sync::Arc;
use url::Url;

/// Real-time transport plus RPC correlator for one SyftBox server.
#[derive(Clone)]
pub struct SyftClient {
    server_url: Url,
    auth: Arc<dyn AuthProvider>,
    transport: ConnectionManager,
    rpc: RpcClient,
}

impl SyftClient {
    /// Start configuring a client for `server_url`.
    pub fn builder(server_url: Url) -> SyftClientBuilder {
        SyftClientBuilder::new(server_url)
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    pub fn transport(&self) -> &ConnectionManager {
        &self.transport
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Disconnect the transport and cancel every pending poll.
    pub fn shutdown(&self) {
        self.transport.disconnect();
        self.rpc.cleanup();
    }
}

impl std::fmt::Debug for SyftClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyftClient")
            .field("server_url", &self.server_url.as_str())
            .field("transport", &self.transport)
            .field("rpc", &self.rpc)
            .finish()
    }
}

/// Builder for `SyftClient`.
///
/// # Example
///
/// ```rust,ignore
/// use syft_client::SyftClient;
///
/// let client = SyftClient::builder("https://syftbox.net".parse()?)
///     .with_token("secret")
///     .build()?;
/// client.transport().connect().await?;
/// ```
pub struct SyftClientBuilder {
    server_url: Url,
    auth: Option<Arc<dyn AuthProvider>>,
    transport_config: Option<TransportConfig>,
    rpc_config: RpcConfig,
    http_retry: Option<RetryPolicy>,
    connector: Option<Arc<dyn SocketConnector>>,
    http: Option<Arc<dyn HttpTransport>>,
}

impl SyftClientBuilder {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            auth: None,
            transport_config: None,
            rpc_config: RpcConfig::default(),
            http_retry: None,
            connector: None,
            http: None,
        }
    }

    /// Use a fixed bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Arc::new(StaticTokenAuth::new(token)));
        self
    }

    /// Use a custom auth provider.
    ///
    /// Default: no session, so connects fail with an authentication error.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override transport tuning. The config's own server URL is kept.
    pub fn with_transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = Some(config);
        self
    }

    pub fn with_rpc_config(mut self, config: RpcConfig) -> Self {
        self.rpc_config = config;
        self
    }

    /// Retry policy for the default HTTP transport.
    pub fn with_http_retry(mut self, retry: RetryPolicy) -> Self {
        self.http_retry = Some(retry);
        self
    }

    /// Replace the websocket connector.
    pub fn with_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the HTTP transport. `with_http_retry` is ignored when set.
    pub fn with_http_transport(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<SyftClient> {
        let auth = self
            .auth
            .unwrap_or_else(|| Arc::new(StaticTokenAuth::anonymous()));

        let http: Arc<dyn HttpTransport> = match self.http {
            Some(http) => http,
            None => {
                let mut transport =
                    ReqwestTransport::new(self.server_url.clone())?.with_auth(auth.clone());
                if let Some(retry) = self.http_retry {
                    transport = transport.with_retry(retry);
                }
                Arc::new(transport)
            }
        };

        let transport_config = self
            .transport_config
            .unwrap_or_else(|| TransportConfig::new(self.server_url.clone()));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector::new()));

        Ok(SyftClient {
            transport: ConnectionManager::new(transport_config, auth.clone(), connector),
            rpc: RpcClient::with_config(http, self.rpc_config),
            server_url: self.server_url,
            auth,
        })
    }
}

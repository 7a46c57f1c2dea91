// File: ./src/client/transport.rs
//! Shared HTTPS client used by the calendar source and the webhook notifier.
use crate::client::middleware::{UserAgentLayer, UserAgentService};
use anyhow::Result;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;

pub type HttpsClient = UserAgentService<Client<hyper_rustls::HttpsConnector<HttpConnector>, String>>;

pub const USER_AGENT: &str = concat!("lessoncal/", env!("CARGO_PKG_VERSION"));

/// Builds a rustls-backed HTTP/1 client trusting the system certificate store.
pub fn build_client() -> Result<HttpsClient> {
    let mut root_store = rustls::RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        log::debug!("Skipping native certificate: {}", err);
    }
    root_store.add_parsable_certificates(result.certs);
    if root_store.is_empty() {
        // Plain http endpoints still work; https ones will fail the handshake.
        log::warn!("No valid system certificates found.");
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let https_connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .build();

    let http_client = Client::builder(TokioExecutor::new()).build(https_connector);
    Ok(UserAgentLayer::new(USER_AGENT.to_string()).layer(http_client))
}

/// A buffered response.
#[derive(Debug)]
pub struct Fetched {
    pub status: StatusCode,
    pub body: String,
}

/// Sends `req` through `service`, buffering the body, bounded by `timeout`.
pub async fn send<S, B>(service: S, req: Request<String>, timeout: Duration) -> Result<Fetched>
where
    S: tower_service::Service<Request<String>, Response = Response<B>>,
    S::Error: std::error::Error + Send + Sync + 'static,
    B: http_body::Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let method = req.method().clone();
    let uri = req.uri().clone();

    let exchange = async {
        let response = service.oneshot(req).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let body = String::from_utf8_lossy(&bytes).into_owned();
        Ok::<_, anyhow::Error>(Fetched { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("{} {} timed out after {:?}", method, uri, timeout),
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! TLS accept loop serving an axum router per connection.
//!
//! axum itself does not terminate TLS, and the sync API needs the
//! peer's client certificate available to the handlers. The loop
//! accepts TCP, performs the rustls handshake, captures the peer
//! certificate from the session, and serves the router over the
//! encrypted stream with the certificate injected as a request
//! extension.

use axum::extract::Extension;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// The peer's client certificate in DER form, when one was offered.
///
/// Injected per connection; handlers extract it to authenticate the
/// peer against its TLSA record.
#[derive(Debug, Clone, Default)]
pub struct PeerCertificate(pub Option<Vec<u8>>);

/// Serve `router` over TLS until the stop signal flips.
///
/// # Errors
///
/// Binding the listener. Per-connection failures are logged and do
/// not stop the loop.
pub async fn serve_tls(
    addr: SocketAddr,
    config: Arc<ServerConfig>,
    router: Router,
    mut stop: watch::Receiver<bool>,
    name: &'static str,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(config);
    info!(listener = name, addr = %addr, "API listener up");

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(listener = name, error = %e, "Accept failed");
                    continue;
                }
            },
            _ = stop.changed() => {
                info!(listener = name, "API listener stopping");
                return Ok(());
            }
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(remote = %remote, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let peer_cert = tls_stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|cert| cert.as_ref().to_vec());

            let app = router.layer(Extension(PeerCertificate(peer_cert)));
            let service = TowerToHyperService::new(app);
            if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                .await
            {
                debug!(remote = %remote, error = %e, "Connection closed with error");
            }
        });
    }
}

//! Helpers for standing up fake endpoints on loopback ports.

use axum::Router;
use meshgen_core::endpoint_pool::Endpoint;

/// Serve `router` on an ephemeral loopback port and return its endpoint.
pub async fn spawn(router: Router) -> Endpoint {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Endpoint::parse(&format!("http://{addr}")).unwrap()
}

/// An endpoint nothing listens on.
pub async fn closed_endpoint() -> Endpoint {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoint::parse(&format!("http://{addr}")).unwrap()
}

//! Gateway tests against a local axum server. No external network.

use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use ipfs_client::{IpfsClient, IpfsError};
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct Entry {
    name: String,
}

async fn serve_gateway() -> String {
    let app = Router::new().route(
        "/ipfs/{cid}",
        get(|Path(cid): Path<String>| async move {
            match cid.as_str() {
                "QmGood" => (StatusCode::OK, r#"{"name":"alice"}"#.to_string()),
                "QmBroken" => (StatusCode::OK, "<html>not json</html>".to_string()),
                _ => (StatusCode::NOT_FOUND, "no link named".to_string()),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(url: &str) -> IpfsClient {
    IpfsClient::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn fetches_and_decodes_json() {
    let url = serve_gateway().await;
    let entry: Entry = client(&url).get_json("QmGood").await.unwrap();
    assert_eq!(entry, Entry { name: "alice".into() });
}

#[tokio::test]
async fn missing_cid_reports_gateway_status() {
    let url = serve_gateway().await;
    let err = client(&url).cat("QmNope").await.unwrap_err();
    match err {
        IpfsError::Gateway { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "no link named");
        }
        other => panic!("expected gateway error, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_a_parse_error() {
    let url = serve_gateway().await;
    let err = client(&url).get_json::<Entry>("QmBroken").await.unwrap_err();
    assert!(matches!(err, IpfsError::Parse(_)));
}

#[tokio::test]
async fn unreachable_gateway_is_a_network_error() {
    // Bind then drop to get a port nothing is listening on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}")).cat("QmGood").await.unwrap_err();
    assert!(matches!(err, IpfsError::Network(_)));
}

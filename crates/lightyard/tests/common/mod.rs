//! shared test utilities for the http integration tests
//!
//! functions here may be used by different test files, so dead_code warnings
//! are expected (each test file is compiled separately)

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use lightyard::verify::lightning_message_digest;
use lightyard::{AppState, create_app};
use lightyard_types::{Config, LauncherKind, NodeId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

/// signer version mapped to an executable in every test config.
pub const SIGNER_VERSION: &str = "v24.02";

/// a running set of services over temporary directories.
pub struct TestApp {
    pub state: AppState,
    pub app: Router,
    pub dir: TempDir,
}

/// config rooted in `dir`, with the in-process mock launcher.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.cert_root = dir.path().join("certs");
    config.node_directory = dir.path().join("nodes");
    config.node_host = "127.0.0.1".to_string();
    config.versions = BTreeMap::from([(
        SIGNER_VERSION.to_string(),
        PathBuf::from("/usr/bin/lightningd"),
    )]);
    config.scheduler.launcher = LauncherKind::Mock;
    config.scheduler.startup_timeout_secs = 5;
    config.scheduler.poll_interval_ms = 20;
    config.pairing.verify_approval_signatures = false;
    config
}

/// create a test app with the default test config
pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

/// create a test app, letting the caller adjust the config first
pub async fn create_test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mut config = test_config(&dir);
    configure(&mut config);
    std::fs::create_dir_all(&config.node_directory).expect("failed to create node directory");

    let state = AppState::new(config)
        .await
        .expect("failed to initialize services");
    let app = create_app(state.clone());
    TestApp { state, app, dir }
}

/// a signer holding a node key.
pub struct TestSigner {
    secret: SecretKey,
    pub node_id: NodeId,
}

impl TestSigner {
    pub fn new(seed: u8) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).expect("valid secret key");
        let public = PublicKey::from_secret_key(&secp, &secret);
        let node_id = NodeId::from_slice(&public.serialize()).expect("valid node id");
        Self { secret, node_id }
    }

    /// sign the way lightning's `signmessage` does.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let secp = Secp256k1::new();
        let digest = Message::from_digest(lightning_message_digest(message));
        secp.sign_ecdsa(&digest, &self.secret)
            .serialize_compact()
            .to_vec()
    }

    pub fn hex(&self) -> String {
        self.node_id.to_hex()
    }
}

/// post a json body and return the status and the decoded json response.
/// empty bodies decode to `Value::Null`.
pub async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("failed to build request");

    let response = app.clone().oneshot(request).await.expect("request failed");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response should be json")
    };
    (status, json)
}

/// fetch a challenge for `scope` and return `(challenge_hex, signature_hex)`.
pub async fn signed_challenge(app: &Router, signer: &TestSigner, scope: &str) -> (String, String) {
    let (status, body) = post_json(
        app,
        "/scheduler/challenge",
        json!({ "node_id": signer.hex(), "scope": scope }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "challenge failed: {body}");

    let challenge = body["challenge"].as_str().expect("challenge should be hex");
    let nonce = hex::decode(challenge).expect("challenge should be hex");
    (challenge.to_string(), hex::encode(signer.sign(&nonce)))
}

/// a register request for `signer` with a fresh signed challenge. `extra`
/// fields are merged over the defaults.
pub async fn register_request(app: &Router, signer: &TestSigner, extra: Value) -> Value {
    let (challenge, signature) = signed_challenge(app, signer, "register").await;
    let mut body = json!({
        "node_id": signer.hex(),
        "bip32_key": "0488b21e",
        "network": "regtest",
        "challenge": challenge,
        "signature": signature,
        "signer_version": SIGNER_VERSION,
        "init_msg": "001122",
        "startup_msgs": [{ "request": "000b", "response": "006f" }],
    });
    if let (Some(base), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    body
}

/// register `signer` and return the device credential.
pub async fn register(app: &Router, signer: &TestSigner) -> Value {
    let body = register_request(app, signer, json!({})).await;
    let (status, credential) = post_json(app, "/scheduler/register", body).await;
    assert_eq!(status, StatusCode::OK, "register failed: {credential}");
    credential
}

/// a pem csr whose common name is `common_name`.
pub fn csr(common_name: &str) -> String {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
        .expect("failed to generate key");
    let mut params = rcgen::CertificateParams::new(vec![]).expect("valid params");
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params
        .serialize_request(&key)
        .expect("failed to serialize csr")
        .pem()
        .expect("failed to encode csr")
}

/// `(subject cn, issuer cn)` of the first certificate in a pem chain.
pub fn leaf_names(chain: &str) -> (String, String) {
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(chain.as_bytes()).expect("chain should be pem");
    let cert = pem.parse_x509().expect("chain should start with a certificate");
    let cn = |name: &x509_parser::x509::X509Name<'_>| {
        name.iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .expect("name should have a common name")
            .to_string()
    };
    (cn(cert.subject()), cn(cert.issuer()))
}

/// spawn a real server for clients that need a socket (websockets).
pub async fn spawn_test_server(app: Router) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("failed to get local addr");

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let app = app.clone();
            tokio::spawn(async move {
                let io = hyper_util::rt::TokioIo::new(stream);
                hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                    .serve_connection_with_upgrades(
                        io,
                        hyper::service::service_fn(move |req| {
                            let app = app.clone();
                            async move { app.oneshot(req).await }
                        }),
                    )
                    .await
                    .ok();
            });
        }
    });

    (addr, handle)
}

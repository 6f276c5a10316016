use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use logdb::{merkle_tree_leaf, Database, InMemoryDatabase, LeafEntry, LogLookup, LogSigner, LookupHandle, ENTRY_TYPE_X509};
use lognode::checker::{CertChecker, RootStore};
use lognode::config::AppConfig;
use lognode::frontend::Frontend;
use lognode::integrator::Integrator;
use lognode::proxy::Proxy;
use lognode::staleness::{ClusterStateController, StalenessFlag, StaticClusterState};
use lognode::state::{AppState, SharedState};
use merkle::{verify_consistency, verify_inclusion, TreeHasher};

const POISON_OID: &[u8] = &[0x06, 0x0A, 0x2B, 0x06, 0x01, 0x04, 0x01, 0xD6, 0x79, 0x02, 0x04, 0x03];

fn fake_der(tag: u8) -> Vec<u8> {
    vec![0x30, 0x06, 0x02, 0x01, tag, 0x00, 0x00, 0x00]
}

fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        max_leaf_entries_per_response: 1000,
        staleness_check_delay_secs: 5,
        tree_sign_delay_secs: 1,
        db_path: None,
        private_key_path: None,
        trusted_roots_dir: None,
        peers: Vec::new(),
    }
}

struct TestNode {
    app: Router,
    state: SharedState,
    integrator: Arc<Mutex<Integrator>>,
}

fn test_node(roots: Vec<Vec<u8>>, stale: bool) -> TestNode {
    let hasher = TreeHasher::new();
    let db: Arc<dyn Database> = Arc::new(InMemoryDatabase::new(hasher.clone()));
    let signer = Arc::new(LogSigner::generate());
    let checker: Arc<dyn CertChecker> = Arc::new(RootStore::new(roots));
    let lookup = Arc::new(LookupHandle::new(LogLookup::empty(
        hasher.clone(),
        signer.sign_tree_head(0, 0, hasher.empty_root()),
    )));
    let integrator = Arc::new(Mutex::new(Integrator::bootstrap(
        db.clone(),
        signer.clone(),
        hasher,
        lookup.clone(),
    )));
    let controller: Arc<dyn ClusterStateController> = Arc::new(StaticClusterState::new(Vec::new()));
    let state: SharedState = Arc::new(AppState {
        cfg: test_config(),
        db: db.clone(),
        frontend: Arc::new(Frontend::new(checker.clone(), signer, db)),
        lookup,
        checker,
        staleness: Arc::new(StalenessFlag::new(stale)),
        proxy: Arc::new(Proxy::new(controller)),
    });
    TestNode { app: lognode::build_router(state.clone()), state, integrator }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn chain_body(chain: &[Vec<u8>]) -> String {
    json!({ "chain": chain.iter().map(|c| BASE64.encode(c)).collect::<Vec<_>>() }).to_string()
}

/// Base64 uses `+`, `/` and `=`, which must be percent-escaped in a query.
fn query_encode(b64: &str) -> String {
    b64.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
}

fn seed_sequenced_entries(db: &dyn Database, n: u64) {
    let hasher = TreeHasher::new();
    let signer = LogSigner::generate();
    for i in 0..n {
        let cert = format!("seed-cert-{i}").into_bytes();
        let sct = signer.sign_sct(i, ENTRY_TYPE_X509, &cert, b"");
        let entry = LeafEntry {
            leaf_input: merkle_tree_leaf(i, ENTRY_TYPE_X509, &cert, b""),
            extra_data: Vec::new(),
            sct,
            sequence_number: None,
        };
        db.append(entry.clone()).unwrap();
        db.assign_sequence_number(&entry.merkle_leaf_hash(&hasher), i).unwrap();
    }
}

#[tokio::test]
async fn submitted_chain_becomes_visible_in_the_sth() {
    let root = fake_der(1);
    let node = test_node(vec![root.clone()], false);

    let (status, sct) = post(&node.app, "/ct/v1/add-chain", chain_body(&[fake_der(2), root])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sct["sct_version"], 0);
    assert_eq!(sct["extensions"], "");
    assert!(!sct["signature"].as_str().unwrap().is_empty());

    // Queued but not yet integrated.
    let (status, sth) = get(&node.app, "/ct/v1/get-sth").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sth["tree_size"], 0);

    node.integrator.lock().unwrap().integrate_once().unwrap();

    let (status, sth) = get(&node.app, "/ct/v1/get-sth").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sth["tree_size"], 1);
    // 32-byte root, base64.
    assert_eq!(sth["sha256_root_hash"].as_str().unwrap().len(), 44);
}

#[tokio::test]
async fn duplicate_submissions_share_one_sct() {
    let root = fake_der(1);
    let node = test_node(vec![root.clone()], false);
    let body = chain_body(&[fake_der(2), root]);

    let (status1, first) = post(&node.app, "/ct/v1/add-chain", body.clone()).await;
    let (status2, second) = post(&node.app, "/ct/v1/add-chain", body).await;
    assert_eq!(status1, StatusCode::OK);
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(first["timestamp"], second["timestamp"]);
    assert_eq!(first["signature"], second["signature"]);
}

#[tokio::test]
async fn add_chain_rejects_malformed_submissions() {
    let root = fake_der(1);
    let node = test_node(vec![root], false);

    let (status, body) = post(&node.app, "/ct/v1/add-chain", "{".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Unable to parse provided JSON.");

    let (status, body) =
        post(&node.app, "/ct/v1/add-chain", json!({ "chain": ["!not-base64!"] }).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Unable to parse provided chain.");

    let (status, body) =
        post(&node.app, "/ct/v1/add-chain", chain_body(&[fake_der(2), fake_der(3)])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Certificate chain does not link to a trusted root.");
}

#[tokio::test]
async fn add_pre_chain_requires_a_poisoned_leaf() {
    let root = fake_der(1);
    let node = test_node(vec![root.clone()], false);

    let (status, body) =
        post(&node.app, "/ct/v1/add-pre-chain", chain_body(&[fake_der(2), root.clone()])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Leaf certificate is not a CT pre-certificate.");

    let mut poisoned = fake_der(2);
    poisoned.extend_from_slice(POISON_OID);
    let (status, sct) = post(&node.app, "/ct/v1/add-pre-chain", chain_body(&[poisoned, root])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sct["sct_version"], 0);
}

#[tokio::test]
async fn get_entries_clamps_to_the_end_of_the_log() {
    let node = test_node(Vec::new(), false);
    seed_sequenced_entries(node.state.db.as_ref(), 500);

    // Far past the log end: truncated, not an error.
    let (status, body) = get(&node.app, "/ct/v1/get-entries?start=0&end=10000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 500);

    let (status, body) = get(&node.app, "/ct/v1/get-entries?start=250&end=260").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 11);

    let (status, body) = get(&node.app, "/ct/v1/get-entries?start=600&end=700").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Entry not found.");
}

#[tokio::test]
async fn get_entries_validates_parameters() {
    let node = test_node(Vec::new(), false);
    seed_sequenced_entries(node.state.db.as_ref(), 3);

    let (status, body) = get(&node.app, "/ct/v1/get-entries?end=5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Missing or invalid \"start\" parameter.");

    let (status, body) = get(&node.app, "/ct/v1/get-entries?start=-1&end=5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Missing or invalid \"start\" parameter.");

    let (status, body) = get(&node.app, "/ct/v1/get-entries?start=5&end=2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Missing or invalid \"end\" parameter.");
}

#[tokio::test]
async fn get_entries_surfaces_scts_only_to_followers() {
    let node = test_node(Vec::new(), false);
    seed_sequenced_entries(node.state.db.as_ref(), 1);

    let (_, body) = get(&node.app, "/ct/v1/get-entries?start=0&end=0").await;
    assert!(body["entries"][0].get("sct").is_none());

    let (_, body) = get(&node.app, "/ct/v1/get-entries?start=0&end=0&include_scts=true").await;
    assert!(!body["entries"][0]["sct"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn proof_by_hash_round_trips_against_the_sth() {
    let hasher = TreeHasher::new();
    let root = fake_der(1);
    let node = test_node(vec![root.clone()], false);

    post(&node.app, "/ct/v1/add-chain", chain_body(&[fake_der(2), root.clone()])).await;
    node.integrator.lock().unwrap().integrate_once().unwrap();

    let (_, body) = get(&node.app, "/ct/v1/get-entries?start=0&end=0").await;
    let leaf_input = BASE64.decode(body["entries"][0]["leaf_input"].as_str().unwrap()).unwrap();
    let leaf_hash = hasher.hash_leaf(&leaf_input);
    let hash_param = query_encode(&BASE64.encode(leaf_hash));

    // A single-leaf tree has an empty audit path.
    let (status, proof) =
        get(&node.app, &format!("/ct/v1/get-proof-by-hash?hash={hash_param}&tree_size=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proof["leaf_index"], 0);
    assert!(proof["audit_path"].as_array().unwrap().is_empty());

    // Grow the log and verify the path against the served root.
    post(&node.app, "/ct/v1/add-chain", chain_body(&[fake_der(3), root])).await;
    node.integrator.lock().unwrap().integrate_once().unwrap();

    let (_, sth) = get(&node.app, "/ct/v1/get-sth").await;
    let served_root: [u8; 32] = BASE64
        .decode(sth["sha256_root_hash"].as_str().unwrap())
        .unwrap()
        .try_into()
        .unwrap();

    let (status, proof) =
        get(&node.app, &format!("/ct/v1/get-proof-by-hash?hash={hash_param}&tree_size=2")).await;
    assert_eq!(status, StatusCode::OK);
    let path: Vec<[u8; 32]> = proof["audit_path"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| BASE64.decode(node.as_str().unwrap()).unwrap().try_into().unwrap())
        .collect();
    assert!(verify_inclusion(&hasher, &leaf_hash, 0, 2, &path, &served_root));

    // Unknown hash, and a size past the serving STH, both reject.
    let missing = query_encode(&BASE64.encode([0x5Au8; 32]));
    let (status, body) =
        get(&node.app, &format!("/ct/v1/get-proof-by-hash?hash={missing}&tree_size=2")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Couldn't find hash.");

    let (status, body) =
        get(&node.app, &format!("/ct/v1/get-proof-by-hash?hash={hash_param}&tree_size=3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Missing or invalid \"tree_size\" parameter.");
}

#[tokio::test]
async fn consistency_proof_round_trips_between_published_sths() {
    let hasher = TreeHasher::new();
    let root = fake_der(1);
    let node = test_node(vec![root.clone()], false);

    for tag in 10..13 {
        post(&node.app, "/ct/v1/add-chain", chain_body(&[fake_der(tag), root.clone()])).await;
    }
    node.integrator.lock().unwrap().integrate_once().unwrap();
    let (_, sth3) = get(&node.app, "/ct/v1/get-sth").await;
    assert_eq!(sth3["tree_size"], 3);

    for tag in 13..17 {
        post(&node.app, "/ct/v1/add-chain", chain_body(&[fake_der(tag), root.clone()])).await;
    }
    node.integrator.lock().unwrap().integrate_once().unwrap();
    let (_, sth7) = get(&node.app, "/ct/v1/get-sth").await;
    assert_eq!(sth7["tree_size"], 7);

    let (status, body) = get(&node.app, "/ct/v1/get-sth-consistency?first=3&second=7").await;
    assert_eq!(status, StatusCode::OK);
    let proof: Vec<[u8; 32]> = body["consistency"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| BASE64.decode(node.as_str().unwrap()).unwrap().try_into().unwrap())
        .collect();
    assert_eq!(proof.len(), 4);

    let root3: [u8; 32] =
        BASE64.decode(sth3["sha256_root_hash"].as_str().unwrap()).unwrap().try_into().unwrap();
    let root7: [u8; 32] =
        BASE64.decode(sth7["sha256_root_hash"].as_str().unwrap()).unwrap().try_into().unwrap();
    assert!(verify_consistency(&hasher, 3, 7, &proof, &root3, &root7));

    let (status, _) = get(&node.app, "/ct/v1/get-sth-consistency?first=5&second=3").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = get(&node.app, "/ct/v1/get-sth-consistency?first=3&second=100").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Missing or invalid \"second\" parameter.");
}

#[tokio::test]
async fn stale_node_without_fresh_peers_returns_bad_gateway() {
    let node = test_node(Vec::new(), true);
    let (status, body) = get(&node.app, "/ct/v1/get-sth").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error_message"], "No fresh peer available.");
}

#[tokio::test]
async fn stale_node_still_answers_method_and_parameter_errors_locally() {
    let node = test_node(Vec::new(), true);

    // Method dispatch precedes the staleness check: a wrong-method request
    // is a local 405, never a forward.
    let (status, _) = get(&node.app, "/ct/v1/add-chain").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    let (status, _) = post(&node.app, "/ct/v1/get-sth", String::new()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // So does parameter validation.
    let (status, body) = get(&node.app, "/ct/v1/get-entries?start=-1&end=5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Missing or invalid \"start\" parameter.");

    let (status, body) = post(&node.app, "/ct/v1/add-chain", "{".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_message"], "Unable to parse provided JSON.");

    // A well-formed request on a stale node is forwarded (and fails here
    // for want of a peer).
    let (status, _) = get(&node.app, "/ct/v1/get-entries?start=0&end=5").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn get_roots_lists_the_configured_roots() {
    let roots = vec![fake_der(1), fake_der(2)];
    let node = test_node(roots.clone(), false);
    let (status, body) = get(&node.app, "/ct/v1/get-roots").await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<String> =
        body["certificates"].as_array().unwrap().iter().map(|c| c.as_str().unwrap().to_string()).collect();
    assert_eq!(listed, roots.iter().map(|r| BASE64.encode(r)).collect::<Vec<_>>());
}

#[tokio::test]
async fn wrong_methods_are_rejected() {
    let node = test_node(Vec::new(), false);
    let (status, _) = post(&node.app, "/ct/v1/get-sth", String::new()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    let (status, _) = get(&node.app, "/ct/v1/add-chain").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

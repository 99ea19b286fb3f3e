use std::{io::Write, net::SocketAddr, sync::Arc, time::Duration};

use bitkaraoke::{
    app,
    catalog::{MemoryCatalog, Script},
    config::{CatalogSource, Config},
    AppState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

async fn spawn_server() -> SocketAddr {
    let catalog = MemoryCatalog::new(vec![Script {
        id: "s".into(),
        title: "Duet".into(),
        characters: vec!["x".into(), "y".into()],
        image_uri: None,
    }]);
    serve(AppState::with_catalog(&Config::default(), Arc::new(catalog)).unwrap()).await
}

async fn serve(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    addr
}

async fn ws_connect(addr: SocketAddr) -> Ws {
    let (ws, _resp) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn ws_send(ws: &mut Ws, frame: Value) {
    ws.send(WsMessage::Text(frame.to_string().into())).await.unwrap();
}

async fn ws_recv(ws: &mut Ws) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            WsMessage::Close(_) => panic!("connection closed"),
            _ => {}
        }
    }
}

async fn ws_expect<F>(ws: &mut Ws, mut predicate: F) -> Value
where
    F: FnMut(&Value) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let msg = ws_recv(ws).await;
            if predicate(&msg) {
                return msg;
            }
        }
    })
    .await
    .unwrap()
}

async fn expect_event(ws: &mut Ws, event: &str) -> Value {
    ws_expect(ws, |m| m["event"] == event).await["data"].clone()
}

async fn expect_ack(ws: &mut Ws, id: u64) -> Value {
    ws_expect(ws, |m| m["event"] == "ack" && m["data"]["id"] == id).await["data"].clone()
}

#[tokio::test]
async fn two_performers_start_a_scene() {
    let addr = spawn_server().await;
    let mut alice = ws_connect(addr).await;
    let mut bob = ws_connect(addr).await;

    ws_send(&mut alice, json!({"event": "login", "data": {"username": "alice"}, "id": 1})).await;
    assert_eq!(expect_ack(&mut alice, 1).await["success"], true);
    ws_send(&mut bob, json!({"event": "login", "data": {"username": "bob"}, "id": 1})).await;
    assert_eq!(expect_ack(&mut bob, 1).await["success"], true);

    ws_send(&mut alice, json!({"event": "createRoom", "data": {"roomName": "Z"}, "id": 2})).await;
    let state = expect_event(&mut alice, "roomState").await;
    assert_eq!(state, json!({"users": ["alice"], "admin": "alice"}));
    let scripts = expect_event(&mut alice, "scriptListFull").await;
    assert_eq!(scripts[0]["id"], "s");
    expect_ack(&mut alice, 2).await;

    let rooms = expect_event(&mut bob, "rooms").await;
    assert_eq!(rooms, json!([{"name": "Z", "admin": "alice"}]));

    ws_send(&mut bob, json!({"event": "joinRoom", "data": {"room": "Z"}, "id": 2})).await;
    let state = expect_event(&mut alice, "roomState").await;
    assert_eq!(state["users"], json!(["alice", "bob"]));
    expect_ack(&mut bob, 2).await;

    ws_send(&mut bob, json!({"event": "selectScript", "data": {"room": "Z", "scriptId": "s"}, "id": 3})).await;
    let ack = expect_ack(&mut bob, 3).await;
    assert_eq!(ack["success"], false);
    assert_eq!(ack["code"], "Forbidden");

    ws_send(&mut alice, json!({"event": "selectScript", "data": {"room": "Z", "scriptId": "s"}, "id": 3})).await;
    let selected = expect_event(&mut bob, "scriptSelected").await;
    assert_eq!(selected["scriptData"]["title"], "Duet");
    assert_eq!(selected["admin"], "alice");
    expect_ack(&mut alice, 3).await;

    ws_send(&mut alice, json!({"event": "assignCharacter", "data": {"room": "Z", "character": "x"}, "id": 4})).await;
    expect_ack(&mut alice, 4).await;
    ws_send(&mut bob, json!({"event": "assignCharacter", "data": {"room": "Z", "character": "x"}, "id": 4})).await;
    let ack = expect_ack(&mut bob, 4).await;
    assert_eq!(ack["code"], "Conflict");

    ws_send(&mut alice, json!({"event": "startScene", "data": {"room": "Z"}, "id": 5})).await;
    assert_eq!(expect_ack(&mut alice, 5).await["code"], "InvalidInput");

    ws_send(&mut bob, json!({"event": "assignCharacter", "data": {"room": "Z", "character": "y"}, "id": 5})).await;
    let assignments = expect_event(&mut alice, "characterAssignments").await;
    assert_eq!(assignments, json!({"x": "alice", "y": "bob"}));

    ws_send(&mut alice, json!({"event": "startScene", "data": {"room": "Z"}, "id": 6})).await;
    expect_event(&mut bob, "sceneStarted").await;
    assert_eq!(expect_ack(&mut alice, 6).await["success"], true);
}

#[tokio::test]
async fn malformed_frames_get_an_error() {
    let addr = spawn_server().await;
    let mut ws = ws_connect(addr).await;

    ws.send(WsMessage::Text("not json".into())).await.unwrap();
    let error = expect_event(&mut ws, "error").await;
    assert_eq!(error["code"], "InvalidInput");

    ws_send(&mut ws, json!({"event": "createRoom", "data": {"roomName": "Z"}, "id": 9})).await;
    let ack = expect_ack(&mut ws, 9).await;
    assert_eq!(ack["success"], false);
    assert_eq!(ack["message"], "not logged in");
}

#[tokio::test]
async fn second_login_evicts_first_connection() {
    let addr = spawn_server().await;
    let mut first = ws_connect(addr).await;
    let mut second = ws_connect(addr).await;

    ws_send(&mut first, json!({"event": "login", "data": {"username": "ann"}, "id": 1})).await;
    expect_ack(&mut first, 1).await;
    ws_send(&mut second, json!({"event": "login", "data": {"username": "ann"}, "id": 1})).await;
    expect_ack(&mut second, 1).await;

    let evicted = expect_event(&mut first, "evicted").await;
    assert!(evicted["message"].as_str().unwrap().contains("ann"));
}

#[tokio::test]
async fn http_listings_from_file_catalog() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"[{{"id":"s","title":"Duet","characters":["x","y"]}}]"#).unwrap();
    let config = Config {
        catalog: CatalogSource::File(file.path().to_path_buf()),
        ..Config::default()
    };
    let addr = serve(AppState::from_config(&config).unwrap()).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert!(health.status().is_success());

    let scripts: Value = client
        .get(format!("http://{addr}/scripts"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scripts[0]["characters"], json!(["x", "y"]));

    let rooms: Value = client
        .get(format!("http://{addr}/rooms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rooms, json!([]));
}

#[tokio::test]
async fn auth_proxy_answers_unreadable_bodies() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    for route in ["login", "signup"] {
        let res = client
            .post(format!("http://{addr}/{route}"))
            .header("content-type", "text/plain")
            .body("user=ann&pass=pw")
            .send()
            .await
            .unwrap();
        assert!(res.status().is_success());
        let outcome: Value = res.json().await.unwrap();
        assert_eq!(outcome, json!({"success": false, "message": "Missing credentials"}));
    }
}

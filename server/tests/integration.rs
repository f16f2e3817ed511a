use axum::http::StatusCode;
use nestfinder::{
    api::{build_router, AppState},
    auth,
    config::Config,
    model::Role,
};
use std::net::{SocketAddr, TcpListener};
use tokio::task::JoinHandle;
use uuid::Uuid;

async fn spawn_server() -> (SocketAddr, JoinHandle<()>, AppState, tempfile::TempDir) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
        jwt_secret: Some("integration-secret".into()),
        collaborators: Default::default(),
    };
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (addr, server, state, tmp)
}

async fn register(
    client: &reqwest::Client,
    addr: SocketAddr,
    name: &str,
    role: &str,
) -> (String, Uuid) {
    let resp = client
        .post(format!("http://{}/api/auth/register", addr))
        .json(&serde_json::json!({
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "password": "supersecret",
            "role": role,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let v: serde_json::Value = resp.json().await.unwrap();
    let id = Uuid::parse_str(v["user"]["id"].as_str().unwrap()).unwrap();
    (v["token"].as_str().unwrap().to_string(), id)
}

#[tokio::test]
async fn register_login_and_me() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();

    let (_, id) = register(&client, addr, "Meera", "landlord").await;

    // login success
    let resp = client
        .post(format!("http://{}/api/auth/login", addr))
        .json(&serde_json::json!({"email":"meera@example.com","password":"supersecret"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let v: serde_json::Value = resp.json().await.unwrap();
    assert!(v["user"].get("password_hash").is_none());
    assert_eq!(v["user"]["role"], "landlord");
    let token = v["token"].as_str().unwrap().to_string();
    let claims = auth::verify_jwt(&state.jwt_secret, &token).unwrap();
    assert_eq!(claims.user_id(), Some(id));
    assert_eq!(claims.role, Role::Landlord);

    // wrong password and unknown email share one message
    let wrong = client
        .post(format!("http://{}/api/auth/login", addr))
        .json(&serde_json::json!({"email":"meera@example.com","password":"nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let wrong: serde_json::Value = wrong.json().await.unwrap();
    let unknown = client
        .post(format!("http://{}/api/auth/login", addr))
        .json(&serde_json::json!({"email":"ghost@example.com","password":"supersecret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown: serde_json::Value = unknown.json().await.unwrap();
    assert_eq!(wrong["message"], "Invalid email or password");
    assert_eq!(wrong, unknown);

    // /api/auth/me
    let resp = client
        .get(format!("http://{}/api/auth/me", addr))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let me: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(me["email"], "meera@example.com");
    let resp = client
        .get(format!("http://{}/api/auth/me", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = client
        .get(format!("http://{}/api/auth/me", addr))
        .bearer_auth("bad")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // expired token
    let expired = auth::issue_jwt(
        &state.jwt_secret,
        &id,
        Role::Landlord,
        time::Duration::seconds(-120),
    )
    .unwrap();
    let resp = client
        .get(format!("http://{}/api/auth/me", addr))
        .bearer_auth(&expired)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // well-signed token for an identity that does not exist
    let ghost = auth::issue_jwt(&state.jwt_secret, &Uuid::new_v4(), Role::Tenant, auth::TOKEN_TTL)
        .unwrap();
    let resp = client
        .get(format!("http://{}/api/auth/me", addr))
        .bearer_auth(&ghost)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    server.abort();
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let (addr, server, state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    register(&client, addr, "Ravi", "tenant").await;

    let resp = client
        .post(format!("http://{}/api/auth/register", addr))
        .json(&serde_json::json!({
            "name": "Ravi Again",
            "email": "ravi@example.com",
            "password": "other",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(v["message"], "User already exists");

    let count = state
        .with_conn(|conn| nestfinder::users::count_by_email(conn, "ravi@example.com"))
        .await
        .unwrap();
    assert_eq!(count, 1);

    // missing fields
    let resp = client
        .post(format!("http://{}/api/auth/register", addr))
        .json(&serde_json::json!({"email": "x@example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(v["message"], "Please provide all required fields");

    server.abort();
}

#[tokio::test]
async fn listing_crud_and_ownership() {
    let (addr, server, _state, _tmp) = spawn_server().await;
    let client = reqwest::Client::new();
    let (owner, owner_id) = register(&client, addr, "Owner", "landlord").await;
    let (rival, _) = register(&client, addr, "Rival", "landlord").await;
    let (tenant, _) = register(&client, addr, "Tenant", "tenant").await;

    let body = serde_json::json!({
        "title": "Sunrise Apartments",
        "description": "2BHK",
        "price": 18000,
        "address": "12 Park Road",
        "city": "Noida",
        "state": "UP",
        "features": ["parking", "lift"],
        "images": ["https://img/1.jpg"],
        "safetyScore": 8.2
    });

    // tenants may not list properties
    let resp = client
        .post(format!("http://{}/api/properties", addr))
        .bearer_auth(&tenant)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // anonymous callers may not either
    let resp = client
        .post(format!("http://{}/api/properties", addr))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .post(format!("http://{}/api/properties", addr))
        .bearer_auth(&owner)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: serde_json::Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["owner"]["id"], owner_id.to_string());
    assert_eq!(created["owner"]["name"], "Owner");

    // public reads
    let all: serde_json::Value = client
        .get(format!("http://{}/api/properties", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 1);
    assert!(all[0]["owner"].get("password_hash").is_none());
    let resp = client
        .get(format!("http://{}/api/properties/{}", addr, Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // non-owner cannot edit or delete
    let resp = client
        .put(format!("http://{}/api/properties/{}", addr, id))
        .bearer_auth(&rival)
        .json(&serde_json::json!({"price": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = client
        .delete(format!("http://{}/api/properties/{}", addr, id))
        .bearer_auth(&rival)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let unchanged: serde_json::Value = client
        .get(format!("http://{}/api/properties/{}", addr, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unchanged, created);

    // owner merges a partial update
    let resp = client
        .put(format!("http://{}/api/properties/{}", addr, id))
        .bearer_auth(&owner)
        .json(&serde_json::json!({"price": 19500, "features": ["parking"]}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let updated: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(updated["price"], 19500.0);
    assert_eq!(updated["features"], serde_json::json!(["parking"]));
    assert_eq!(updated["title"], "Sunrise Apartments");

    // owner deletes
    let resp = client
        .delete(format!("http://{}/api/properties/{}", addr, id))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let v: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(v["message"], "Property removed successfully");
    let resp = client
        .get(format!("http://{}/api/properties/{}", addr, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.abort();
}

use std::path::Path;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Map, Value, json};
use tower::ServiceExt;

use fifa_rating::estimator::RatingEstimator;
use fifa_rating::forest::ForestParams;
use fifa_rating::players_db;
use fifa_rating::schema::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector};
use fifa_rating::server::{AppState, create_router, round2};

fn train_estimator() -> RatingEstimator {
    let mut vectors = Vec::new();
    let mut targets = Vec::new();
    for i in 0..80 {
        let mut values = [0.0; FEATURE_COUNT];
        for (j, v) in values.iter_mut().enumerate() {
            *v = ((i * 11 + j * 5) % 55) as f64 + 35.0;
        }
        targets.push(0.5 * values[13] + 0.25 * values[2] + 20.0);
        vectors.push(FeatureVector::new(values).unwrap());
    }
    RatingEstimator::fit(&vectors, &targets, ForestParams::default()).unwrap()
}

fn app(db_path: &Path) -> (Router, AppState) {
    let state = AppState::new(train_estimator(), db_path.to_path_buf());
    (create_router(state.clone(), true), state)
}

fn player_body() -> Map<String, Value> {
    let mut body = Map::new();
    for (idx, name) in FEATURE_NAMES.iter().enumerate() {
        body.insert(name.to_string(), json!(50 + idx));
    }
    body
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn row_count(db_path: &Path) -> i64 {
    let conn = players_db::open_db(db_path).unwrap();
    players_db::count_players(&conn).unwrap()
}

#[tokio::test]
async fn predict_returns_rounded_rating() {
    let dir = tempfile::tempdir().unwrap();
    let (app, state) = app(&dir.path().join("players.sqlite"));

    let body = player_body();
    let (status, json) = send(&app, Method::POST, "/predict", Some(Value::Object(body))).await;
    assert_eq!(status, StatusCode::OK);

    let values = (0..FEATURE_COUNT).map(|i| 50.0 + i as f64).collect::<Vec<_>>();
    let expected = round2(state.estimator().predict_values(&values).unwrap());
    assert_eq!(json["rating"].as_f64(), Some(expected));
    let scaled = expected * 100.0;
    assert!((scaled - scaled.round()).abs() < 1e-6);
}

#[tokio::test]
async fn predict_ignores_key_order_extra_keys_and_accepts_numeric_strings() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir.path().join("players.sqlite"));

    let (_, baseline) = send(&app, Method::POST, "/predict", Some(Value::Object(player_body()))).await;

    let mut reordered = Map::new();
    for (idx, name) in FEATURE_NAMES.iter().enumerate().rev() {
        reordered.insert(name.to_string(), json!((50 + idx).to_string()));
    }
    reordered.insert("name".into(), json!("Ignored"));
    reordered.insert("overall".into(), json!(99));
    let (status, json) = send(&app, Method::POST, "/predict", Some(Value::Object(reordered))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["rating"], baseline["rating"]);
}

#[tokio::test]
async fn predict_rejects_incomplete_or_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir.path().join("players.sqlite"));

    let mut missing = player_body();
    missing.remove("stamina");
    let (status, json) = send(&app, Method::POST, "/predict", Some(Value::Object(missing))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("stamina"));

    let mut not_numeric = player_body();
    not_numeric.insert("pace".into(), json!("quick"));
    let (status, json) = send(&app, Method::POST, "/predict", Some(Value::Object(not_numeric))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("pace"));

    let (status, json) = send(&app, Method::POST, "/predict", Some(json!([1, 2, 3]))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].is_string());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn add_player_inserts_exactly_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("players.sqlite");
    let (app, _) = app(&db_path);

    let mut body = player_body();
    body.insert("name".into(), json!("Luka Modric"));
    body.insert("overall".into(), json!(91));
    body.insert("photo_url".into(), json!("https://img.example/modric.png"));
    let (status, json) = send(&app, Method::POST, "/api/add-player", Some(Value::Object(body))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Player added successfully");
    assert_eq!(row_count(&db_path), 1);

    let id = json["id"].as_i64().unwrap();
    let conn = players_db::open_db(&db_path).unwrap();
    let row = players_db::get_player(&conn, id).unwrap().unwrap();
    assert_eq!(row.name, "Luka Modric");
    assert_eq!(row.overall, 91.0);
    assert_eq!(row.features.get("age"), Some(50.0));
    assert_eq!(row.features.get("composure"), Some(67.0));
}

#[tokio::test]
async fn add_player_rejects_missing_fields_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("players.sqlite");
    let (app, _) = app(&db_path);

    let mut body = player_body();
    body.insert("name".into(), json!("No Rating"));
    let (status, json) = send(&app, Method::POST, "/api/add-player", Some(Value::Object(body))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("overall"));
    assert_eq!(row_count(&db_path), 0);
}

#[tokio::test]
async fn add_player_reports_unavailable_store() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"plain file").unwrap();
    let db_path = blocker.join("players.sqlite");
    let (app, _) = app(&db_path);

    let mut body = player_body();
    body.insert("name".into(), json!("Ghost"));
    body.insert("overall".into(), json!(70));
    let (status, json) = send(&app, Method::POST, "/api/add-player", Some(Value::Object(body))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "failed to add player to the database");
    assert!(!db_path.exists());
}

#[tokio::test]
async fn player_routes_read_update_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("players.sqlite");
    let (app, _) = app(&db_path);

    let mut body = player_body();
    body.insert("name".into(), json!("N. Kante"));
    body.insert("overall".into(), json!(89));
    let (_, added) = send(&app, Method::POST, "/api/add-player", Some(Value::Object(body))).await;
    let id = added["id"].as_i64().unwrap();
    let uri = format!("/api/players/{id}");

    let (status, list) = send(&app, Method::GET, "/api/players", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let (status, mut row) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(row["name"], "N. Kante");

    // A fetched row can be sent straight back with edits.
    row["overall"] = json!(90.5);
    row["pace"] = json!("77");
    let (status, json) = send(&app, Method::PUT, &uri, Some(row)).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["success"], true);

    let (_, row) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(row["overall"], 90.5);
    assert_eq!(row["pace"], 77.0);

    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "nickname": "x" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let (status, json) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Player deleted successfully");

    let (status, json) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));

    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, Method::PUT, &uri, Some(json!({ "overall": 80 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(row_count(&db_path), 0);
}

#[tokio::test]
async fn add_player_rejects_missing_or_non_numeric_features_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("players.sqlite");
    let (app, _) = app(&db_path);

    let mut missing = player_body();
    missing.insert("name".into(), json!("Half Filled"));
    missing.insert("overall".into(), json!(75));
    missing.remove("vision");
    let (status, json) = send(&app, Method::POST, "/api/add-player", Some(Value::Object(missing))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("vision"));

    let mut not_numeric = player_body();
    not_numeric.insert("name".into(), json!("Typo"));
    not_numeric.insert("overall".into(), json!(75));
    not_numeric.insert("pace".into(), json!("quick"));
    let (status, json) =
        send(&app, Method::POST, "/api/add-player", Some(Value::Object(not_numeric))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("pace"));

    assert_eq!(row_count(&db_path), 0);
}

#[tokio::test]
async fn failed_insert_inside_the_transaction_leaves_no_row() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("players.sqlite");
    let (app, _) = app(&db_path);

    let conn = players_db::open_db(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER players_read_only BEFORE INSERT ON players
         BEGIN SELECT RAISE(ABORT, 'players table is read-only'); END;",
    )
    .unwrap();
    drop(conn);

    let mut body = player_body();
    body.insert("name".into(), json!("Blocked"));
    body.insert("overall".into(), json!(80));
    let (status, json) = send(&app, Method::POST, "/api/add-player", Some(Value::Object(body))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "failed to add player to the database");
    assert_eq!(row_count(&db_path), 0);
}

#[tokio::test]
async fn non_integer_player_id_gets_a_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir.path().join("players.sqlite"));

    for method in [Method::GET, Method::DELETE] {
        let (status, json) = send(&app, method, "/api/players/abc", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("invalid player id"));
    }
    let (status, json) = send(&app, Method::PUT, "/api/players/1.5", Some(json!({ "overall": 80 }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].is_string());
}

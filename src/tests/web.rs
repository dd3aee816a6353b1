use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::fakes::{self, FixedExtractor};
use crate::{
    app::SearchService,
    web::{cors_layer, router, SharedState},
};

fn app(service: SearchService, admin_token: Option<&str>) -> Router {
    let state = SharedState {
        service: Arc::new(service),
        admin_token: admin_token.map(str::to_string),
    };
    router(state, cors_layer(&["*".to_string()]))
}

async fn indexed_service() -> SearchService {
    let service = fakes::service();
    service.index(fakes::sample_entries()).await.unwrap();
    service
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let (status, body) = send(app(fakes::service(), None), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(app(indexed_service().await, None), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collection"], "signs");
    assert_eq!(body["collection_status"], "green");
}

#[tokio::test]
async fn test_status_reports_configuration() {
    let (status, body) = send(app(indexed_service().await, None), get("/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "embedded");
    assert_eq!(body["model"], "char-bag");
    assert_eq!(body["dimensions"], fakes::DIMENSIONS);
    assert_eq!(body["keywords_enabled"], false);
    assert_eq!(body["info"]["points_count"], 4);
}

#[tokio::test]
async fn test_collection_info_missing_is_404() {
    let (status, body) = send(app(fakes::service(), None), get("/collection_info")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("signs"));
}

#[tokio::test]
async fn test_collections_lists_names() {
    let (status, body) = send(app(indexed_service().await, None), get("/collections")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["collections"], json!(["signs"]));
}

#[tokio::test]
async fn test_search_get_and_post() {
    let (status, body) = send(
        app(indexed_service().await, None),
        get("/search?q=tay&limit=2&region=N"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert!(body["results"][0]["score"].is_number());
    assert_eq!(body["results"][0]["payload"]["region"], "miền Nam");

    let (status, body) = send(
        app(indexed_service().await, None),
        post_json(
            "/search",
            json!({"query": "tay", "top_k": 1, "with_scores": false}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert!(body["results"][0].get("score").is_none());
}

#[tokio::test]
async fn test_search_bad_requests() {
    let cases = [
        "/search?q=tay&region=mars",
        "/search?q=tay&limit=0",
        "/search?q=%20%20",
    ];

    for uri in cases {
        let (status, body) = send(app(indexed_service().await, None), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let cases = [
        get("/search"),
        get("/semantic_search?limit=3"),
        post_json("/index/records", json!([{"id": "x_B"}])),
        post_json("/search", json!({"limit": 2})),
        post_json("/recreate", json!({})),
    ];

    for request in cases {
        let uri = request.uri().to_string();
        let (status, body) = send(app(indexed_service().await, None), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn test_index_jsonl_without_multipart_is_400() {
    let (status, body) = send(
        app(fakes::service(), None),
        post_json("/index/jsonl", json!({"word": "nhà"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_semantic_search_disabled_is_503() {
    let (status, _) = send(
        app(indexed_service().await, None),
        get("/semantic_search?q=xin%20ch%C3%A0o"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_semantic_search_groups_by_keyword() {
    let service = indexed_service()
        .await
        .with_keywords(Arc::new(FixedExtractor("bàn tay, mái nhà".to_string())));

    let (status, body) = send(
        app(service, None),
        post_json("/semantic_search", json!({"query": "gia đình tôi", "limit": 1})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["input"], "gia đình tôi");
    assert_eq!(body["keywords"], json!(["bàn tay", "mái nhà"]));
    assert_eq!(body["results"]["bàn tay"]["count"], 1);
    assert_eq!(body["results"]["mái nhà"]["count"], 1);
}

#[tokio::test]
async fn test_index_records() {
    let records = json!([
        {
            "id": "B010",
            "word": "ăn",
            "description": "Chụm tay đưa lên miệng",
            "video": "https://videos.example/an.mp4"
        },
        {"word": "uống", "description": "Tay cầm cốc đưa lên miệng", "region": "T"}
    ]);

    let (status, body) = send(
        app(indexed_service().await, None),
        post_json("/index/records", records),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"indexed": 2, "total": 6}));
}

#[tokio::test]
async fn test_index_jsonl_upload() {
    let boundary = "sign-search-boundary";
    let jsonl = concat!(
        "{\"id\": \"N020\", \"word\": \"nhà\", \"description\": \"Hai tay tạo mái\"}\n",
        "\n",
        "{\"id\": \"B021\", \"word\": \"cửa\", \"description\": \"Tay mở ra\"}\n",
    );
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"signs.jsonl\"\r\n\
         Content-Type: application/jsonl\r\n\r\n\
         {jsonl}\r\n\
         --{boundary}--\r\n"
    );

    let request = Request::builder()
        .method(Method::POST)
        .uri("/index/jsonl")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(app(fakes::service(), None), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"indexed": 2, "total": 2}));
}

#[tokio::test]
async fn test_index_jsonl_reports_bad_line() {
    let boundary = "sign-search-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"signs.jsonl\"\r\n\r\n\
         {{\"word\": \"nhà\"}}\n\
         not json\r\n\
         --{boundary}--\r\n"
    );

    let request = Request::builder()
        .method(Method::POST)
        .uri("/index/jsonl")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(app(fakes::service(), None), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("line 2"));
}

#[tokio::test]
async fn test_recreate_requires_confirmation() {
    let (status, _) = send(
        app(indexed_service().await, None),
        post_json("/recreate", json!({"confirm": "other"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        app(indexed_service().await, None),
        post_json("/recreate", json!({"confirm": "signs"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points_count"], 0);
    assert_eq!(body["vector_size"], fakes::DIMENSIONS);
}

#[tokio::test]
async fn test_recreate_requires_admin_token() {
    let (status, _) = send(
        app(indexed_service().await, Some("s3cret")),
        post_json("/recreate", json!({"confirm": "signs"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post_json("/recreate", json!({"confirm": "signs"}));
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
    let (status, _) = send(app(indexed_service().await, Some("s3cret")), request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_recreate_is_post_only() {
    let (status, _) = send(app(indexed_service().await, None), get("/recreate")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

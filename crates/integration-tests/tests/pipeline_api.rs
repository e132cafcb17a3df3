//! End-to-end: paginated source catalog, pipeline, in-memory store, Query API.
//!
//! No external services are needed; the catalog is a wiremock server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Value, json};

use cart_insights_core::{CartId, PipelineState};
use cart_insights_etl::{InMemoryStore, RunOptions};
use cart_insights_integration_tests::{CatalogFixture, Line, api_state, cart, get_json, user};

const PAGE_SIZE: u32 = 2;

const LAMP: Line = Line {
    product_id: 101,
    title: "Desk Lamp",
    price: 20.0,
    quantity: 2,
};
const MUG: Line = Line {
    product_id: 102,
    title: "Coffee Mug",
    price: 5.0,
    quantity: 6,
};
const DESK: Line = Line {
    product_id: 103,
    title: "Standing Desk",
    price: 120.0,
    quantity: 1,
};

fn options() -> RunOptions {
    RunOptions {
        page_size: PAGE_SIZE,
        max_records: None,
    }
}

async fn catalog() -> CatalogFixture {
    let mut invalid = user(4, "Ghost", "User");
    invalid["email"] = json!("ghost-at-example");

    let users = vec![
        user(1, "Emily", "Johnson"),
        user(2, "Michael", "Williams"),
        user(3, "Sophia", "Brown"),
        invalid,
    ];
    let carts = vec![
        cart(1, 1, &[LAMP]),
        cart(2, 2, &[Line { quantity: 1, ..LAMP }, MUG]),
        cart(3, 1, &[DESK]),
        cart(4, 3, &[Line { quantity: 3, ..MUG }]),
        // Unknown owner
        cart(5, 99, &[Line { quantity: 50, ..DESK }]),
        // Owner failed validation
        cart(6, 4, &[Line { quantity: 50, ..MUG }]),
    ];

    let fixture = CatalogFixture::start().await;
    fixture.serve("users", &users, PAGE_SIZE as usize).await;
    fixture.serve("carts", &carts, PAGE_SIZE as usize).await;
    fixture
}

#[tokio::test]
async fn test_sync_across_pages() {
    let fixture = catalog().await;
    let store = InMemoryStore::new();
    let report = fixture.pipeline(Arc::new(store.clone())).run(&options()).await;

    assert_eq!(report.state, PipelineState::Completed, "{:?}", report.error);
    let users = &report.counters.users;
    assert_eq!((users.fetched, users.transformed, users.skipped, users.loaded), (4, 3, 1, 3));
    let carts = &report.counters.carts;
    assert_eq!((carts.fetched, carts.transformed, carts.skipped, carts.loaded), (6, 4, 2, 4));
    assert_eq!(report.counters.cart_items_loaded, 5);
    assert_eq!(store.counts().await, (3, 4, 5));
}

#[tokio::test]
async fn test_rankings_served_after_sync() {
    let fixture = catalog().await;
    let store = InMemoryStore::new();
    fixture.pipeline(Arc::new(store.clone())).run(&options()).await;
    let state = api_state(Arc::new(store));

    let (status, spenders) = get_json(state.clone(), "/top-spenders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        spenders,
        json!([
            {"userId": 1, "name": "Emily Johnson", "totalSpend": 160.0},
            {"userId": 2, "name": "Michael Williams", "totalSpend": 50.0},
            {"userId": 3, "name": "Sophia Brown", "totalSpend": 15.0}
        ])
    );

    let (status, sellers) = get_json(state, "/top-sellers?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sellers,
        json!([
            {"productId": 102, "name": "Coffee Mug", "totalQuantitySold": 9},
            {"productId": 101, "name": "Desk Lamp", "totalQuantitySold": 3}
        ])
    );
}

#[tokio::test]
async fn test_repeated_sync_changes_nothing() {
    let fixture = catalog().await;
    let store = InMemoryStore::new();
    let pipeline = fixture.pipeline(Arc::new(store.clone()));

    assert!(pipeline.run(&options()).await.is_success());
    let (_, first) = get_json(api_state(Arc::new(store.clone())), "/top-spenders").await;
    let users = store.users().await;

    assert!(pipeline.run(&options()).await.is_success());
    let (_, second) = get_json(api_state(Arc::new(store.clone())), "/top-spenders").await;

    assert_eq!(first, second);
    assert_eq!(store.users().await, users);
    assert_eq!(store.counts().await, (3, 4, 5));
}

#[tokio::test]
async fn test_updated_cart_replaces_its_lines() {
    let fixture = catalog().await;
    let store = InMemoryStore::new();
    let pipeline = fixture.pipeline(Arc::new(store.clone()));
    assert!(pipeline.run(&options()).await.is_success());

    // Cart 2 drops the lamp and buys more mugs
    fixture.reset().await;
    fixture
        .serve(
            "users",
            &[user(1, "Emily", "Johnson"), user(2, "Michael", "Williams")],
            PAGE_SIZE as usize,
        )
        .await;
    fixture
        .serve(
            "carts",
            &[cart(2, 2, &[Line { quantity: 10, ..MUG }])],
            PAGE_SIZE as usize,
        )
        .await;
    assert!(pipeline.run(&options()).await.is_success());

    let items = store.cart_items(CartId::new(2)).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 10);

    let (_, sellers) = get_json(api_state(Arc::new(store)), "/top-sellers?limit=1").await;
    assert_eq!(
        sellers,
        json!([{"productId": 102, "name": "Coffee Mug", "totalQuantitySold": 13}])
    );
}

#[tokio::test]
async fn test_empty_catalog_serves_empty_rankings() {
    let fixture = CatalogFixture::start().await;
    fixture.serve("users", &[], PAGE_SIZE as usize).await;
    fixture.serve("carts", &[], PAGE_SIZE as usize).await;

    let store = InMemoryStore::new();
    let report = fixture.pipeline(Arc::new(store.clone())).run(&options()).await;
    assert!(report.is_success());

    let state = api_state(Arc::new(store));
    for uri in ["/top-spenders", "/top-sellers"] {
        let (status, body) = get_json(state.clone(), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Array(vec![]));
    }
}

#[tokio::test]
async fn test_failed_sync_leaves_store_untouched() {
    let fixture = CatalogFixture::start().await;
    fixture
        .serve("users", &[user(1, "Emily", "Johnson")], PAGE_SIZE as usize)
        .await;
    // No carts mounted: the catalog answers 404

    let store = InMemoryStore::new();
    let report = fixture.pipeline(Arc::new(store.clone())).run(&options()).await;
    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(store.counts().await, (0, 0, 0));

    let (status, body) = get_json(api_state(Arc::new(store)), "/top-spenders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_served_over_tcp() {
    let fixture = catalog().await;
    let store = InMemoryStore::new();
    fixture.pipeline(Arc::new(store.clone())).run(&options()).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = cart_insights_api::app(api_state(Arc::new(store)));
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/top-spenders?limit=1"))
        .header("x-request-id", "it-42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap().to_str().unwrap(),
        "it-42"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body[0]["userId"], 1);

    let response = client
        .get(format!("http://{addr}/top-sellers?limit=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

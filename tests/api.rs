//! HTTP-level tests against the shipped schema and data snapshot

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use blogs_subgraph::{server, DataStore, SchemaRegistry, SilentOperationLogger, SubgraphBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn builder() -> SubgraphBuilder {
    let registry = SchemaRegistry::from_sdl(include_str!("../schema.graphql")).unwrap();
    let store = Arc::new(DataStore::from_json(include_str!("../data.json")).unwrap());
    SubgraphBuilder::new(registry, store).logger(Arc::new(SilentOperationLogger))
}

fn app() -> Router {
    server::router(Arc::new(builder().build().unwrap()))
}

async fn post_raw(body: impl Into<Body>) -> (StatusCode, Value) {
    send(app(), body.into()).await
}

async fn send(app: Router, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post(body: Value) -> (StatusCode, Value) {
    post_raw(body.to_string()).await
}

#[tokio::test]
async fn returns_all_blogs() {
    let (status, body) = post(json!({ "query": "{ blogs { id title labels author { id name } } }" })).await;

    assert_eq!(status, StatusCode::OK);
    let blogs = body["data"]["blogs"].as_array().unwrap();
    assert!(!blogs.is_empty());
    for blog in blogs {
        assert!(blog["id"].is_string());
        assert!(blog["title"].is_string());
        assert!(blog["labels"].is_array());
        assert!(blog["author"]["name"].is_string());
    }
}

#[tokio::test]
async fn returns_all_authors() {
    let (status, body) = post(json!({ "query": "{ authors { id name age description blogs { id title } } }" })).await;

    assert_eq!(status, StatusCode::OK);
    let authors = body["data"]["authors"].as_array().unwrap();
    assert_eq!(authors.len(), 3);
    assert_eq!(authors[0]["name"], "Ada Lovelace");
    assert!(authors[0]["age"].is_u64());
    assert!(authors[0]["blogs"].is_array());
}

#[tokio::test]
async fn returns_a_single_blog_by_id() {
    let (status, body) = post(json!({
        "query": "query($id: ID!) { blog(id: $id) { id title labels author { id name } } }",
        "variables": { "id": "1" }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["blog"]["id"], "1");
    assert_eq!(body["data"]["blog"]["author"]["id"], "101");
}

#[tokio::test]
async fn returns_null_for_a_missing_blog() {
    let (status, body) = post(json!({
        "query": "query($id: ID!) { blog(id: $id) { id title } }",
        "variables": { "id": "999" }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["blog"], Value::Null);
    assert!(body.get("errors").is_none());
}

#[tokio::test]
async fn returns_a_single_author_by_id() {
    let (status, body) = post(json!({
        "query": "query($id: ID!) { author(id: $id) { id name age description blogs { id title } } }",
        "variables": { "id": "101" }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["author"]["id"], "101");
    assert!(!body["data"]["author"]["blogs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn returns_null_for_a_missing_author() {
    let (status, body) = post(json!({
        "query": "query($id: ID!) { author(id: $id) { id name } }",
        "variables": { "id": "999" }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["author"], Value::Null);
}

#[tokio::test]
async fn returns_nested_blogs_for_an_author() {
    let (status, body) = post(json!({
        "query": "query($id: ID!) { author(id: $id) { id blogs { id title } } }",
        "variables": { "id": "101" }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["author"]["blogs"],
        json!([
            { "id": "1", "title": "The Poetry of Code" },
            { "id": "2", "title": "Analytical Engines Explained" }
        ])
    );
}

#[tokio::test]
async fn returns_the_author_of_a_blog() {
    let (status, body) = post(json!({
        "query": "query($id: ID!) { blog(id: $id) { id author { id name } } }",
        "variables": { "id": "4" }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["blog"]["author"]["name"], "Grace Hopper");
}

#[tokio::test]
async fn rejects_missing_required_variable() {
    let (status, body) = post(json!({ "query": "query($id: ID!) { blog(id: $id) { id title } }" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("data").is_none());
    assert_eq!(
        body["errors"][0]["message"],
        "Variable \"$id\" of required type \"ID!\" was not provided."
    );
}

#[tokio::test]
async fn reports_unknown_field_as_graphql_error() {
    let (status, body) = post(json!({ "query": "query { notAField }" })).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("Cannot query field"));
}

#[tokio::test]
async fn rejects_syntax_errors() {
    let (status, body) = post(json!({ "query": "{ blogs { id " })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"].as_array().is_some_and(|errors| !errors.is_empty()));
}

#[tokio::test]
async fn rejects_malformed_body() {
    let (status, body) = post_raw("not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid GraphQL request"));
}

#[tokio::test]
async fn resolves_entities_for_the_gateway() {
    let (status, body) = post(json!({
        "query": "query($r: [_Any!]!) { _entities(representations: $r) { ... on Author { name } ... on Blog { title } } }",
        "variables": {
            "r": [
                { "__typename": "Blog", "id": "5" },
                { "__typename": "Author", "id": "102" }
            ]
        }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["_entities"],
        json!([{ "title": "Can Machines Think?" }, { "name": "Grace Hopper" }])
    );
}

#[tokio::test]
async fn resolves_unknown_entities_to_null_in_place() {
    let (status, body) = post(json!({
        "query": "query($r: [_Any!]!) { _entities(representations: $r) { __typename ... on Author { id name } } }",
        "variables": {
            "r": [
                { "__typename": "Author", "id": "101" },
                { "__typename": "Author", "id": "999" },
                { "__typename": "Blog", "id": "999" },
                { "__typename": "Author", "id": "103" }
            ]
        }
    }))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("errors").is_none(), "{body}");
    assert_eq!(
        body["data"]["_entities"],
        json!([
            { "__typename": "Author", "id": "101", "name": "Ada Lovelace" },
            null,
            null,
            { "__typename": "Author", "id": "103", "name": "Alan Turing" }
        ])
    );
}

#[tokio::test]
async fn failing_non_null_field_nulls_nearest_nullable_ancestor() {
    let subgraph = builder()
        .resolver("Author", "name", |_| Err(async_graphql::Error::new("name unavailable")))
        .build()
        .unwrap();
    let body = json!({
        "query": "query($id: ID!) { blog(id: $id) { id title author { id name } } authors { id } }",
        "variables": { "id": "4" }
    });

    let (status, body) = send(server::router(Arc::new(subgraph)), Body::from(body.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    // Blog.author is nullable, so the blog itself survives
    assert_eq!(
        body["data"]["blog"],
        json!({ "id": "4", "title": "Compilers for Everyone", "author": null })
    );
    assert_eq!(body["data"]["authors"].as_array().unwrap().len(), 3);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["message"], "name unavailable");
    assert_eq!(body["errors"][0]["path"], json!(["blog", "author", "name"]));
}

#[tokio::test]
async fn coerces_integer_ids() {
    let (status, body) = post(json!({ "query": "{ blog(id: 1) { id title } }" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("errors").is_none(), "{body}");
    assert_eq!(body["data"]["blog"]["id"], "1");

    let (status, body) = post(json!({
        "query": "query($id: ID!) { author(id: $id) { id name } }",
        "variables": { "id": 102 }
    }))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["author"], json!({ "id": "102", "name": "Grace Hopper" }));
}

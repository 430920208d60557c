//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Health reports the bound storage backend
//! - Stats reflect flush cycles run by the scheduler
//! - Modules list every capability with its provider

use std::net::SocketAddr;

use apm_collector::api::{ApiState, spawn_api_server};
use apm_collector::collector::Collector;
use axum::http::StatusCode;
use serde_json::Value;

use crate::helpers::{MINUTE, call, memory_collector};

async fn spawn_test_api(collector: &Collector) -> SocketAddr {
    let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    spawn_api_server(bind_addr, ApiState::from_collector(collector))
        .await
        .unwrap()
}

async fn get_json(addr: SocketAddr, path: &str) -> (StatusCode, Value) {
    let response = reqwest::get(format!("http://{}{}", addr, path))
        .await
        .unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_backend, collector) = memory_collector();
    let addr = spawn_test_api(&collector).await;

    let (status, body) = get_json(addr, "/api/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"]["backend"], "memory");
    assert_eq!(body["storage"]["healthy"], true);

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stats_endpoint_after_flush() {
    let (_backend, collector) = memory_collector();
    let addr = spawn_test_api(&collector).await;

    collector.aggregator().observe(&call(2 * MINUTE, 50, false)).unwrap();
    collector.scheduler().flush().await.unwrap();

    let (status, body) = get_json(addr, "/api/v1/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flush"]["cycles"], 1);
    assert_eq!(body["flush"]["inserted_total"], 1);
    assert_eq!(body["flush"]["buffered_ids"], 0);
    assert!(body["flush"]["last_retention"].is_null());

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_modules_endpoint() {
    let (_backend, collector) = memory_collector();
    let addr = spawn_test_api(&collector).await;

    let (status, body) = get_json(addr, "/api/v1/modules").await;

    assert_eq!(status, StatusCode::OK);
    let modules = body["modules"].as_array().unwrap();
    assert_eq!(modules.len(), 2);
    assert_eq!(modules[0]["name"], "agent_stream");
    assert_eq!(modules[0]["capabilities"].as_array().unwrap().len(), 9);
    assert_eq!(modules[1]["name"], "storage");
    assert_eq!(modules[1]["capabilities"][0]["provider"], "memory");

    collector.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (_backend, collector) = memory_collector();
    let addr = spawn_test_api(&collector).await;

    let response = reqwest::get(format!("http://{}/api/v1/servers", addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    collector.shutdown().await.unwrap();
}

// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_plc_sampler::config::InfluxDbConfig;
use rust_plc_sampler::sink::{InfluxDbSink, PointLayout, Sink, SinkError};
use rust_plc_sampler::utility::reachability::{
    is_influxdb_ready, wait_for_influxdb, WaitAborted, INFLUXDB_READY_MESSAGE,
};
use rust_plc_sampler::PlcRecord;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn influx_config(server: &MockServer) -> InfluxDbConfig {
    InfluxDbConfig {
        enabled: true,
        url: server.uri(),
        token: "secret-token".to_string(),
        org: "DAFRA".to_string(),
        bucket: "PLC_READ".to_string(),
        timeout_ms: 1000,
        ..InfluxDbConfig::default()
    }
}

#[tokio::test]
async fn test_write_point_uses_line_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "DAFRA"))
        .and(query_param("bucket", "PLC_READ"))
        .and(query_param("precision", "ns"))
        .and(header("Authorization", "Token secret-token"))
        .and(body_string(
            "temperature,host=plc temperature1=21i,temperature2=22i,temperature3=23i 1700000000000000000",
        ))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = influx_config(&server);
    let sink = InfluxDbSink::new(&config).unwrap();
    let record = PlcRecord {
        tag1: 21,
        tag2: 22,
        tag3: 23,
        tag4: 7,
    };
    let point = PointLayout::from(&config).point(&record, Utc.timestamp_opt(1_700_000_000, 0).unwrap());

    sink.write_point(&point).await.unwrap();
}

#[tokio::test]
async fn test_rejected_write_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized access"))
        .mount(&server)
        .await;

    let config = influx_config(&server);
    let sink = InfluxDbSink::new(&config).unwrap();
    let point = PointLayout::from(&config).point(&PlcRecord::default(), Utc::now());

    match sink.write_point(&point).await {
        Err(SinkError::Rejected { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "unauthorized access");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

/// Read one complete HTTP request, headers and body
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut buffer = [0u8; 1024];
    loop {
        let read = socket.read(&mut buffer).await.unwrap();
        request.extend_from_slice(&buffer[..read]);
        let text = String::from_utf8_lossy(&request).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if request.len() >= end + 4 + content_length {
                return text;
            }
        }
        if read == 0 {
            return text;
        }
    }
}

#[tokio::test]
async fn test_truncated_rejection_body_keeps_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
            .await
            .unwrap();
        socket.shutdown().await.ok();
    });

    let config = InfluxDbConfig {
        enabled: true,
        url: format!("http://{}", addr),
        org: "DAFRA".to_string(),
        bucket: "PLC_READ".to_string(),
        timeout_ms: 2000,
        ..InfluxDbConfig::default()
    };
    let sink = InfluxDbSink::new(&config).unwrap();
    let point = PointLayout::from(&config).point(&PlcRecord::default(), Utc::now());

    match sink.write_point(&point).await {
        Err(SinkError::Rejected { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let config = InfluxDbConfig {
        timeout_ms: 50,
        ..influx_config(&server)
    };
    let sink = InfluxDbSink::new(&config).unwrap();
    let point = PointLayout::from(&config).point(&PlcRecord::default(), Utc::now());

    assert!(matches!(
        sink.write_point(&point).await,
        Err(SinkError::Http(_))
    ));
}

#[tokio::test]
async fn test_health_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "influxdb", "message": INFLUXDB_READY_MESSAGE, "status": "pass"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/starting"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"message": "starting up"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": INFLUXDB_READY_MESSAGE})))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let config = influx_config(&server);

    assert!(is_influxdb_ready(&client, &config.health_url()).await);
    assert!(!is_influxdb_ready(&client, &format!("{}/starting", server.uri())).await);
    assert!(!is_influxdb_ready(&client, &format!("{}/broken", server.uri())).await);
    assert!(!is_influxdb_ready(&client, &format!("{}/missing", server.uri())).await);
}

#[tokio::test]
async fn test_wait_for_influxdb_aborts_on_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let health_url = format!("{}/health", server.uri());
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let waiter = tokio::spawn(async move {
        wait_for_influxdb(&client, &health_url, Duration::from_secs(60), &mut stop_rx).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("wait loop ignored the stop request")
        .unwrap();
    assert_eq!(result, Err(WaitAborted("InfluxDB")));
}

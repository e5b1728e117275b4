//! Test fixtures: a minimal MaxMind DB writer, gzip tar archives and a mock
//! download provider.

use axum::{
    extract::RawQuery,
    http::{header, StatusCode},
    routing::get,
    Router,
};
use flate2::{write::GzEncoder, Compression};
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use url::Url;

const METADATA_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// Subset of MaxMind DB data types needed to write City records
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Double(f64),
    U16(u16),
    U32(u32),
    U64(u64),
    Bool(bool),
    Map(Vec<(String, Value)>),
    Array(Vec<Value>),
}

pub fn s(v: &str) -> Value {
    Value::Str(v.to_string())
}

pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn names(en: &str) -> Value {
    map(vec![("en", s(en))])
}

fn control(out: &mut Vec<u8>, type_id: u8, size: usize) {
    assert!(size < 29, "fixture values must stay small");
    if type_id <= 7 {
        out.push((type_id << 5) | size as u8);
    } else {
        out.push(size as u8);
        out.push(type_id - 7);
    }
}

fn uint(out: &mut Vec<u8>, type_id: u8, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    control(out, type_id, bytes.len() - skip);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Str(v) => {
            control(out, 2, v.len());
            out.extend_from_slice(v.as_bytes());
        }
        Value::Double(v) => {
            control(out, 3, 8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::U16(v) => uint(out, 5, u64::from(*v)),
        Value::U32(v) => uint(out, 6, u64::from(*v)),
        Value::U64(v) => uint(out, 9, *v),
        Value::Bool(v) => control(out, 14, usize::from(*v)),
        Value::Map(entries) => {
            control(out, 7, entries.len());
            for (key, v) in entries {
                encode(&Value::Str(key.clone()), out);
                encode(v, out);
            }
        }
        Value::Array(items) => {
            control(out, 11, items.len());
            for item in items {
                encode(item, out);
            }
        }
    }
}

/// Build an IPv4 database in which every address of `0.0.0.0/1` resolves to
/// `record` and `128.0.0.0/1` has no data.
pub fn database_with(record: &Value) -> Vec<u8> {
    let node_count: u32 = 1;
    // Data pointers are offset by the node count and the 16 byte separator
    let data_pointer = node_count + 16;

    let mut buf = Vec::new();
    buf.extend_from_slice(&data_pointer.to_be_bytes()[1..]);
    buf.extend_from_slice(&node_count.to_be_bytes()[1..]);
    buf.extend_from_slice(&[0u8; 16]);
    encode(record, &mut buf);

    buf.extend_from_slice(METADATA_MARKER);
    let metadata = map(vec![
        ("binary_format_major_version", Value::U16(2)),
        ("binary_format_minor_version", Value::U16(0)),
        ("build_epoch", Value::U64(1_700_000_000)),
        ("database_type", s("GeoLite2-City")),
        ("description", map(vec![("en", s("test fixture"))])),
        ("ip_version", Value::U16(4)),
        ("languages", Value::Array(vec![s("en")])),
        ("node_count", Value::U32(node_count)),
        ("record_size", Value::U16(24)),
    ]);
    encode(&metadata, &mut buf);
    buf
}

fn country(iso: &str, geoname_id: u32, name: &str) -> Value {
    map(vec![
        ("geoname_id", Value::U32(geoname_id)),
        ("iso_code", s(iso)),
        ("names", names(name)),
    ])
}

/// City record resembling the entry for 8.8.8.8
pub fn us_record() -> Value {
    map(vec![
        (
            "city",
            map(vec![
                ("geoname_id", Value::U32(5375480)),
                ("names", names("Mountain View")),
            ]),
        ),
        (
            "continent",
            map(vec![
                ("code", s("NA")),
                ("geoname_id", Value::U32(6255149)),
                ("names", names("North America")),
            ]),
        ),
        ("country", country("US", 6252001, "United States")),
        (
            "location",
            map(vec![
                ("accuracy_radius", Value::U16(1000)),
                ("latitude", Value::Double(37.751)),
                ("longitude", Value::Double(-97.822)),
                ("time_zone", s("America/Chicago")),
            ]),
        ),
        ("postal", map(vec![("code", s("94043"))])),
        ("registered_country", country("US", 6252001, "United States")),
        (
            "subdivisions",
            Value::Array(vec![map(vec![
                ("geoname_id", Value::U32(5332921)),
                ("iso_code", s("CA")),
                ("names", names("California")),
            ])]),
        ),
    ])
}

/// Sparse record carrying only country data
pub fn country_only_record(iso: &str) -> Value {
    map(vec![
        ("country", country(iso, 6251999, "Canada")),
        (
            "traits",
            map(vec![("is_anonymous_proxy", Value::Bool(true))]),
        ),
    ])
}

pub fn us_database() -> Vec<u8> {
    database_with(&us_record())
}

/// Gzip-compressed tar archive holding the given regular files
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// Archive laid out the way the provider ships it
pub fn provider_archive(database: &[u8]) -> Vec<u8> {
    tar_gz(&[
        ("GeoLite2-City_20240101/COPYRIGHT.txt", b"copyright".as_slice()),
        ("GeoLite2-City_20240101/GeoLite2-City.mmdb", database),
    ])
}

/// Mock download endpoint; records the raw query of every request it serves
pub struct MockProvider {
    pub url: Url,
    pub queries: Arc<Mutex<Vec<String>>>,
}

pub async fn spawn_provider(status: StatusCode, body: Vec<u8>) -> MockProvider {
    spawn_slow_provider(status, body, Duration::ZERO).await
}

/// Mock provider that waits `delay` before answering each request
pub async fn spawn_slow_provider(status: StatusCode, body: Vec<u8>, delay: Duration) -> MockProvider {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let seen = queries.clone();

    let app = Router::new().route(
        "/geoip_download",
        get(move |RawQuery(query): RawQuery| {
            let body = body.clone();
            let seen = seen.clone();
            async move {
                seen.lock().push(query.unwrap_or_default());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (status, [(header::CONTENT_TYPE, "application/gzip")], body)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockProvider {
        url: Url::parse(&format!("http://{}/geoip_download", addr)).unwrap(),
        queries,
    }
}

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;

pub fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

/// ftyp, padding mdat, then moov/mvhd (timescale 1000, 12.5s), exactly `total_len` bytes
pub fn sample_mp4(total_len: usize) -> Vec<u8> {
    let ftyp = mp4_box(b"ftyp", b"isom\0\0\x02\0isomiso2mp41");

    let mut mvhd = vec![0u8; 12];
    mvhd.extend_from_slice(&1000u32.to_be_bytes());
    mvhd.extend_from_slice(&12_500u32.to_be_bytes());
    mvhd.extend_from_slice(&[0u8; 80]);
    let moov = mp4_box(b"moov", &mp4_box(b"mvhd", &mvhd));

    let mdat_body = total_len - ftyp.len() - moov.len() - 8;
    let mut file = ftyp;
    file.extend(mp4_box(b"mdat", &vec![0u8; mdat_body]));
    file.extend(moov);
    assert_eq!(file.len(), total_len);
    file
}

#[derive(Clone)]
struct OriginState {
    media: Bytes,
    gets: Arc<AtomicUsize>,
}

/// Local media host bound to an ephemeral port
pub struct Origin {
    pub addr: SocketAddr,
    pub gets: Arc<AtomicUsize>,
}

impl Origin {
    pub async fn start(media: Vec<u8>) -> Self {
        let gets = Arc::new(AtomicUsize::new(0));
        let state = OriginState {
            media: Bytes::from(media),
            gets: gets.clone(),
        };

        let app = Router::new()
            .route("/video.mp4", get(ranged_media))
            .route("/full.mp4", get(full_media))
            .route("/download", get(attachment))
            .route("/page", get(landing_page))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/forbidden", get(|| async { StatusCode::FORBIDDEN }))
            .route("/unsized", get(unsized_media))
            .with_state(state);

        let addr = serve(app).await;
        Self { addr, gets }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

/// Spawn `app` on 127.0.0.1:0 and return the bound address
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn count_get(method: &Method, state: &OriginState) {
    if *method == Method::GET {
        state.gets.fetch_add(1, Ordering::SeqCst);
    }
}

fn parse_range(headers: &HeaderMap, len: usize) -> Option<(usize, usize)> {
    let raw = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = raw.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse::<usize>().ok()?.min(len - 1);
    (start <= end).then_some((start, end))
}

fn media_response(status: StatusCode, body: Bytes, extra: &[(header::HeaderName, String)]) -> Response {
    let mut response = (status, body.clone()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    for (name, value) in extra {
        headers.insert(name.clone(), HeaderValue::from_str(value).unwrap());
    }
    response
}

async fn ranged_media(State(state): State<OriginState>, method: Method, headers: HeaderMap) -> Response {
    count_get(&method, &state);
    let len = state.media.len();
    match parse_range(&headers, len) {
        Some((start, end)) if method == Method::GET => media_response(
            StatusCode::PARTIAL_CONTENT,
            state.media.slice(start..=end),
            &[(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))],
        ),
        _ => media_response(StatusCode::OK, state.media.clone(), &[]),
    }
}

/// Ignores Range and always sends the whole file
async fn full_media(State(state): State<OriginState>, method: Method) -> Response {
    count_get(&method, &state);
    media_response(StatusCode::OK, state.media.clone(), &[])
}

async fn attachment(State(state): State<OriginState>, method: Method, headers: HeaderMap) -> Response {
    let mut response = ranged_media(State(state), method, headers).await;
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"fallback.bin\"; filename*=UTF-8''my%20clip.mp4"),
    );
    response
}

async fn landing_page(State(state): State<OriginState>, method: Method) -> Response {
    count_get(&method, &state);
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        "<html><body>not a video</body></html>",
    )
        .into_response()
}

/// Streamed body, so no Content-Length is sent
async fn unsized_media(State(state): State<OriginState>, method: Method) -> Response {
    count_get(&method, &state);
    let chunk = state.media.slice(..16usize.min(state.media.len()));
    let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(chunk) });
    let mut response = Body::from_stream(stream).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response
}

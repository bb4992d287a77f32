mod common;

use common::{Origin, sample_mp4};
use mediapeek::config::FetchConfig;
use mediapeek::fetch::{FetchError, FetchRequest, RemoteFetcher};
use mediapeek::humanize::ByteSize;

fn fetcher() -> RemoteFetcher {
    RemoteFetcher::new(&FetchConfig::default()).unwrap()
}

fn request(url: String, max_bytes: ByteSize) -> FetchRequest {
    FetchRequest::builder().url(url).max_bytes(max_bytes).build()
}

#[tokio::test]
async fn test_fetch_whole_file_under_cap() {
    let origin = Origin::start(sample_mp4(1_000_000)).await;

    let result = fetcher()
        .fetch(&request(origin.url("/video.mp4"), ByteSize::mib(50)))
        .await
        .unwrap();

    assert_eq!(result.buffer.len(), 1_000_000);
    assert_eq!(result.declared_file_size, 1_000_000);
    // without Content-Disposition the URL itself names the file
    assert_eq!(result.filename, origin.url("/video.mp4"));
    assert!(!result.diagnostics.was_truncated);
    assert!(result.diagnostics.chunk_count >= 1);
    assert_eq!(&result.buffer[4..8], b"ftyp");
    assert_eq!(origin.get_count(), 1);
}

#[tokio::test]
async fn test_fetch_stops_at_cap_with_range() {
    let origin = Origin::start(sample_mp4(1_000_000)).await;

    let result = fetcher()
        .fetch(&request(origin.url("/video.mp4"), ByteSize::kib(64)))
        .await
        .unwrap();

    assert_eq!(result.buffer.len(), 64 * 1024);
    assert_eq!(result.declared_file_size, 1_000_000);
    assert!(result.diagnostics.was_truncated);
}

#[tokio::test]
async fn test_fetch_caps_origin_that_ignores_range() {
    let origin = Origin::start(sample_mp4(1_000_000)).await;

    let result = fetcher()
        .fetch(&request(origin.url("/full.mp4"), ByteSize::kib(100)))
        .await
        .unwrap();

    assert_eq!(result.buffer.len(), 100 * 1024);
    assert!(result.diagnostics.was_truncated);
}

#[tokio::test]
async fn test_fetch_uses_content_disposition_filename() {
    let origin = Origin::start(sample_mp4(4096)).await;

    let result = fetcher()
        .fetch(&request(origin.url("/download"), ByteSize::mib(1)))
        .await
        .unwrap();

    assert_eq!(result.filename, "my clip.mp4");
    assert_eq!(result.diagnostics.resolved_filename, "my clip.mp4");
}

#[tokio::test]
async fn test_fetch_rejects_html_before_any_get() {
    let origin = Origin::start(sample_mp4(4096)).await;

    let err = fetcher()
        .fetch(&request(origin.url("/page"), ByteSize::mib(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::NotMedia));
    assert!(err.to_string().contains("webpage"));
    assert_eq!(origin.get_count(), 0);
}

#[tokio::test]
async fn test_fetch_maps_head_status() {
    let origin = Origin::start(sample_mp4(4096)).await;

    let not_found = fetcher()
        .fetch(&request(origin.url("/missing"), ByteSize::mib(1)))
        .await
        .unwrap_err();
    assert!(matches!(not_found, FetchError::NotFound));

    let denied = fetcher()
        .fetch(&request(origin.url("/forbidden"), ByteSize::mib(1)))
        .await
        .unwrap_err();
    assert!(matches!(denied, FetchError::AccessDenied));
}

#[tokio::test]
async fn test_fetch_requires_declared_size() {
    let origin = Origin::start(sample_mp4(4096)).await;

    let err = fetcher()
        .fetch(&request(origin.url("/unsized"), ByteSize::mib(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::MissingSize));
    assert_eq!(origin.get_count(), 0);
}

#[tokio::test]
async fn test_fetch_unreachable_host() {
    // bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher()
        .fetch(&request(format!("http://{addr}/video.mp4"), ByteSize::mib(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Unreachable(_)));
}

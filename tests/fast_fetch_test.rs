//! Fast path against local mock servers

use partwatch_extractor::config::{FetchConfig, GuardConfig};
use partwatch_extractor::utils::UrlKind;
use partwatch_extractor::{FastFetcher, FetchOutcome, UrlGuard};
use std::sync::Arc;

mod common;

fn fetcher() -> FastFetcher {
    let guard = UrlGuard::new(&GuardConfig {
        resolve_dns: false,
        ..GuardConfig::default()
    })
    .allow_host("127.0.0.1");
    FastFetcher::new(&FetchConfig::default(), Arc::new(guard)).unwrap()
}

fn product_page() -> String {
    common::create_test_html(
        "E3Z Photoelectric Sensor",
        &format!(
            "<nav>Home | Products</nav><h1>E3Z</h1><p>{}</p>\
             <table><tr><th>Model</th><th>Status</th></tr>\
             <tr><td>E3Z-D61</td><td>Discontinued</td></tr></table>\
             <footer>Copyright</footer>",
            common::long_text("The E3Z series")
        ),
    )
}

#[tokio::test]
async fn test_html_page_extracted_without_browser() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/products/e3z")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(product_page())
        .create_async()
        .await;

    let url = format!("{}/products/e3z", server.url());
    let content = fetcher().fetch(&url).await.into_content().unwrap();
    mock.assert_async().await;

    assert_eq!(content.kind, UrlKind::Html);
    assert_eq!(content.title.as_deref(), Some("E3Z Photoelectric Sensor"));
    assert!(content.text.contains("[ROW] [CELL] E3Z-D61 | [CELL] Discontinued"));
    assert!(!content.text.contains("Home | Products"));
    assert!(!content.placeholder);
}

#[tokio::test]
async fn test_not_found_falls_back_to_browser() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/404")
        .with_status(404)
        .with_header("content-type", "text/html")
        .with_body("<html><title>Page Not Found</title><body>Page Not Found</body></html>")
        .create_async()
        .await;

    let outcome = fetcher().fetch(&format!("{}/404", server.url())).await;
    assert!(matches!(outcome, FetchOutcome::Fallback(reason) if reason.contains("404")));
}

#[tokio::test]
async fn test_soft_error_page_falls_back() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/gone")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(common::create_test_html(
            "Page Not Found",
            &common::long_text("We could not find that page"),
        ))
        .create_async()
        .await;

    let outcome = fetcher().fetch(&format!("{}/gone", server.url())).await;
    assert!(matches!(outcome, FetchOutcome::Fallback(_)));
}

#[tokio::test]
async fn test_pdf_http_error_is_terminal_placeholder() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/manual.pdf")
        .with_status(403)
        .create_async()
        .await;

    let content = fetcher()
        .fetch(&format!("{}/manual.pdf", server.url()))
        .await
        .into_content()
        .unwrap();
    assert!(content.placeholder);
    assert_eq!(content.text, "[could not fetch PDF: HTTP 403]");
}

#[tokio::test]
async fn test_oversized_pdf_rejected_before_download() {
    let mut server = mockito::Server::new_async().await;
    let body = vec![b'%'; 25 * 1024 * 1024];
    let _mock = server
        .mock("GET", "/catalog.pdf")
        .with_status(200)
        .with_header("content-type", "application/pdf")
        .with_body(body)
        .create_async()
        .await;

    let content = fetcher()
        .fetch(&format!("{}/catalog.pdf", server.url()))
        .await
        .into_content()
        .unwrap();
    assert!(content.placeholder);
    assert_eq!(content.text, "[PDF too large (25.0 MB)]");
}

#[tokio::test]
async fn test_shift_jis_body_is_decoded() {
    let text = "この製品は生産終了しました。後継機種をご検討ください。".repeat(10);
    let html = format!("<html><head><title>製品情報</title></head><body><p>{text}</p></body></html>");
    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(&html);

    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/jp")
        .with_status(200)
        .with_header("content-type", "text/html; charset=Shift_JIS")
        .with_body(encoded.into_owned())
        .create_async()
        .await;

    let content = fetcher()
        .fetch(&format!("{}/jp", server.url()))
        .await
        .into_content()
        .unwrap();
    assert!(content.text.contains("生産終了"));
    assert_eq!(content.title.as_deref(), Some("製品情報"));
}

#[tokio::test]
async fn test_plain_text_kept_verbatim() {
    let body = common::long_text("Lifecycle notice");
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/notice.txt")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(&body)
        .create_async()
        .await;

    let content = fetcher()
        .fetch(&format!("{}/notice.txt", server.url()))
        .await
        .into_content()
        .unwrap();
    assert_eq!(content.kind, UrlKind::Text);
    assert!(content.text.contains("discontinued"));
}

#[tokio::test]
async fn test_redirect_to_private_address_is_blocked() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/hop")
        .with_status(302)
        .with_header("location", "http://10.0.0.5/internal")
        .create_async()
        .await;

    let outcome = fetcher().fetch(&format!("{}/hop", server.url())).await;
    assert!(matches!(outcome, FetchOutcome::Fallback(_)));
}

use sitescan_browser::{BrowserEngine, BrowserPool, PageProfile};
use sitescan_core::BrowserConfig;
use std::sync::Arc;
use std::time::Duration;

fn pool() -> BrowserPool {
    let config = BrowserConfig::default();
    let profile = PageProfile::from_config(&config);
    BrowserPool::new(Arc::new(BrowserEngine::new(config)), profile, 1)
}

#[tokio::test]
#[ignore = "Requires Chrome browser to be installed"]
async fn test_load_page() {
    let pool = pool();
    let session = pool.acquire().await.unwrap();
    let page = session.open_page().await.unwrap();

    let loaded = page
        .load("https://example.com", Duration::from_secs(30))
        .await
        .expect("navigation");
    assert!(loaded.html.contains("Example Domain"));
    assert_eq!(loaded.title.as_deref(), Some("Example Domain"));

    page.release().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires Chrome browser to be installed"]
async fn test_evaluate_and_screenshot() {
    let pool = pool();
    let session = pool.acquire().await.unwrap();
    let page = session.open_page().await.unwrap();
    page.load("https://example.com", Duration::from_secs(30))
        .await
        .unwrap();

    let count = page
        .evaluate("document.querySelectorAll('p').length")
        .await
        .unwrap();
    assert!(count.as_u64().unwrap_or(0) > 0);

    let jpeg = page.screenshot_jpeg(70).await.unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
}

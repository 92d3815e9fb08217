//! Metadata captured from the shared page.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use sitescan_browser::{LoadedPage, PageHandle};
use sitescan_db::PageMetadata;
use tracing::debug;

/// JPEG quality of the stored screenshot.
pub const SCREENSHOT_QUALITY: u8 = 70;

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));
static DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="description"]"#).expect("valid selector"));
static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid selector"));

fn clean(text: &str) -> Option<String> {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!joined.is_empty()).then_some(joined)
}

/// Title, description and first heading of a loaded page.
pub fn extract_metadata(loaded: &LoadedPage) -> PageMetadata {
    let document = Html::parse_document(&loaded.html);

    let title = loaded.title.as_deref().and_then(clean).or_else(|| {
        document
            .select(&TITLE)
            .next()
            .and_then(|el| clean(&el.text().collect::<String>()))
    });
    let description = document
        .select(&DESCRIPTION)
        .find_map(|el| el.value().attr("content"))
        .and_then(clean);
    let h1 = document
        .select(&H1)
        .next()
        .and_then(|el| clean(&el.text().collect::<String>()));

    PageMetadata {
        title,
        description,
        h1,
        final_url: loaded.final_url.clone(),
        screenshot: None,
    }
}

/// Base64 JPEG of the viewport. A failed capture is not an error.
pub async fn capture_screenshot(page: &dyn PageHandle) -> Option<String> {
    match page.screenshot_jpeg(SCREENSHOT_QUALITY).await {
        Ok(bytes) => Some(STANDARD.encode(bytes)),
        Err(e) => {
            debug!(error = %e, "Screenshot failed, continuing without one");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(html: &str, title: Option<&str>) -> LoadedPage {
        LoadedPage {
            final_url: "https://example.com/".to_string(),
            html: html.to_string(),
            title: title.map(ToString::to_string),
        }
    }

    #[test]
    fn test_extract_metadata() {
        let page = loaded(
            r#"<html><head><title>Ignored</title>
               <meta name="description" content="  About   us "></head>
               <body><h1> Welcome <span>home</span></h1><h1>Second</h1></body></html>"#,
            Some("Browser Title"),
        );
        let meta = extract_metadata(&page);
        assert_eq!(meta.title.as_deref(), Some("Browser Title"));
        assert_eq!(meta.description.as_deref(), Some("About us"));
        assert_eq!(meta.h1.as_deref(), Some("Welcome home"));
        assert_eq!(meta.final_url, "https://example.com/");
        assert!(meta.screenshot.is_none());
    }

    #[test]
    fn test_title_falls_back_to_markup() {
        let meta = extract_metadata(&loaded("<title> Fallback </title>", Some("  ")));
        assert_eq!(meta.title.as_deref(), Some("Fallback"));
        assert!(meta.description.is_none());
        assert!(meta.h1.is_none());
    }
}

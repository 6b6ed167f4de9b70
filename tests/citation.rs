use std::sync::Mutex;

use ncbi_cell::citation::{
    CitationResolver, FetchedPage, PageFetcher, TitleExtractor, TitleLookup,
};
use ncbi_cell::error::CellError;
use tracing_test::traced_test;

#[derive(Default)]
struct StaticPage {
    status: Option<u16>,
    body: String,
    requested: Mutex<Vec<String>>,
}

impl StaticPage {
    fn new(status: Option<u16>, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            requested: Mutex::new(Vec::new()),
        }
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl PageFetcher for &StaticPage {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        self.requested.lock().unwrap().push(url.to_string());
        Ok(FetchedPage {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

struct Unreachable;

impl PageFetcher for Unreachable {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        Err(CellError::PageHttp(format!("connection refused: {url}")))
    }
}

const CITATION: &str = "Publication: https://example.com/article Dataset Version: 2024-01-01 curated and distributed by CZ CELLxGENE Discover";

fn scripts_with_title(title: &str) -> String {
    format!(
        "<html><head><script>a</script><script>b</script><script>c</script><script>d</script>\
         <script>window.dataLayer = {{ articleName : '{title}', pageType : 'article' }};</script>\
         </head></html>"
    )
}

#[test]
fn citation_url_extracted() {
    let extractor = TitleExtractor::new().unwrap();
    assert_eq!(
        extractor.extract_citation_url(CITATION),
        Some("https://example.com/article".to_string())
    );
    assert_eq!(extractor.extract_citation_url("Dataset Version: only"), None);
}

#[test]
fn title_taken_from_article_header() {
    let primary = StaticPage::new(Some(200), r#"<h1 class="c-article-title">My Study</h1>"#);
    let fallback = StaticPage::default();
    let resolver = CitationResolver::new(&primary, &fallback).unwrap();

    let lookup = resolver.resolve(CITATION);

    assert_eq!(
        lookup,
        TitleLookup {
            citation_url: Some("https://example.com/article".to_string()),
            title: Some("My Study".to_string()),
        }
    );
    assert_eq!(primary.requested(), vec!["https://example.com/article"]);
    assert!(fallback.requested().is_empty());
}

#[test]
#[traced_test]
fn citation_without_publication_yields_nothing() {
    let primary = StaticPage::new(Some(200), "");
    let fallback = StaticPage::default();
    let resolver = CitationResolver::new(&primary, &fallback).unwrap();

    let lookup = resolver.resolve("Dataset Version: https://datasets.example/x.h5ad");

    assert_eq!(lookup, TitleLookup::default());
    assert!(primary.requested().is_empty());
    assert!(fallback.requested().is_empty());
    assert!(logs_contain("WARN"));
    assert!(logs_contain("could not find citation URL"));
}

#[test]
fn non_ok_status_uses_fallback_script() {
    let primary = StaticPage::new(Some(403), r#"<h1 class="c-article-title">Blocked</h1>"#);
    let fallback = StaticPage::new(None, &scripts_with_title("Airway atlas"));
    let resolver = CitationResolver::new(&primary, &fallback).unwrap();

    let lookup = resolver.resolve(CITATION);

    assert_eq!(lookup.title.as_deref(), Some("Airway atlas"));
    assert_eq!(fallback.requested(), vec!["https://example.com/article"]);
}

#[test]
fn unmatched_selectors_use_fallback_script() {
    let primary = StaticPage::new(Some(200), "<h1>Plain heading</h1>");
    let fallback = StaticPage::new(None, &scripts_with_title("Lung fibrosis"));
    let resolver = CitationResolver::new(&primary, &fallback).unwrap();

    assert_eq!(
        resolver.resolve(CITATION).title.as_deref(),
        Some("Lung fibrosis")
    );
}

#[test]
fn both_paths_failing_keeps_url() {
    let resolver = CitationResolver::new(Unreachable, Unreachable).unwrap();

    let lookup = resolver.resolve(CITATION);

    assert_eq!(
        lookup.citation_url.as_deref(),
        Some("https://example.com/article")
    );
    assert_eq!(lookup.title, None);
}

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::error::CellError;
use crate::http;
use crate::tools::find_in_path;

/// Publisher title selectors, most specific first.
pub const TITLE_SELECTORS: [&str; 5] = [
    "h1.c-article-title",
    "h1.article-header__title.smaller",
    "div.core-container h1",
    "h1.content-header__title.content-header__title--xx-long",
    "h1#page-title.highwire-cite-title",
];

const CITATION_URL_PATTERN: &str = r"Publication: (.*) Dataset Version:";
const EMBEDDED_TITLE_PATTERN: &str = r"articleName : '(.*)',";
const EMBEDDED_SCRIPT_INDEX: usize = 4;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status, when the fetcher can observe it.
    pub status: Option<u16>,
    pub body: String,
}

pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TitleLookup {
    pub citation_url: Option<String>,
    pub title: Option<String>,
}

pub struct TitleExtractor {
    url_pattern: Regex,
    embedded_pattern: Regex,
    script_selector: Selector,
    selectors: Vec<(&'static str, Selector)>,
}

impl TitleExtractor {
    pub fn new() -> Result<Self, CellError> {
        let selectors = TITLE_SELECTORS
            .iter()
            .map(|raw| parse_selector(raw).map(|selector| (*raw, selector)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            url_pattern: Regex::new(CITATION_URL_PATTERN)
                .map_err(|err| CellError::InvalidPattern(err.to_string()))?,
            embedded_pattern: Regex::new(EMBEDDED_TITLE_PATTERN)
                .map_err(|err| CellError::InvalidPattern(err.to_string()))?,
            script_selector: parse_selector("script")?,
            selectors,
        })
    }

    /// Publication URL from a `Publication: <url> Dataset Version:` citation.
    pub fn extract_citation_url(&self, citation: &str) -> Option<String> {
        self.url_pattern
            .captures(citation)
            .and_then(|caps| caps.get(1))
            .map(|url| url.as_str().to_string())
    }

    /// Text of the first element matched by the first selector that
    /// matches anything.
    pub fn select_title(&self, html: &str, url: &str) -> Option<String> {
        let document = Html::parse_document(html);
        for (raw, selector) in &self.selectors {
            let mut matches = document.select(selector);
            let Some(first) = matches.next() else {
                continue;
            };
            if matches.next().is_some() {
                tracing::warn!(selector = *raw, url, "selected more than one element");
            }
            return Some(first.text().collect::<String>().trim().to_string());
        }
        None
    }

    /// Title embedded as `articleName : '...'` in the fifth script block.
    pub fn embedded_title(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let script = document
            .select(&self.script_selector)
            .nth(EMBEDDED_SCRIPT_INDEX)?;
        let text = script.text().collect::<String>();
        self.embedded_pattern
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|title| title.as_str().to_string())
    }
}

fn parse_selector(raw: &str) -> Result<Selector, CellError> {
    Selector::parse(raw).map_err(|err| CellError::InvalidPattern(format!("{raw}: {err}")))
}

pub struct CitationResolver<P: PageFetcher, F: PageFetcher> {
    extractor: TitleExtractor,
    primary: P,
    fallback: F,
}

impl<P: PageFetcher, F: PageFetcher> CitationResolver<P, F> {
    pub fn new(primary: P, fallback: F) -> Result<Self, CellError> {
        Ok(Self {
            extractor: TitleExtractor::new()?,
            primary,
            fallback,
        })
    }

    pub fn resolve(&self, citation: &str) -> TitleLookup {
        let Some(url) = self.extractor.extract_citation_url(citation) else {
            tracing::warn!(citation, "could not find citation URL");
            return TitleLookup::default();
        };

        tracing::info!(url = %url, "getting title for citation URL");
        let title = self
            .primary_title(&url)
            .or_else(|| self.fallback_title(&url));
        match &title {
            Some(title) => tracing::info!(url = %url, title = %title, "found title"),
            None => tracing::warn!(url = %url, "no title found"),
        }

        TitleLookup {
            citation_url: Some(url),
            title,
        }
    }

    fn primary_title(&self, url: &str) -> Option<String> {
        let page = match self.primary.fetch(url) {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(url, error = %err, "primary fetch failed");
                return None;
            }
        };
        if page.status != Some(200) {
            tracing::debug!(url, status = ?page.status, "primary fetch not OK");
            return None;
        }
        self.extractor.select_title(&page.body, url)
    }

    fn fallback_title(&self, url: &str) -> Option<String> {
        match self.fallback.fetch(url) {
            Ok(page) => self.extractor.embedded_title(&page.body),
            Err(err) => {
                tracing::warn!(url, error = %err, "fallback fetch failed");
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, CellError> {
        Ok(Self {
            client: http::build_client(Some(Duration::from_secs(60)), CellError::PageHttp)?,
        })
    }
}

impl PageFetcher for HttpPageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CellError::PageHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| CellError::PageHttp(err.to_string()))?;
        Ok(FetchedPage {
            status: Some(status),
            body,
        })
    }
}

/// Fetches through the system `curl -L`.
#[derive(Clone)]
pub struct CurlPageFetcher {
    curl: Option<PathBuf>,
}

impl CurlPageFetcher {
    pub fn new() -> Self {
        Self {
            curl: find_in_path("curl"),
        }
    }
}

impl Default for CurlPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFetcher for CurlPageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        let curl = self
            .curl
            .as_ref()
            .ok_or_else(|| CellError::MissingTool("curl".to_string()))?;
        let output = Command::new(curl)
            .args(["-s", "-L", url])
            .output()
            .map_err(|err| CellError::PageHttp(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CellError::PageHttp(format!(
                "curl exited with {}: {stderr}",
                output.status
            )));
        }
        Ok(FetchedPage {
            status: None,
            body: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

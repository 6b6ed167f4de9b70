use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::EutilsSettings;
use crate::domain::Pmid;
use crate::error::CellError;
use crate::http;
use crate::throttle::Throttle;

const PUBMED: &str = "pubmed";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub count: u64,
    pub ids: Vec<String>,
}

pub trait EutilsClient: Send + Sync {
    /// Exact title-field search in PubMed.
    fn search_title(&self, title: &str) -> Result<SearchResult, CellError>;
    /// `ArticleTitle` of one PubMed record.
    fn fetch_title(&self, pmid: &Pmid) -> Result<Option<String>, CellError>;
}

/// Picks the PMID for a publication title.
///
/// With several hits, the record whose PubMed title is the query title
/// plus a trailing period wins (publisher pages drop the period PubMed
/// keeps); otherwise the first hit is used.
pub fn resolve_pmid<E: EutilsClient + ?Sized>(client: &E, title: &str) -> Option<Pmid> {
    tracing::info!(title, "getting PMID for title");

    let result = match client.search_title(title) {
        Ok(result) => result,
        Err(CellError::EutilsStatus { status: 429, .. }) => {
            tracing::error!(
                title,
                "too many requests to NCBI API; try again later, or set NCBI_API_KEY"
            );
            return None;
        }
        Err(err) => {
            tracing::error!(title, error = %err, "encountered error in searching PubMed");
            return None;
        }
    };

    let candidates = result
        .ids
        .iter()
        .filter_map(|id| match id.parse::<Pmid>() {
            Ok(pmid) => Some(pmid),
            Err(_) => {
                tracing::warn!(id, "ignoring malformed PubMed id");
                None
            }
        })
        .collect::<Vec<_>>();
    let Some(first) = candidates.first().cloned() else {
        tracing::warn!(title, "PubMed returned no results for title");
        return None;
    };

    if result.count > 1 {
        tracing::warn!(title, count = result.count, "PubMed returned more than one result");
        let expected = format!("{title}.");
        for pmid in &candidates {
            match client.fetch_title(pmid) {
                Ok(Some(candidate)) if candidate == expected => {
                    tracing::info!(%pmid, title, "found PMID");
                    return Some(pmid.clone());
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%pmid, error = %err, "encountered error in fetching from PubMed");
                }
            }
        }
        tracing::info!(pmid = %first, title, "using first PMID");
    } else {
        tracing::info!(pmid = %first, title, "found PMID");
    }
    Some(first)
}

#[derive(Debug, Deserialize)]
struct EsearchResponse {
    esearchresult: EsearchResult,
}

#[derive(Debug, Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
}

pub fn parse_esearch(body: &str) -> Result<SearchResult, CellError> {
    let response: EsearchResponse = serde_json::from_str(body)
        .map_err(|err| CellError::EutilsHttp(format!("invalid esearch JSON: {err}")))?;
    let ids = response.esearchresult.idlist;
    let count = match response.esearchresult.count {
        Some(count) => count
            .trim()
            .parse()
            .map_err(|_| CellError::EutilsHttp(format!("invalid esearch count: {count}")))?,
        None => ids.len() as u64,
    };
    Ok(SearchResult { count, ids })
}

/// Text of the first `ArticleTitle`, inline markup flattened.
pub fn parse_article_title(xml: &str) -> Result<Option<String>, CellError> {
    let mut reader = Reader::from_str(xml);
    let mut in_title = false;
    let mut title = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"ArticleTitle" => in_title = true,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"ArticleTitle" => {
                return Ok(Some(title.trim().to_string()));
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"ArticleTitle" => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Text(ref e)) if in_title => {
                let text = e
                    .unescape()
                    .map_err(|err| CellError::EutilsHttp(format!("invalid efetch XML: {err}")))?;
                title.push_str(&text);
            }
            Ok(Event::CData(ref e)) if in_title => {
                title.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(err) => {
                return Err(CellError::EutilsHttp(format!("invalid efetch XML: {err}")));
            }
        }
    }
}

pub struct EutilsHttpClient {
    client: Client,
    settings: EutilsSettings,
    throttle: Throttle,
    retries: usize,
}

impl EutilsHttpClient {
    pub fn new(settings: EutilsSettings, retries: usize) -> Result<Self, CellError> {
        let client = http::build_client(Some(Duration::from_secs(60)), CellError::EutilsHttp)?;
        let throttle = Throttle::new(settings.interval);
        Ok(Self {
            client,
            settings,
            throttle,
            retries,
        })
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(email) = &self.settings.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.settings.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    fn get_text(
        &self,
        endpoint: &str,
        params: &[(&'static str, String)],
    ) -> Result<String, CellError> {
        let url = format!("{}/{endpoint}", self.settings.base_url.trim_end_matches('/'));
        let response = http::send_with_retries(
            self.retries,
            || {
                self.throttle.wait();
                self.client.get(&url).query(params)
            },
            CellError::EutilsHttp,
        )?;
        if !response.status().is_success() {
            let (status, message) = http::status_message(response, "E-utilities request failed");
            return Err(CellError::EutilsStatus { status, message });
        }
        response
            .text()
            .map_err(|err| CellError::EutilsHttp(err.to_string()))
    }
}

impl EutilsClient for EutilsHttpClient {
    fn search_title(&self, title: &str) -> Result<SearchResult, CellError> {
        let mut params = vec![
            ("db", PUBMED.to_string()),
            ("term", title.to_string()),
            ("field", "title".to_string()),
            ("retmode", "json".to_string()),
        ];
        params.extend(self.common_params());
        let body = self.get_text("esearch.fcgi", &params)?;
        parse_esearch(&body)
    }

    fn fetch_title(&self, pmid: &Pmid) -> Result<Option<String>, CellError> {
        let mut params = vec![
            ("db", PUBMED.to_string()),
            ("id", pmid.to_string()),
            ("rettype", "xml".to_string()),
        ];
        params.extend(self.common_params());
        let body = self.get_text("efetch.fcgi", &params)?;
        parse_article_title(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esearch_count_is_a_string() {
        let body = r#"{"header":{"type":"esearch"},"esearchresult":{"count":"2","retmax":"2","idlist":["111","222"]}}"#;
        let result = parse_esearch(body).unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.ids, vec!["111", "222"]);
    }

    #[test]
    fn article_title_flattens_markup() {
        let xml = r#"<?xml version="1.0"?>
<PubmedArticleSet><PubmedArticle><MedlineCitation>
<PMID Version="1">111</PMID>
<Article><ArticleTitle>Single-cell atlas of <i>human</i> lung &amp; airway.</ArticleTitle></Article>
</MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        assert_eq!(
            parse_article_title(xml).unwrap(),
            Some("Single-cell atlas of human lung & airway.".to_string())
        );
    }

    #[test]
    fn missing_article_title() {
        assert_eq!(
            parse_article_title("<PubmedArticleSet></PubmedArticleSet>").unwrap(),
            None
        );
    }
}

//! PubMed client over NCBI E-utilities
//!
//! One search is two requests:
//! - `esearch` (JSON) for the relevance-ordered PMID page and hit count
//! - `efetch` (XML) for titles and abstracts of that page

use super::{Document, DocumentSet, LiteratureSource};
use crate::config::PubMedConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// PubMed literature source
pub struct PubMedSource {
    client: reqwest::Client,
    base_url: String,
    email: String,
    tool: String,
    api_key: Option<String>,
    page_size: usize,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ESearchEnvelope {
    esearchresult: ESearchResult,
}

#[derive(Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

impl PubMedSource {
    /// Create a new PubMed client
    pub fn new(config: &PubMedConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", config.tool, crate::VERSION))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            tool: config.tool.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            page_size: config.page_size,
            timeout,
        })
    }

    /// Parameters NCBI expects on every call
    fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("email", self.email.clone()),
            ("tool", self.tool.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn get(&self, utility: &str, params: &[(&str, String)]) -> Result<String> {
        let url = format!("{}/{}", self.base_url, utility);
        debug!(url = %url, "Sending E-utilities request");

        let response = self.client
            .get(&url)
            .query(params)
            .query(&self.identity_params())
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::LiteratureSource {
                message: format!("{} returned {}", utility, status),
            });
        }

        response.text().await.map_err(|e| self.send_error(e))
    }

    fn send_error(&self, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            AppError::SourceTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::LiteratureSource {
                message: format!("Request failed: {}", err),
            }
        }
    }

    /// Relevance-ordered PMIDs and the total hit count
    async fn esearch(&self, query: &str) -> Result<(Vec<String>, Option<u64>)> {
        let params = [
            ("db", "pubmed".to_string()),
            ("term", query.to_string()),
            ("retmax", self.page_size.to_string()),
            ("retmode", "json".to_string()),
            ("sort", "relevance".to_string()),
        ];
        let body = self.get("esearch.fcgi", &params).await?;
        parse_esearch(&body, self.page_size)
    }

    /// PMID -> document text for the given ids
    async fn efetch(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let params = [
            ("db", "pubmed".to_string()),
            ("id", ids.join(",")),
            ("retmode", "xml".to_string()),
        ];
        let body = self.get("efetch.fcgi", &params).await?;
        parse_efetch(&body)
    }

    async fn run(&self, query: &str) -> Result<DocumentSet> {
        let (ids, total) = self.esearch(query).await?;
        info!(query = %query, pmids = ids.len(), total = ?total, "PubMed esearch complete");

        if ids.is_empty() {
            warn!(query = %query, "No PMIDs found for query");
            return Ok(DocumentSet::new(Vec::new(), total));
        }

        let articles = self.efetch(&ids).await?;
        let documents = DocumentSet::new(pair_documents(&ids, articles), total);
        if documents.len() < ids.len() {
            warn!(
                requested = ids.len(),
                fetched = documents.len(),
                missing = ?missing_ids(&ids, &documents),
                "Some PMIDs returned no article and were dropped"
            );
        }

        Ok(documents)
    }
}

#[async_trait]
impl LiteratureSource for PubMedSource {
    async fn search(&self, query: &str) -> Result<DocumentSet> {
        let start = Instant::now();
        let result = self.run(query).await;
        metrics::record_literature_search(start.elapsed().as_secs_f64(), self.name(), result.is_ok());
        result
    }

    fn name(&self) -> &str {
        "pubmed"
    }
}

/// Parse an esearch JSON body, keeping at most `limit` ids
fn parse_esearch(body: &str, limit: usize) -> Result<(Vec<String>, Option<u64>)> {
    let envelope: ESearchEnvelope = serde_json::from_str(body).map_err(|e| {
        AppError::LiteratureSource {
            message: format!("Malformed esearch response: {}", e),
        }
    })?;
    let result = envelope.esearchresult;

    if let Some(error) = result.error {
        if result.idlist.is_empty() {
            return Err(AppError::LiteratureSource {
                message: format!("esearch error: {}", error),
            });
        }
    }

    let total = result.count.and_then(|c| c.trim().parse::<u64>().ok());
    let mut ids: Vec<String> = result
        .idlist
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    ids.truncate(limit);

    Ok((ids, total))
}

#[derive(Default)]
struct ArticleBuilder {
    pmid: String,
    title: String,
    sections: Vec<String>,
}

impl ArticleBuilder {
    fn render(&self) -> String {
        let title = collapse_whitespace(&self.title);
        let abstract_text = self
            .sections
            .iter()
            .map(|s| collapse_whitespace(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        match (title.is_empty(), abstract_text.is_empty()) {
            (false, false) => format!("{}\n\n{}", title, abstract_text),
            (false, true) => title,
            _ => abstract_text,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Pmid,
    Title,
    Abstract,
}

/// Parse an efetch `PubmedArticleSet` into PMID -> "title\n\nabstract"
fn parse_efetch(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    let mut articles = HashMap::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"PubmedArticle" => current = Some(ArticleBuilder::default()),
                // Only the citation's own PMID; later ones belong to comments/corrections
                b"PMID" if current.as_ref().map_or(false, |a| a.pmid.is_empty()) => {
                    field = Field::Pmid
                }
                b"ArticleTitle" if current.is_some() => field = Field::Title,
                b"AbstractText" => {
                    if let Some(article) = current.as_mut() {
                        let label = e
                            .try_get_attribute("Label")
                            .map_err(quick_xml::Error::from)?
                            .map(|attr| attr.unescape_value().map(|v| v.into_owned()))
                            .transpose()?;
                        article.sections.push(match label {
                            Some(label) if !label.is_empty() => format!("{}: ", label),
                            _ => String::new(),
                        });
                        field = Field::Abstract;
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if field == Field::None {
                    continue;
                }
                let text = t.unescape()?;
                if let Some(article) = current.as_mut() {
                    match field {
                        Field::Pmid => article.pmid.push_str(text.trim()),
                        Field::Title => article.title.push_str(&text),
                        Field::Abstract => {
                            if let Some(section) = article.sections.last_mut() {
                                section.push_str(&text);
                            }
                        }
                        Field::None => {}
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"PMID" | b"ArticleTitle" | b"AbstractText" => field = Field::None,
                b"PubmedArticle" => {
                    if let Some(article) = current.take() {
                        if !article.pmid.is_empty() {
                            let text = article.render();
                            articles.insert(article.pmid, text);
                        }
                    }
                    field = Field::None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(articles)
}

/// Keep esearch order; drop ids without a fetched article
fn pair_documents(ids: &[String], mut articles: HashMap<String, String>) -> Vec<Document> {
    ids.iter()
        .filter_map(|id| articles.remove(id).map(|text| Document::new(id.clone(), text)))
        .collect()
}

/// Requested PMIDs that EFetch did not return
fn missing_ids<'a>(requested: &'a [String], documents: &DocumentSet) -> Vec<&'a str> {
    let fetched = documents.ids();
    requested
        .iter()
        .map(String::as_str)
        .filter(|id| !fetched.contains(id))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

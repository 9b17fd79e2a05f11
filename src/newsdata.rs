// src/newsdata.rs
//! Client for the NewsData crypto news feed, mapped to [`NewsArticle`].

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::cache::FetchError;
use crate::models::NewsArticle;

#[derive(Clone)]
pub struct NewsData {
    client: Client,
    base: String,
    api_key: String,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    results: Vec<RawArticle>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawArticle {
    article_id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source_id: Option<String>,
    link: Option<String>,
    image_url: Option<String>,
}

impl NewsData {
    pub fn new(base: &str, api_key: &str, timeout: Duration) -> Result<NewsData, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(NewsData {
            client,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Latest english crypto news, optionally filtered to one coin.
    pub async fn crypto_news(&self, coin: Option<&str>) -> Result<Vec<NewsArticle>, FetchError> {
        let mut params = vec![
            ("apikey", self.api_key.clone()),
            ("language", "en".to_string()),
        ];
        if let Some(coin) = coin {
            params.push(("coin", coin.to_lowercase()));
        }

        let response = self.client.get(&self.base).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(format!("NewsData returned HTTP {}", response.status()).into());
        }
        let raw: RawResponse = response.json().await?;
        Ok(raw.results.into_iter().map(map_article).collect())
    }
}

fn map_article(raw: RawArticle) -> NewsArticle {
    let title = raw.title.unwrap_or_default();
    // The feed does not always carry a stable id; fall back to link, then title.
    let id = raw
        .article_id
        .or_else(|| raw.link.clone())
        .unwrap_or_else(|| title.clone());
    NewsArticle {
        id,
        summary: raw.description.or(raw.content).unwrap_or_default(),
        title,
        published_at: raw.pub_date,
        source: raw.source_id,
        url: raw.link,
        image_url: raw.image_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_article_with_all_fields() {
        let raw: RawArticle = serde_json::from_value(json!({
            "article_id": "abc123",
            "title": "Bitcoin rallies",
            "description": "Short summary",
            "pubDate": "2024-01-01 12:00:00",
            "source_id": "coindesk",
            "link": "https://example.com/a",
            "image_url": "https://example.com/a.png"
        }))
        .unwrap();
        let article = map_article(raw);
        assert_eq!(article.id, "abc123");
        assert_eq!(article.summary, "Short summary");
        assert_eq!(article.source.as_deref(), Some("coindesk"));
    }

    #[test]
    fn id_falls_back_to_link_then_title() {
        let raw: RawArticle = serde_json::from_value(json!({
            "title": "No id here",
            "link": "https://example.com/b"
        }))
        .unwrap();
        assert_eq!(map_article(raw).id, "https://example.com/b");

        let raw: RawArticle = serde_json::from_value(json!({
            "title": "Only a title"
        }))
        .unwrap();
        assert_eq!(map_article(raw).id, "Only a title");
    }

    #[test]
    fn summary_falls_back_to_content() {
        let raw: RawArticle = serde_json::from_value(json!({
            "title": "t",
            "content": "Full body"
        }))
        .unwrap();
        assert_eq!(map_article(raw).summary, "Full body");
    }

    #[test]
    fn empty_results_parse() {
        let raw: RawResponse = serde_json::from_value(json!({"status": "success"})).unwrap();
        assert!(raw.results.is_empty());
    }
}

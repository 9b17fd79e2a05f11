// src/coingecko.rs
//! Client for the CoinGecko market-data API. Maps raw provider JSON into
//! the internal shapes; callers decide caching.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::cache::FetchError;
use crate::models::{ChartPoint, MarketCoin};

#[derive(Clone)]
pub struct CoinGecko {
    client: Client,
    base: String,
}

#[derive(Deserialize)]
struct RawMarket {
    id: String,
    symbol: String,
    name: String,
    image: Option<String>,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    price_change_percentage_7d_in_currency: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
}

#[derive(Deserialize)]
struct RawMarketChart {
    #[serde(default)]
    prices: Vec<(i64, f64)>,
}

impl CoinGecko {
    pub fn new(base: &str, timeout: Duration) -> Result<CoinGecko, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(CoinGecko {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base, path);
        let response = self.client.get(&url).query(params).send().await?;
        if !response.status().is_success() {
            return Err(format!("CoinGecko returned HTTP {} for {}", response.status(), path).into());
        }
        Ok(response.json().await?)
    }

    /// Raw `/simple/price` payload for one or more coin ids, usd plus 24h
    /// change, passed through untouched.
    pub async fn simple_price(&self, ids: &str) -> Result<Value, FetchError> {
        self.get_json(
            "/simple/price",
            &[
                ("ids", ids),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
            ],
        )
        .await
    }

    /// Current usd price of a single coin id.
    pub async fn simple_price_usd(&self, id: &str) -> Result<f64, FetchError> {
        let data = self
            .get_json(
                "/simple/price",
                &[("ids", id), ("vs_currencies", "usd")],
            )
            .await?;
        data.get(id)
            .and_then(|coin| coin.get("usd"))
            .and_then(Value::as_f64)
            .ok_or_else(|| format!("No price for {}", id).into())
    }

    /// Market rows for a comma-separated list of coin ids.
    pub async fn markets(&self, ids: &str) -> Result<Vec<MarketCoin>, FetchError> {
        let per_page = ids.split(',').count().max(1).to_string();
        let data = self
            .get_json(
                "/coins/markets",
                &[
                    ("vs_currency", "usd"),
                    ("ids", ids),
                    ("order", "market_cap_desc"),
                    ("per_page", &per_page),
                    ("page", "1"),
                    ("price_change_percentage", "24h,7d"),
                ],
            )
            .await?;
        let raw: Vec<RawMarket> = serde_json::from_value(data)?;
        Ok(raw.into_iter().map(map_market).collect())
    }

    /// Price chart for a coin id over the last `days` days.
    pub async fn market_chart(&self, id: &str, days: u32) -> Result<Vec<ChartPoint>, FetchError> {
        let days = days.to_string();
        let data = self
            .get_json(
                &format!("/coins/{}/market_chart", id),
                &[("vs_currency", "usd"), ("days", &days)],
            )
            .await?;
        let chart: RawMarketChart = serde_json::from_value(data)?;
        Ok(chart
            .prices
            .into_iter()
            .map(|(ts, price)| ChartPoint { ts, price })
            .collect())
    }
}

fn map_market(raw: RawMarket) -> MarketCoin {
    MarketCoin {
        id: raw.id,
        symbol: raw.symbol.to_uppercase(),
        name: raw.name,
        image: raw.image,
        current_price: raw.current_price,
        change_24h: raw.price_change_percentage_24h,
        change_7d: raw.price_change_percentage_7d_in_currency,
        market_cap: raw.market_cap,
        volume_24h: raw.total_volume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_market_row_fields() {
        let raw: RawMarket = serde_json::from_value(serde_json::json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "image": "https://example.com/btc.png",
            "current_price": 42000.0,
            "price_change_percentage_24h": -1.5,
            "price_change_percentage_7d_in_currency": 3.2,
            "market_cap": 800_000_000_000.0,
            "total_volume": 20_000_000_000.0
        }))
        .unwrap();
        let coin = map_market(raw);
        assert_eq!(coin.symbol, "BTC");
        assert_eq!(coin.change_24h, Some(-1.5));
        assert_eq!(coin.volume_24h, Some(20_000_000_000.0));
    }

    #[test]
    fn market_row_tolerates_missing_fields() {
        let raw: RawMarket = serde_json::from_value(serde_json::json!({
            "id": "dogecoin",
            "symbol": "doge",
            "name": "Dogecoin"
        }))
        .unwrap();
        let coin = map_market(raw);
        assert_eq!(coin.current_price, None);
        assert_eq!(coin.market_cap, None);
    }

    #[test]
    fn chart_points_from_pairs() {
        let chart: RawMarketChart = serde_json::from_value(serde_json::json!({
            "prices": [[1700000000000i64, 42000.0], [1700000060000i64, 42100.0]]
        }))
        .unwrap();
        assert_eq!(chart.prices.len(), 2);
        assert_eq!(chart.prices[1].0, 1700000060000);
    }
}

// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(rename = "isVerified")]
    pub is_verified: bool,
    #[serde(rename = "balanceUSD")]
    pub balance_usd: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One immutable ledger entry. Created on trade execution, never mutated.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Trade {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    #[serde(rename = "priceUSD")]
    pub price_usd: f64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Net holding per symbol, derived by folding the trade ledger. Not persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub total_cost_usd: f64,
}

/// A position combined with a live price.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ValuedPosition {
    pub symbol: String,
    pub quantity: f64,
    pub avg_buy_price: f64,
    pub price_now: f64,
    pub current_value: f64,
    pub profit_loss: f64,
}

#[derive(Serialize, Clone, Debug)]
pub struct Overview {
    #[serde(rename = "balanceUSD")]
    pub balance_usd: f64,
    #[serde(rename = "portfolioValueUSD")]
    pub portfolio_value_usd: f64,
    #[serde(rename = "totalAssetUSD")]
    pub total_asset_usd: f64,
    #[serde(rename = "totalProfitLossUSD")]
    pub total_profit_loss_usd: f64,
}

/// Market row mapped from the upstream markets endpoint.
#[derive(Serialize, Clone, Debug)]
pub struct MarketCoin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: Option<String>,
    #[serde(rename = "currentPrice")]
    pub current_price: Option<f64>,
    #[serde(rename = "change24h")]
    pub change_24h: Option<f64>,
    #[serde(rename = "change7d")]
    pub change_7d: Option<f64>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
    #[serde(rename = "volume24h")]
    pub volume_24h: Option<f64>,
}

/// News item mapped from the upstream news feed.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published_at: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

/// One sample of a price chart: millisecond timestamp and price.
#[derive(Serialize, Clone, Debug)]
pub struct ChartPoint {
    pub ts: i64,
    pub price: f64,
}

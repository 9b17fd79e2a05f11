// src/api.rs
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use scylla::Session;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;
use warp::{Filter, Rejection, Reply};

use crate::auth;
use crate::cache::{Cache, FetchError};
use crate::coingecko::CoinGecko;
use crate::config::Config;
use crate::db;
use crate::error::ApiError;
use crate::ledger::{self, TradeRejection};
use crate::mailer;
use crate::models::{Position, Side, Trade, User};
use crate::newsdata::NewsData;
use crate::symbols;

const DEFAULT_COINS: &str = "bitcoin,ethereum,solana";

/// Everything the handlers need, injected through the filters. The cache is
/// owned here rather than living in module globals.
pub struct AppState {
    pub session: Arc<Session>,
    pub config: Config,
    pub cache: Cache,
    pub coingecko: CoinGecko,
    pub newsdata: NewsData,
    // Serialises trade execution per user (read balance -> admit -> write).
    trade_locks: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AppState {
    pub fn new(session: Arc<Session>, config: Config) -> Result<AppState, FetchError> {
        let coingecko = CoinGecko::new(&config.coingecko_base, config.upstream_timeout)?;
        let newsdata = NewsData::new(
            &config.newsdata_base,
            &config.newsdata_api_key,
            config.upstream_timeout,
        )?;
        Ok(AppState {
            session,
            config,
            cache: Cache::new(),
            coingecko,
            newsdata,
            trade_locks: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    async fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.trade_locks.lock().await;
        locks.entry(user_id.to_string()).or_default().clone()
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct TradeRequest {
    symbol: String,
    side: String,
    quantity: f64,
}

#[derive(Deserialize)]
struct CoinsQuery {
    coins: Option<String>,
    // Accepted alias for the same list.
    symbols: Option<String>,
}

impl CoinsQuery {
    fn ids(&self) -> String {
        normalize_ids(self.coins.as_deref().or(self.symbols.as_deref()))
    }
}

#[derive(Deserialize)]
struct NewsQuery {
    coin: Option<String>,
}

#[derive(Deserialize)]
struct MarketQuery {
    coin: Option<String>,
    range: Option<String>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let secret = state.config.jwt_secret.clone();

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(health_handler);

    let register = warp::path!("auth" / "register")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(register_handler);

    let verify = warp::path!("auth" / "verify" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(verify_handler);

    let login = warp::path!("auth" / "login")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(login_handler);

    let me = warp::path!("auth" / "me")
        .and(warp::get())
        .and(with_auth(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(me_handler);

    let prices = warp::path("prices")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<CoinsQuery>())
        .and(with_state(state.clone()))
        .and_then(prices_handler);

    let news = warp::path("news")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<NewsQuery>())
        .and(with_state(state.clone()))
        .and_then(news_handler);

    let news_by_symbol = warp::path!("news" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(news_by_symbol_handler);

    let market = warp::path("market")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<MarketQuery>())
        .and(with_state(state.clone()))
        .and_then(market_handler);

    let compare = warp::path("compare")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_auth(secret.clone()))
        .and(warp::query::<CoinsQuery>())
        .and(with_state(state.clone()))
        .and_then(compare_handler);

    let overview = warp::path("overview")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_auth(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(overview_handler);

    let trade = warp::path("trade")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_auth(secret.clone()))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(trade_handler);

    let history = warp::path!("trade" / "history")
        .and(warp::get())
        .and(with_auth(secret.clone()))
        .and(with_state(state.clone()))
        .and_then(history_handler);

    let portfolio = warp::path!("trade" / "portfolio")
        .and(warp::get())
        .and(with_auth(secret))
        .and(with_state(state))
        .and_then(portfolio_handler);

    health
        .or(register)
        .or(verify)
        .or(login)
        .or(me)
        .or(prices)
        .or(news)
        .or(news_by_symbol)
        .or(market)
        .or(compare)
        .or(overview)
        .or(trade)
        .or(history)
        .or(portfolio)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Require a `Bearer` token and extract the user id it was issued for.
fn with_auth(
    secret: String,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let secret = secret.clone();
        async move {
            let token = header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty());
            match token {
                None => Err(ApiError::unauthorized("No token provided").reject()),
                Some(token) => auth::verify_token(token, &secret)
                    .map_err(|_| ApiError::unauthorized("Invalid or expired token").reject()),
            }
        }
    })
}

async fn health_handler() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&json!({
        "ok": true,
        "message": "API is running"
    })))
}

async fn register_handler(
    req: RegisterRequest,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("Valid email is required").reject());
    }
    if req.password.len() < 6 {
        return Err(ApiError::bad_request("Password must be at least 6 characters").reject());
    }

    let existing = db::find_user_by_email(&state.session, &email)
        .await
        .map_err(server_error)?;
    if existing.is_some() {
        return Err(ApiError::conflict("Email already registered").reject());
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.clone(),
        password_hash: auth::hash_password(&req.password),
        is_verified: false,
        balance_usd: crate::config::STARTING_BALANCE_USD,
    };
    db::insert_user(&state.session, &user)
        .await
        .map_err(server_error)?;

    // One-day token just for the verification link.
    let token = auth::create_token(&user.id, &state.config.jwt_secret, 1)
        .map_err(|e| server_error(e.into()))?;
    let verify_link = format!("{}/auth/verify/{}", state.config.api_url, token);
    mailer::send_verification(&email, &verify_link);

    info!("Registered user {}", email);
    Ok(warp::reply::json(&json!({
        "ok": true,
        "message": "Registration successful, check your email to verify your account."
    })))
}

async fn verify_handler(token: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let user_id = auth::verify_token(&token, &state.config.jwt_secret)
        .map_err(|_| ApiError::bad_request("Invalid or expired token").reject())?;
    db::set_verified(&state.session, &user_id)
        .await
        .map_err(server_error)?;

    info!("Verified user {}", user_id);
    Ok(warp::reply::json(&json!({
        "ok": true,
        "message": "Account verified. You can now log in."
    })))
}

async fn login_handler(req: LoginRequest, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let email = req.email.trim().to_lowercase();
    let user = db::find_user_by_email(&state.session, &email)
        .await
        .map_err(server_error)?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password").reject())?;

    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid email or password").reject());
    }
    if !user.is_verified {
        return Err(ApiError::forbidden("Email not verified").reject());
    }

    let token = auth::create_token(&user.id, &state.config.jwt_secret, 7)
        .map_err(|e| server_error(e.into()))?;
    Ok(warp::reply::json(&json!({
        "ok": true,
        "token": token,
        "user": {
            "email": user.email,
            "balanceUSD": user.balance_usd,
            "isVerified": user.is_verified,
        }
    })))
}

async fn me_handler(user_id: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let user = db::find_user_by_id(&state.session, &user_id)
        .await
        .map_err(server_error)?
        .ok_or_else(|| ApiError::not_found("User not found").reject())?;
    Ok(warp::reply::json(&json!({ "ok": true, "user": user })))
}

async fn prices_handler(
    query: CoinsQuery,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let ids = query.ids();
    let key = format!("prices:{}", ids);
    let coingecko = state.coingecko.clone();
    let fetch_ids = ids.clone();

    let cached = state
        .cache
        .get_or_fetch(&key, state.config.prices_ttl, || async move {
            coingecko.simple_price(&fetch_ids).await
        })
        .await
        .map_err(|e| upstream_error("Failed to get prices", e))?;

    Ok(warp::reply::json(&json!({
        "ok": true,
        "stale": cached.stale,
        "prices": cached.payload,
    })))
}

async fn news_handler(query: NewsQuery, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    serve_news(query.coin, state).await
}

async fn news_by_symbol_handler(
    symbol: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    serve_news(Some(symbol), state).await
}

async fn serve_news(coin: Option<String>, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let coin = coin
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());
    let key = match &coin {
        Some(c) => format!("news:{}", c.to_uppercase()),
        None => "news:all".to_string(),
    };

    let newsdata = state.newsdata.clone();
    let fetch_coin = coin.clone();
    let cached = state
        .cache
        .get_or_fetch(&key, state.config.news_ttl, || async move {
            let articles = newsdata.crypto_news(fetch_coin.as_deref()).await?;
            Ok(serde_json::to_value(articles)?)
        })
        .await
        .map_err(|e| upstream_error("Unable to load news right now", e))?;

    let total = cached.payload.as_array().map(|a| a.len()).unwrap_or(0);
    let mut body = json!({
        "ok": true,
        "stale": cached.stale,
        "total": total,
        "articles": cached.payload,
    });
    if let Some(c) = coin {
        body["coin"] = json!(c);
    }
    Ok(warp::reply::json(&body))
}

fn map_range_to_days(range: &str) -> Option<u32> {
    match range {
        "1D" => Some(1),
        "1W" => Some(7),
        "1M" => Some(30),
        _ => None,
    }
}

async fn market_handler(
    query: MarketQuery,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let coin = query
        .coin
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "bitcoin".to_string());
    let range = query
        .range
        .map(|r| r.trim().to_uppercase())
        .unwrap_or_else(|| "1D".to_string());
    let days = map_range_to_days(&range)
        .ok_or_else(|| ApiError::bad_request("Invalid range. Use 1D, 1W, or 1M.").reject())?;

    let key = format!("market:{}:{}", coin, range);
    let coingecko = state.coingecko.clone();
    let fetch_coin = coin.clone();
    let cached = state
        .cache
        .get_or_fetch(&key, state.config.market_ttl, || async move {
            let points = coingecko.market_chart(&fetch_coin, days).await?;
            Ok(serde_json::to_value(points)?)
        })
        .await
        .map_err(|e| upstream_error("Failed to fetch price history", e))?;

    Ok(warp::reply::json(&json!({
        "ok": true,
        "coin": coin,
        "range": range,
        "stale": cached.stale,
        "points": cached.payload,
    })))
}

async fn compare_handler(
    _user_id: String,
    query: CoinsQuery,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let ids = query.ids();
    let key = format!("compare:{}", ids);
    let coingecko = state.coingecko.clone();
    let fetch_ids = ids.clone();

    let cached = state
        .cache
        .get_or_fetch(&key, state.config.prices_ttl, || async move {
            let coins = coingecko.markets(&fetch_ids).await?;
            Ok(serde_json::to_value(coins)?)
        })
        .await
        .map_err(|e| upstream_error("Failed to fetch comparison data", e))?;

    Ok(warp::reply::json(&json!({
        "ok": true,
        "stale": cached.stale,
        "coins": cached.payload,
    })))
}

async fn overview_handler(user_id: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let user = db::find_user_by_id(&state.session, &user_id)
        .await
        .map_err(server_error)?
        .ok_or_else(|| ApiError::not_found("User not found").reject())?;
    let trades = db::trades_for_user(&state.session, &user_id)
        .await
        .map_err(server_error)?;

    let positions = ledger::fold_positions(&trades);
    let prices = price_map(&state, &positions).await;
    let overview = ledger::overview(user.balance_usd, &positions, &prices);

    Ok(warp::reply::json(&json!({ "ok": true, "overview": overview })))
}

async fn trade_handler(
    user_id: String,
    req: TradeRequest,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = req.symbol.trim().to_uppercase();
    if symbol.is_empty() || !req.quantity.is_finite() || req.quantity <= 0.0 {
        return Err(ApiError::bad_request("Invalid trade data").reject());
    }
    let side = Side::parse(&req.side.to_uppercase())
        .ok_or_else(|| ApiError::bad_request("Side must be BUY or SELL").reject())?;
    let coin_id = symbols::to_coin_id(&symbol)
        .ok_or_else(|| ApiError::bad_request("Unsupported symbol").reject())?;

    // Hold the per-user lock across read-admit-write so two concurrent
    // trades cannot race on the balance.
    let lock = state.user_lock(&user_id).await;
    let _guard = lock.lock().await;

    let user = db::find_user_by_id(&state.session, &user_id)
        .await
        .map_err(server_error)?
        .ok_or_else(|| ApiError::not_found("User not found").reject())?;

    // Live price, deliberately uncached: executions settle at the current quote.
    let price_usd = state
        .coingecko
        .simple_price_usd(coin_id)
        .await
        .map_err(|e| upstream_error("Failed to fetch live price", e))?;

    let trades = db::trades_for_user(&state.session, &user_id)
        .await
        .map_err(server_error)?;
    let net_qty = ledger::net_quantity(&trades, &symbol);

    let new_balance = ledger::admit_trade(side, req.quantity, price_usd, user.balance_usd, net_qty)
        .map_err(|rejection| match rejection {
            TradeRejection::InsufficientBalance => {
                ApiError::bad_request("Insufficient balance").reject()
            }
            TradeRejection::InsufficientHolding(held) => ApiError::bad_request(format!(
                "Not enough {} to sell. Current qty: {}",
                symbol, held
            ))
            .reject(),
        })?;

    let trade = Trade {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.clone(),
        symbol: symbol.clone(),
        side,
        quantity: req.quantity,
        price_usd,
        created_at: Utc::now(),
    };
    db::insert_trade(&state.session, &trade)
        .await
        .map_err(server_error)?;
    db::update_balance(&state.session, &user_id, new_balance)
        .await
        .map_err(server_error)?;

    info!(
        "Executed {} {} {} @ {} for user {}",
        side.as_str(),
        req.quantity,
        symbol,
        price_usd,
        user_id
    );
    Ok(warp::reply::json(&json!({
        "ok": true,
        "message": "Trade executed",
        "trade": trade,
        "balanceUSD": new_balance,
    })))
}

async fn history_handler(user_id: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let mut trades = db::trades_for_user(&state.session, &user_id)
        .await
        .map_err(server_error)?;
    // Stored oldest-first for folding; history reads newest-first.
    trades.reverse();
    Ok(warp::reply::json(&json!({ "ok": true, "trades": trades })))
}

async fn portfolio_handler(
    user_id: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let trades = db::trades_for_user(&state.session, &user_id)
        .await
        .map_err(server_error)?;
    let positions = ledger::fold_positions(&trades);
    let prices = price_map(&state, &positions).await;
    let valued = ledger::value_positions(&positions, &prices);
    Ok(warp::reply::json(&json!({ "ok": true, "positions": valued })))
}

/// Current usd price per held symbol, through the cache. Symbols that cannot
/// be resolved or priced are left out; their trades stay in history.
async fn price_map(state: &Arc<AppState>, positions: &[Position]) -> HashMap<String, f64> {
    let mut prices = HashMap::new();
    for pos in positions.iter().filter(|p| p.quantity > 0.0) {
        let coin_id = match symbols::to_coin_id(&pos.symbol) {
            Some(id) => id,
            None => continue,
        };
        let coingecko = state.coingecko.clone();
        let key = format!("price:{}", coin_id);
        let result = state
            .cache
            .get_or_fetch(&key, state.config.prices_ttl, || async move {
                let price = coingecko.simple_price_usd(coin_id).await?;
                Ok(Value::from(price))
            })
            .await;
        match result {
            Ok(cached) => {
                if let Some(price) = cached.payload.as_f64() {
                    prices.insert(pos.symbol.clone(), price);
                }
            }
            Err(e) => warn!("Skipping valuation for {}: {}", pos.symbol, e),
        }
    }
    prices
}

fn normalize_ids(coins: Option<&str>) -> String {
    let raw = coins.unwrap_or(DEFAULT_COINS);
    let ids: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if ids.is_empty() {
        DEFAULT_COINS.to_string()
    } else {
        ids.join(",").to_lowercase()
    }
}

fn server_error(e: FetchError) -> Rejection {
    error!("Store error: {}", e);
    ApiError::internal("Server error").reject()
}

fn upstream_error(message: &str, e: FetchError) -> Rejection {
    error!("{}: {}", message, e);
    ApiError::upstream(message).reject()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::handle_rejection;

    #[test]
    fn range_mapping() {
        assert_eq!(map_range_to_days("1D"), Some(1));
        assert_eq!(map_range_to_days("1W"), Some(7));
        assert_eq!(map_range_to_days("1M"), Some(30));
        assert_eq!(map_range_to_days("1Y"), None);
        assert_eq!(map_range_to_days(""), None);
    }

    #[test]
    fn coin_id_normalization() {
        assert_eq!(normalize_ids(None), DEFAULT_COINS);
        assert_eq!(normalize_ids(Some(" Bitcoin , ethereum ")), "bitcoin,ethereum");
        assert_eq!(normalize_ids(Some(",, ,")), DEFAULT_COINS);
    }

    #[test]
    fn symbols_param_is_an_alias_for_coins() {
        let query = CoinsQuery {
            coins: None,
            symbols: Some("bitcoin,solana".to_string()),
        };
        assert_eq!(query.ids(), "bitcoin,solana");

        let query = CoinsQuery {
            coins: Some("ethereum".to_string()),
            symbols: Some("bitcoin".to_string()),
        };
        assert_eq!(query.ids(), "ethereum");
    }

    #[tokio::test]
    async fn health_replies_with_envelope() {
        let route = warp::path("health")
            .and(warp::get())
            .and_then(health_handler);
        let resp = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&route)
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["message"], json!("API is running"));
    }

    #[tokio::test]
    async fn missing_token_is_rejected_with_401() {
        let route = warp::path("guarded")
            .and(warp::get())
            .and(with_auth("secret".to_string()))
            .and_then(|user_id: String| async move {
                Ok::<_, Rejection>(warp::reply::json(&json!({ "ok": true, "user": user_id })))
            })
            .recover(handle_rejection);

        let resp = warp::test::request()
            .method("GET")
            .path("/guarded")
            .reply(&route)
            .await;
        assert_eq!(resp.status(), 401);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["message"], json!("No token provided"));
    }

    #[tokio::test]
    async fn valid_token_passes_auth() {
        let token = crate::auth::create_token("user-9", "secret", 1).unwrap();
        let route = warp::path("guarded")
            .and(warp::get())
            .and(with_auth("secret".to_string()))
            .and_then(|user_id: String| async move {
                Ok::<_, Rejection>(warp::reply::json(&json!({ "ok": true, "user": user_id })))
            })
            .recover(handle_rejection);

        let resp = warp::test::request()
            .method("GET")
            .path("/guarded")
            .header("authorization", format!("Bearer {}", token))
            .reply(&route)
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["user"], json!("user-9"));
    }
}

// src/db.rs
use chrono::{DateTime, Utc};
use log::{error, info};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{query::Query, Session, SessionBuilder};

use crate::models::{Side, Trade, User};

type DbError = Box<dyn std::error::Error + Send + Sync>;

pub async fn init(node: &str) -> Result<Session, Box<dyn std::error::Error>> {
    let session = SessionBuilder::new().known_node(node).build().await?;

    session.query("CREATE KEYSPACE IF NOT EXISTS cryptofeed WITH REPLICATION = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[]).await?;
    session.query("CREATE TABLE IF NOT EXISTS cryptofeed.users (id TEXT PRIMARY KEY, email TEXT, password_hash TEXT, is_verified BOOLEAN, balance_usd DOUBLE)", &[]).await?;
    session
        .query(
            "CREATE INDEX IF NOT EXISTS users_email_idx ON cryptofeed.users (email)",
            &[],
        )
        .await?;
    // Clustered ascending so a user's trades come back in ledger-fold order.
    session.query("CREATE TABLE IF NOT EXISTS cryptofeed.trades (user_id TEXT, created_at TIMESTAMP, id TEXT, symbol TEXT, side TEXT, quantity DOUBLE, price_usd DOUBLE, PRIMARY KEY (user_id, created_at, id)) WITH CLUSTERING ORDER BY (created_at ASC, id ASC)", &[]).await?;

    info!("Successfully connected to ScyllaDB.");
    Ok(session)
}

pub async fn insert_user(session: &Session, user: &User) -> Result<(), DbError> {
    let query = Query::new("INSERT INTO cryptofeed.users (id, email, password_hash, is_verified, balance_usd) VALUES (?, ?, ?, ?, ?)");
    session
        .query(
            query,
            (
                user.id.clone(),
                user.email.clone(),
                user.password_hash.clone(),
                user.is_verified,
                user.balance_usd,
            ),
        )
        .await?;
    Ok(())
}

pub async fn find_user_by_email(
    session: &Session,
    email: &str,
) -> Result<Option<User>, DbError> {
    let query = Query::new("SELECT id, email, password_hash, is_verified, balance_usd FROM cryptofeed.users WHERE email = ?");
    let result = session.query(query, (email,)).await?;
    Ok(result
        .rows
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(user_from_row))
}

pub async fn find_user_by_id(session: &Session, id: &str) -> Result<Option<User>, DbError> {
    let query = Query::new("SELECT id, email, password_hash, is_verified, balance_usd FROM cryptofeed.users WHERE id = ?");
    let result = session.query(query, (id,)).await?;
    Ok(result
        .rows
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(user_from_row))
}

pub async fn set_verified(session: &Session, id: &str) -> Result<(), DbError> {
    let query = Query::new("UPDATE cryptofeed.users SET is_verified = true WHERE id = ?");
    session.query(query, (id,)).await?;
    Ok(())
}

pub async fn update_balance(
    session: &Session,
    id: &str,
    balance_usd: f64,
) -> Result<(), DbError> {
    let query = Query::new("UPDATE cryptofeed.users SET balance_usd = ? WHERE id = ?");
    session.query(query, (balance_usd, id)).await?;
    Ok(())
}

pub async fn insert_trade(session: &Session, trade: &Trade) -> Result<(), DbError> {
    let query = Query::new("INSERT INTO cryptofeed.trades (user_id, created_at, id, symbol, side, quantity, price_usd) VALUES (?, ?, ?, ?, ?, ?, ?)");
    session
        .query(
            query,
            (
                trade.user_id.clone(),
                trade.created_at.timestamp_millis(),
                trade.id.clone(),
                trade.symbol.clone(),
                trade.side.as_str(),
                trade.quantity,
                trade.price_usd,
            ),
        )
        .await?;
    Ok(())
}

/// All trades for one user, oldest first (clustering order).
pub async fn trades_for_user(session: &Session, user_id: &str) -> Result<Vec<Trade>, DbError> {
    let query = Query::new("SELECT user_id, created_at, id, symbol, side, quantity, price_usd FROM cryptofeed.trades WHERE user_id = ?");
    let result = session.query(query, (user_id,)).await?;
    let trades = result
        .rows
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let trade = trade_from_row(&row);
            if trade.is_none() {
                error!("Skipping malformed trade row: {:?}", row);
            }
            trade
        })
        .collect();
    Ok(trades)
}

fn text_column(row: &Row, index: usize) -> Option<String> {
    row.columns
        .get(index)?
        .as_ref()?
        .as_text()
        .map(|s| s.to_string())
}

fn double_column(row: &Row, index: usize) -> Option<f64> {
    row.columns.get(index)?.as_ref()?.as_double()
}

fn user_from_row(row: Row) -> Option<User> {
    let is_verified = match row.columns.get(3)?.as_ref()? {
        CqlValue::Boolean(b) => *b,
        _ => return None,
    };
    Some(User {
        id: text_column(&row, 0)?,
        email: text_column(&row, 1)?,
        password_hash: text_column(&row, 2)?,
        is_verified,
        balance_usd: double_column(&row, 4)?,
    })
}

fn trade_from_row(row: &Row) -> Option<Trade> {
    let created_at = match row.columns.get(1)?.as_ref()? {
        CqlValue::Timestamp(ts) => {
            DateTime::<Utc>::from_timestamp_millis(ts.num_milliseconds())?
        }
        _ => return None,
    };
    Some(Trade {
        user_id: text_column(row, 0)?,
        created_at,
        id: text_column(row, 2)?,
        symbol: text_column(row, 3)?,
        side: Side::parse(&text_column(row, 4)?)?,
        quantity: double_column(row, 5)?,
        price_usd: double_column(row, 6)?,
    })
}

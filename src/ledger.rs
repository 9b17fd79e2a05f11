// src/ledger.rs
//! Pure aggregation over the append-only trade ledger.
//!
//! Positions are recomputed from history on every request; nothing derived
//! is persisted, so there is no second source of truth to drift.

use std::collections::HashMap;

use crate::models::{Overview, Position, Side, Trade, ValuedPosition};

/// Why a trade was refused before anything was written.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeRejection {
    InsufficientBalance,
    /// Carries the current net holding for the error message.
    InsufficientHolding(f64),
}

/// Fold a user's trades into per-symbol positions, oldest trade first.
/// BUY adds quantity and cost, SELL subtracts both. Symbols come back in
/// alphabetical order so output is deterministic.
pub fn fold_positions(trades: &[Trade]) -> Vec<Position> {
    let mut ordered: Vec<&Trade> = trades.iter().collect();
    ordered.sort_by_key(|t| t.created_at);

    let mut by_symbol: HashMap<String, Position> = HashMap::new();
    for trade in ordered {
        let symbol = trade.symbol.to_uppercase();
        let pos = by_symbol
            .entry(symbol.clone())
            .or_insert_with(|| Position {
                symbol,
                quantity: 0.0,
                total_cost_usd: 0.0,
            });
        let cost = trade.price_usd * trade.quantity;
        match trade.side {
            Side::Buy => {
                pos.quantity += trade.quantity;
                pos.total_cost_usd += cost;
            }
            Side::Sell => {
                pos.quantity -= trade.quantity;
                pos.total_cost_usd -= cost;
            }
        }
    }

    let mut positions: Vec<Position> = by_symbol.into_values().collect();
    positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    positions
}

/// Signed net holding of one symbol.
pub fn net_quantity(trades: &[Trade], symbol: &str) -> f64 {
    trades
        .iter()
        .filter(|t| t.symbol.eq_ignore_ascii_case(symbol))
        .map(|t| match t.side {
            Side::Buy => t.quantity,
            Side::Sell => -t.quantity,
        })
        .sum()
}

/// Combine held positions with live prices. Positions with no live price
/// are skipped from valuation; their trades stay in history untouched.
pub fn value_positions(
    positions: &[Position],
    prices: &HashMap<String, f64>,
) -> Vec<ValuedPosition> {
    positions
        .iter()
        .filter(|p| p.quantity > 0.0)
        .filter_map(|p| {
            let price_now = *prices.get(&p.symbol)?;
            let current_value = p.quantity * price_now;
            Some(ValuedPosition {
                symbol: p.symbol.clone(),
                quantity: p.quantity,
                avg_buy_price: p.total_cost_usd / p.quantity,
                price_now,
                current_value,
                profit_loss: current_value - p.total_cost_usd,
            })
        })
        .collect()
}

/// Portfolio totals: cash, market value of priced holdings, their sum, and
/// unrealized P/L against invested cost.
pub fn overview(balance_usd: f64, positions: &[Position], prices: &HashMap<String, f64>) -> Overview {
    let mut portfolio_value = 0.0;
    let mut total_invested = 0.0;
    for pos in positions.iter().filter(|p| p.quantity > 0.0) {
        if let Some(price) = prices.get(&pos.symbol) {
            portfolio_value += pos.quantity * price;
            total_invested += pos.total_cost_usd;
        }
    }
    Overview {
        balance_usd,
        portfolio_value_usd: portfolio_value,
        total_asset_usd: balance_usd + portfolio_value,
        total_profit_loss_usd: portfolio_value - total_invested,
    }
}

/// Decide whether a trade may execute, returning the post-trade cash
/// balance. Nothing is written until this admits the trade.
pub fn admit_trade(
    side: Side,
    quantity: f64,
    price_usd: f64,
    balance_usd: f64,
    net_qty: f64,
) -> Result<f64, TradeRejection> {
    let total = price_usd * quantity;
    match side {
        Side::Buy => {
            if balance_usd < total {
                Err(TradeRejection::InsufficientBalance)
            } else {
                Ok(balance_usd - total)
            }
        }
        Side::Sell => {
            if net_qty < quantity {
                Err(TradeRejection::InsufficientHolding(net_qty))
            } else {
                Ok(balance_usd + total)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trade(symbol: &str, side: Side, quantity: f64, price_usd: f64, minute: u32) -> Trade {
        Trade {
            id: format!("t-{}", minute),
            user_id: "u1".to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            price_usd,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
        }
    }

    #[test]
    fn net_quantity_is_signed_sum() {
        let trades = vec![
            trade("BTC", Side::Buy, 0.5, 20000.0, 0),
            trade("BTC", Side::Buy, 0.3, 21000.0, 1),
            trade("BTC", Side::Sell, 0.2, 22000.0, 2),
            trade("ETH", Side::Buy, 4.0, 1500.0, 3),
        ];
        assert!((net_quantity(&trades, "BTC") - 0.6).abs() < 1e-9);
        assert!((net_quantity(&trades, "eth") - 4.0).abs() < 1e-9);
        assert_eq!(net_quantity(&trades, "SOL"), 0.0);
    }

    #[test]
    fn fold_accumulates_per_symbol() {
        let trades = vec![
            trade("ETH", Side::Buy, 2.0, 1000.0, 5),
            trade("BTC", Side::Buy, 0.1, 20000.0, 0),
            trade("ETH", Side::Sell, 1.0, 1200.0, 9),
        ];
        let positions = fold_positions(&trades);
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].symbol, "BTC");
        assert!((positions[0].total_cost_usd - 2000.0).abs() < 1e-9);
        assert_eq!(positions[1].symbol, "ETH");
        assert!((positions[1].quantity - 1.0).abs() < 1e-9);
        assert!((positions[1].total_cost_usd - 800.0).abs() < 1e-9);
    }

    #[test]
    fn unpriced_symbol_is_skipped_from_valuation() {
        let trades = vec![
            trade("BTC", Side::Buy, 0.1, 20000.0, 0),
            trade("DOGE", Side::Buy, 100.0, 0.1, 1),
        ];
        let positions = fold_positions(&trades);
        let prices = HashMap::from([("BTC".to_string(), 25000.0)]);
        let valued = value_positions(&positions, &prices);
        assert_eq!(valued.len(), 1);
        assert_eq!(valued[0].symbol, "BTC");
        assert!((valued[0].current_value - 2500.0).abs() < 1e-9);
        assert!((valued[0].profit_loss - 500.0).abs() < 1e-9);
    }

    #[test]
    fn closed_positions_drop_out() {
        let trades = vec![
            trade("BTC", Side::Buy, 0.1, 20000.0, 0),
            trade("BTC", Side::Sell, 0.1, 21000.0, 1),
        ];
        let positions = fold_positions(&trades);
        let prices = HashMap::from([("BTC".to_string(), 25000.0)]);
        assert!(value_positions(&positions, &prices).is_empty());
    }

    #[test]
    fn overview_totals() {
        let trades = vec![
            trade("BTC", Side::Buy, 0.1, 20000.0, 0),
            trade("ETH", Side::Buy, 2.0, 1000.0, 1),
        ];
        let positions = fold_positions(&trades);
        let prices = HashMap::from([
            ("BTC".to_string(), 25000.0),
            ("ETH".to_string(), 900.0),
        ]);
        let ov = overview(6000.0, &positions, &prices);
        // 0.1 * 25000 + 2 * 900 = 4300 market value against 4000 invested.
        assert!((ov.portfolio_value_usd - 4300.0).abs() < 1e-9);
        assert!((ov.total_asset_usd - 10300.0).abs() < 1e-9);
        assert!((ov.total_profit_loss_usd - 300.0).abs() < 1e-9);
    }

    #[test]
    fn buy_beyond_balance_is_rejected() {
        // 10000 cash cannot buy 1 BTC at 20000.
        assert_eq!(
            admit_trade(Side::Buy, 1.0, 20000.0, 10000.0, 0.0),
            Err(TradeRejection::InsufficientBalance)
        );
    }

    #[test]
    fn affordable_buy_debits_balance() {
        // 10000 cash buys 0.1 BTC at 20000, leaving 8000.
        let balance = admit_trade(Side::Buy, 0.1, 20000.0, 10000.0, 0.0).unwrap();
        assert!((balance - 8000.0).abs() < 1e-9);
    }

    #[test]
    fn oversell_is_rejected() {
        // Holding 0.1 BTC, selling 0.2 must fail with the holding reported.
        assert_eq!(
            admit_trade(Side::Sell, 0.2, 20000.0, 8000.0, 0.1),
            Err(TradeRejection::InsufficientHolding(0.1))
        );
    }

    #[test]
    fn sell_within_holding_credits_balance() {
        let balance = admit_trade(Side::Sell, 0.1, 22000.0, 8000.0, 0.1).unwrap();
        assert!((balance - 10200.0).abs() < 1e-9);
    }
}

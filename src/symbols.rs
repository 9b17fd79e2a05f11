// src/symbols.rs
//! The single symbol -> provider-id lookup used by every handler that needs
//! to resolve a traded symbol against the market-data provider.

/// Symbols the demo supports for trading, mapped to CoinGecko ids.
const SYMBOL_MAP: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("BNB", "binancecoin"),
    ("XRP", "ripple"),
    ("DOGE", "dogecoin"),
];

/// Resolve a symbol (any case) to its provider id, or `None` if unsupported.
pub fn to_coin_id(symbol: &str) -> Option<&'static str> {
    let upper = symbol.to_uppercase();
    SYMBOL_MAP
        .iter()
        .find(|(sym, _)| *sym == upper)
        .map(|(_, id)| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_symbols() {
        assert_eq!(to_coin_id("BTC"), Some("bitcoin"));
        assert_eq!(to_coin_id("DOGE"), Some("dogecoin"));
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(to_coin_id("eth"), Some("ethereum"));
        assert_eq!(to_coin_id("Sol"), Some("solana"));
    }

    #[test]
    fn unknown_symbol_is_none() {
        assert_eq!(to_coin_id("SHIB"), None);
        assert_eq!(to_coin_id(""), None);
    }
}

//! Text rendering for command output
//!
//! Every function returns a `String` so the binary decides where it goes and
//! tests can check the layout directly.

use std::fmt::Write;

use crate::data::{CoinDetail, CoinMarket, PriceHistory, SimplePrices};

/// Formats a price with precision that suits its magnitude
pub fn format_price(price: f64) -> String {
    if price >= 1.0 {
        format!("{:.2}", price)
    } else if price >= 0.01 {
        format!("{:.4}", price)
    } else {
        format!("{:.8}", price)
    }
}

/// Formats a large amount with a K/M/B/T suffix
pub fn format_compact(value: f64) -> String {
    const UNITS: [(f64, &str); 4] = [(1e12, "T"), (1e9, "B"), (1e6, "M"), (1e3, "K")];
    for (scale, suffix) in UNITS {
        if value.abs() >= scale {
            return format!("{:.2}{}", value / scale, suffix);
        }
    }
    format!("{:.2}", value)
}

fn format_change(change: Option<f64>) -> String {
    match change {
        Some(c) => format!("{:+.2}%", c),
        None => "-".to_string(),
    }
}

fn or_dash(value: Option<f64>, f: fn(f64) -> String) -> String {
    value.map(f).unwrap_or_else(|| "-".to_string())
}

/// Renders the top-coins listing as a table
pub fn render_markets(coins: &[CoinMarket], vs: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:<20} {:<8} {:>16} {:>9} {:>12}",
        "#",
        "Name",
        "Symbol",
        format!("Price ({})", vs.to_uppercase()),
        "24h",
        "Market cap"
    );
    for coin in coins {
        let rank = coin
            .market_cap_rank
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>4}  {:<20} {:<8} {:>16} {:>9} {:>12}",
            rank,
            truncate(&coin.name, 20),
            coin.symbol.to_uppercase(),
            or_dash(coin.current_price, format_price),
            format_change(coin.price_change_percentage_24h),
            or_dash(coin.market_cap, format_compact),
        );
    }
    out
}

/// Renders the detail view of one coin
pub fn render_detail(detail: &CoinDetail, vs: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", detail.name, detail.symbol.to_uppercase());
    if let Some(rank) = detail.market_cap_rank {
        let _ = writeln!(out, "Rank:       #{}", rank);
    }
    let _ = writeln!(
        out,
        "Price:      {} {}",
        or_dash(detail.price_in(vs), format_price),
        vs.to_uppercase()
    );
    if let Some(market_data) = &detail.market_data {
        let _ = writeln!(
            out,
            "24h:        {}",
            format_change(market_data.price_change_percentage_24h)
        );
        if let Some(cap) = market_data.market_cap.get(vs) {
            let _ = writeln!(out, "Market cap: {}", format_compact(*cap));
        }
    }
    if let Some(homepage) = detail.homepage() {
        let _ = writeln!(out, "Homepage:   {}", homepage);
    }
    if let Some(description) = detail.description_en() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", truncate(first_paragraph(description), 400));
    }
    out
}

/// Renders a summary of a price history
pub fn render_history(id: &str, days: u32, history: &PriceHistory, vs: &str) -> String {
    let mut out = String::new();
    let vs = vs.to_uppercase();
    let _ = writeln!(out, "{} over {} day(s), {} samples", id, days, history.prices.len());
    if let Some((low, high)) = history.price_range() {
        let _ = writeln!(out, "Low:    {} {}", format_price(low), vs);
        let _ = writeln!(out, "High:   {} {}", format_price(high), vs);
    }
    if let Some(last) = history.prices.last() {
        let _ = writeln!(out, "Last:   {} {}", format_price(last.value()), vs);
    }
    let _ = writeln!(out, "Change: {}", format_change(history.change_percentage()));
    out
}

/// Renders simple prices, one coin per line
pub fn render_prices(prices: &SimplePrices, vs: &str) -> String {
    let mut out = String::new();
    for (id, quotes) in prices {
        let price = quotes.get(vs).copied();
        let _ = writeln!(
            out,
            "{:<20} {:>16} {}",
            id,
            or_dash(price, format_price),
            vs.to_uppercase()
        );
    }
    out
}

fn first_paragraph(text: &str) -> &str {
    text.split("\r\n\r\n")
        .next()
        .and_then(|p| p.split("\n\n").next())
        .unwrap_or(text)
        .trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MarketData, PricePoint};
    use std::collections::BTreeMap;

    fn coin(name: &str, price: Option<f64>) -> CoinMarket {
        CoinMarket {
            id: name.to_lowercase(),
            symbol: name[..3].to_lowercase(),
            name: name.to_string(),
            current_price: price,
            market_cap: Some(1.25e12),
            market_cap_rank: Some(1),
            total_volume: None,
            price_change_percentage_24h: Some(-1.5),
            last_updated: None,
        }
    }

    #[test]
    fn test_format_price_precision() {
        assert_eq!(format_price(67000.0), "67000.00");
        assert_eq!(format_price(0.5), "0.5000");
        assert_eq!(format_price(0.00001234), "0.00001234");
    }

    #[test]
    fn test_format_compact_suffixes() {
        assert_eq!(format_compact(1.25e12), "1.25T");
        assert_eq!(format_compact(3.5e9), "3.50B");
        assert_eq!(format_compact(999.0), "999.00");
    }

    #[test]
    fn test_render_markets_includes_each_coin() {
        let out = render_markets(&[coin("Bitcoin", Some(67000.0)), coin("Dogecoin", None)], "usd");

        assert!(out.contains("Price (USD)"));
        assert!(out.contains("Bitcoin"));
        assert!(out.contains("67000.00"));
        assert!(out.contains("-1.50%"));
        assert!(out.contains("1.25T"));
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_render_detail() {
        let mut current_price = BTreeMap::new();
        current_price.insert("usd".to_string(), 3500.0);
        let detail = CoinDetail {
            id: "ethereum".to_string(),
            symbol: "eth".to_string(),
            name: "Ethereum".to_string(),
            market_cap_rank: Some(2),
            description: crate::data::Localized {
                en: Some("First paragraph.\r\n\r\nSecond paragraph.".to_string()),
            },
            links: Default::default(),
            market_data: Some(MarketData {
                current_price,
                ..Default::default()
            }),
        };

        let out = render_detail(&detail, "usd");

        assert!(out.starts_with("Ethereum (ETH)"));
        assert!(out.contains("#2"));
        assert!(out.contains("3500.00 USD"));
        assert!(out.contains("First paragraph."));
        assert!(!out.contains("Second paragraph."));
    }

    #[test]
    fn test_render_history() {
        let history = PriceHistory {
            prices: vec![PricePoint(0.0, 100.0), PricePoint(1.0, 150.0)],
            ..Default::default()
        };

        let out = render_history("bitcoin", 7, &history, "usd");

        assert!(out.contains("bitcoin over 7 day(s), 2 samples"));
        assert!(out.contains("High:   150.00 USD"));
        assert!(out.contains("Change: +50.00%"));
    }

    #[test]
    fn test_render_prices_marks_missing_quote() {
        let mut prices = SimplePrices::new();
        prices.insert("bitcoin".to_string(), BTreeMap::from([("usd".to_string(), 1.0)]));
        prices.insert("ghost".to_string(), BTreeMap::new());

        let out = render_prices(&prices, "usd");

        assert!(out.contains("bitcoin"));
        assert!(out.lines().any(|l| l.starts_with("ghost") && l.contains('-')));
    }

    #[test]
    fn test_truncate_adds_ellipsis() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}

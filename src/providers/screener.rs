use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::Config;
use crate::providers::{ProviderError, ProviderResult};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const SNAPSHOT_TTL: Duration = Duration::from_secs(30 * 60);

lazy_static! {
    static ref NUM_RE: Regex = Regex::new(r"[-+]?\d*\.?\d+").unwrap();
}

/// Screener.in company-page scraper, primary source for the IN market.
/// Snapshots are cached in-process for 30 minutes per symbol so request
/// bursts do not hammer the site; this cache is independent of the outer
/// SQLite TTL.
pub struct ScreenerProvider {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<HashMap<String, (Instant, ProviderResult)>>,
}

impl ScreenerProvider {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .timeout(Duration::from_secs(25))
            .build()?;

        Ok(Self {
            client,
            base_url: config.screener_base_url.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch (or reuse a cached) fundamentals snapshot for an IN symbol.
    pub async fn fetch_snapshot(&self, symbol: &str, force_refresh: bool) -> ProviderResult {
        let key = symbol.trim().to_uppercase();

        if !force_refresh {
            let cache = self.cache.lock().unwrap();
            if let Some((at, snapshot)) = cache.get(&key) {
                if at.elapsed() < SNAPSHOT_TTL {
                    debug!(symbol = %key, "serving screener snapshot from cache");
                    return snapshot.clone();
                }
            }
        }

        let code = screener_code(&key);
        let snapshot = match self.fetch_page(&code).await {
            Ok(html) => parse_snapshot(&html),
            Err(e) => {
                warn!(symbol = %key, error = %e, "screener fetch failed");
                ProviderResult::error(e.to_string())
            }
        };

        if snapshot.is_ok() {
            let mut cache = self.cache.lock().unwrap();
            cache.insert(key, (Instant::now(), snapshot.clone()));
        }
        snapshot
    }

    /// Try the consolidated page first, falling back to the standalone
    /// variant (smaller companies only publish the latter).
    async fn fetch_page(&self, code: &str) -> Result<String, ProviderError> {
        let consolidated = format!("{}/company/{}/consolidated/", self.base_url, code);
        match self.get_html(&consolidated).await {
            Ok(html) => Ok(html),
            Err(e) => {
                debug!(code, error = %e, "consolidated page unavailable, trying standalone");
                let standalone = format!("{}/company/{}/", self.base_url, code);
                self.get_html(&standalone).await
            }
        }
    }

    async fn get_html(&self, url: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", &self.base_url)
            .send()
            .await?;
        let status = response.status().as_u16();
        if status == 429 {
            return Err(ProviderError::RateLimited { status });
        }
        Ok(response.error_for_status()?.text().await?)
    }
}

/// RELIANCE.NS / RELIANCE.BO -> RELIANCE; anything else passes through.
pub fn screener_code(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase();
    s.strip_suffix(".NS")
        .or_else(|| s.strip_suffix(".BO"))
        .unwrap_or(&s)
        .to_string()
}

/// Extract fundamentals from the company page's top-ratios list
/// (`ul#top-ratios`, one li per metric with label and value spans).
pub fn parse_snapshot(html: &str) -> ProviderResult {
    let ratios = parse_top_ratios(html);

    let mut out = ProviderResult::success();
    out.currency = Some("INR".to_string());

    if let Some(text) = ratios.get("Market Cap") {
        out.market_cap = parse_market_cap(text);
    }
    if let Some(text) = ratios.get("Stock P/E") {
        out.pe = extract_number(text);
    }
    if let Some(text) = ratios.get("ROE") {
        out.roe = extract_number(text).map(|pct| pct / 100.0);
    }

    let current_price = ratios.get("Current Price").and_then(|t| extract_number(t));
    let book_value = ratios.get("Book Value").and_then(|t| extract_number(t));
    out.pb = match (current_price, book_value) {
        (Some(price), Some(book)) if book != 0.0 => Some(price / book),
        _ => None,
    };

    let (high_52w, low_52w) = ratios
        .get("High / Low")
        .map(|t| parse_high_low(t))
        .unwrap_or((None, None));
    out.diagnostics = Some(serde_json::json!({
        "current_price": current_price,
        "book_value": book_value,
        "roce_pct": ratios.get("ROCE").and_then(|t| extract_number(t)),
        "dividend_yield_pct": ratios.get("Dividend Yield").and_then(|t| extract_number(t)),
        "high_52w": high_52w,
        "low_52w": low_52w,
    }));

    out
}

/// "₹ 1,612 / 1,115" -> (Some(1612), Some(1115)).
fn parse_high_low(text: &str) -> (Option<f64>, Option<f64>) {
    let parts: Vec<&str> = text.split('/').collect();
    if parts.len() != 2 {
        return (None, None);
    }
    (extract_number(parts[0]), extract_number(parts[1]))
}

fn parse_top_ratios(html: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let document = Html::parse_document(html);

    let (Ok(li_selector), Ok(span_selector)) = (
        Selector::parse("ul#top-ratios li"),
        Selector::parse("span"),
    ) else {
        return out;
    };

    for li in document.select(&li_selector) {
        let mut spans = li.select(&span_selector);
        let (Some(label_el), Some(value_el)) = (spans.next(), spans.next()) else {
            continue;
        };
        let label = collapse_text(label_el.text().collect::<String>());
        let value = collapse_text(value_el.text().collect::<String>());
        if !label.is_empty() && !value.is_empty() {
            out.insert(label, value);
        }
    }
    out
}

fn collapse_text(raw: String) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First numeric token in the text, commas stripped ("₹ 1,612" -> 1612).
fn extract_number(text: &str) -> Option<f64> {
    let cleaned = text.replace(',', "");
    NUM_RE
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Market cap text like "₹ 18,45,829 Cr." is in crores: 1 Cr = 1e7.
fn parse_market_cap(text: &str) -> Option<f64> {
    let cleaned = text.replace(',', "").to_uppercase();
    let num = extract_number(&cleaned)?;
    if cleaned.contains("CR") {
        Some(num * 1e7)
    } else {
        Some(num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TOP_RATIOS_HTML: &str = r#"
        <html><body>
        <ul id="top-ratios">
          <li><span class="name">Market Cap</span>
              <span class="nowrap value">₹ <span class="number">18,45,829</span> Cr.</span></li>
          <li><span class="name">Current Price</span>
              <span class="nowrap value">₹ <span class="number">1,400</span></span></li>
          <li><span class="name">High / Low</span>
              <span class="nowrap value">₹ <span class="number">1,612</span> / <span class="number">1,115</span></span></li>
          <li><span class="name">Stock P/E</span>
              <span class="nowrap value"><span class="number">27.5</span></span></li>
          <li><span class="name">Book Value</span>
              <span class="nowrap value">₹ <span class="number">700</span></span></li>
          <li><span class="name">ROE</span>
              <span class="nowrap value"><span class="number">9.25</span> %</span></li>
        </ul>
        </body></html>
    "#;

    #[test]
    fn symbol_suffixes_are_stripped() {
        assert_eq!(screener_code("RELIANCE.NS"), "RELIANCE");
        assert_eq!(screener_code("reliance.bo"), "RELIANCE");
        assert_eq!(screener_code("TCS"), "TCS");
        assert_eq!(screener_code("  infy.ns "), "INFY");
    }

    #[test]
    fn market_cap_crore_suffix_multiplies() {
        assert_eq!(parse_market_cap("₹ 18,45,829 Cr."), Some(1_845_829.0 * 1e7));
        assert_eq!(parse_market_cap("123456"), Some(123456.0));
        assert_eq!(parse_market_cap("n/a"), None);
    }

    #[test]
    fn numbers_survive_currency_symbols_and_commas() {
        assert_eq!(extract_number("₹ 1,612"), Some(1612.0));
        assert_eq!(extract_number("9.25 %"), Some(9.25));
        assert_eq!(extract_number("-3.1"), Some(-3.1));
        assert_eq!(extract_number("--"), None);
    }

    #[test]
    fn snapshot_parses_the_top_ratios_list() {
        let out = parse_snapshot(TOP_RATIOS_HTML);

        assert!(out.is_ok());
        assert_eq!(out.currency.as_deref(), Some("INR"));
        assert_eq!(out.market_cap, Some(1.845829e13));
        assert_eq!(out.pe, Some(27.5));
        assert_eq!(out.roe, Some(0.0925));
        // pb derived from current price / book value
        assert_eq!(out.pb, Some(2.0));
    }

    #[test]
    fn diagnostics_carry_the_extra_ratios() {
        let out = parse_snapshot(TOP_RATIOS_HTML);
        let extras = out.diagnostics.unwrap();
        assert_eq!(extras["current_price"], serde_json::json!(1400.0));
        assert_eq!(extras["book_value"], serde_json::json!(700.0));
        assert_eq!(extras["high_52w"], serde_json::json!(1612.0));
        assert_eq!(extras["low_52w"], serde_json::json!(1115.0));
    }

    #[test]
    fn high_low_pair_splits_on_slash() {
        assert_eq!(parse_high_low("₹ 1,612 / 1,115"), (Some(1612.0), Some(1115.0)));
        assert_eq!(parse_high_low("1612"), (None, None));
    }

    #[test]
    fn missing_book_value_leaves_pb_null() {
        let html = r#"
            <ul id="top-ratios">
              <li><span>Current Price</span><span>₹ 1,400</span></li>
            </ul>
        "#;
        let out = parse_snapshot(html);
        assert_eq!(out.pb, None);
    }

    #[test]
    fn page_without_ratios_list_yields_empty_snapshot() {
        let out = parse_snapshot("<html><body><p>nothing here</p></body></html>");
        assert!(out.is_ok());
        assert_eq!(out.market_cap, None);
        assert_eq!(out.pe, None);
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::providers::{json_f64, ProviderError, ProviderResult};
use crate::throttle::{CooldownGate, ProviderRateLimiter};

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const QUOTE_SUMMARY_MODULES: &str = "price,summaryDetail,financialData,defaultKeyStatistics";

/// Yahoo Finance quote client with two tiers: a cheap quote lookup
/// (currency + market cap) and a heavy quoteSummary lookup that is only
/// attempted when the caller allows it and the cheap tier came up empty.
/// Rate-limit responses engage the shared cooldown gate.
pub struct YahooProvider {
    client: reqwest::Client,
    limiter: ProviderRateLimiter,
    gate: Arc<CooldownGate>,
    base_url: String,
    cooldown: Duration,
    soft_fail_window: Duration,
    backoffs: Vec<Duration>,
}

impl YahooProvider {
    pub fn new(config: &Config, gate: Arc<CooldownGate>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            limiter: ProviderRateLimiter::new(Duration::from_secs_f64(
                config.yahoo_min_delay_secs,
            )),
            gate,
            base_url: config.yahoo_base_url.clone(),
            cooldown: Duration::from_secs(config.yahoo_cooldown_secs),
            soft_fail_window: Duration::from_secs(config.yahoo_fail_softcache_minutes * 60),
            backoffs: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        })
    }

    /// Override the heavy-endpoint retry schedule. Used by tests to avoid
    /// multi-second sleeps.
    pub fn with_backoffs(mut self, backoffs: Vec<Duration>) -> Self {
        self.backoffs = backoffs;
        self
    }

    /// Fetch quote data for a symbol. Returns a skipped result without
    /// touching the network while the provider is cooling down or the
    /// symbol is soft-failed. Never returns an error status: a failed
    /// heavy lookup degrades to whatever the cheap tier produced, with
    /// the failure noted in `detail`.
    pub async fn fetch_summary(&self, symbol: &str, allow_heavy: bool) -> ProviderResult {
        let sym = symbol.trim().to_uppercase();

        if self.gate.is_blocked() || self.gate.is_soft_failed(&sym) {
            return ProviderResult::skipped("provider on cooldown");
        }

        let mut out = ProviderResult::success();

        // Cheap tier: failures are noted but never fatal.
        self.limiter.wait_if_needed().await;
        match self.fetch_quote(&sym).await {
            Ok(quote) => {
                out.currency = quote
                    .get("currency")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                out.market_cap = quote.get("marketCap").and_then(json_f64);
            }
            Err(e) => {
                debug!(symbol = %sym, error = %e, "cheap quote lookup failed");
                out.detail = Some(format!("quote lookup failed: {e}"));
            }
        }

        if out.market_cap.is_some() || !allow_heavy {
            return out;
        }

        let mut last_err: Option<ProviderError> = None;
        for backoff in &self.backoffs {
            self.limiter.wait_if_needed().await;
            match self.fetch_quote_summary(&sym).await {
                Ok(summary) => {
                    apply_summary(&mut out, &summary);
                    return out;
                }
                Err(ProviderError::RateLimited { status }) => {
                    warn!(symbol = %sym, status, "rate limited, engaging cooldown");
                    self.gate.block_for(self.cooldown);
                    self.gate.soft_fail(&sym, self.soft_fail_window);
                    last_err = Some(ProviderError::RateLimited { status });
                    let jitter = Duration::from_secs_f64(rand::random::<f64>() * 0.35);
                    tokio::time::sleep(*backoff + jitter).await;
                }
                Err(e) => {
                    warn!(symbol = %sym, error = %e, "quoteSummary lookup failed");
                    self.gate.soft_fail(&sym, self.soft_fail_window);
                    last_err = Some(e);
                    break;
                }
            }
        }

        out.detail = Some(match last_err {
            Some(e) => format!("quoteSummary lookup failed: {e}"),
            None => "quoteSummary lookup failed: unknown".to_string(),
        });
        out
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Value, ProviderError> {
        let url = format!("{}/v7/finance/quote?symbols={}", self.base_url, symbol);
        let body = self.get_json(&url).await?;
        body.get("quoteResponse")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .cloned()
            .ok_or_else(|| ProviderError::Payload("empty quote response".to_string()))
    }

    async fn fetch_quote_summary(&self, symbol: &str) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules={}",
            self.base_url, symbol, QUOTE_SUMMARY_MODULES
        );
        let body = self.get_json(&url).await?;
        body.get("quoteSummary")
            .and_then(|v| v.get("result"))
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .cloned()
            .ok_or_else(|| ProviderError::Payload("empty quoteSummary response".to_string()))
    }

    async fn get_json(&self, url: &str) -> Result<Value, ProviderError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        // 999 is Yahoo's non-standard throttle status
        if status == 429 || status == 999 {
            return Err(ProviderError::RateLimited { status });
        }
        let body = response.error_for_status()?.json().await?;
        Ok(body)
    }
}

/// Copy quoteSummary module fields onto the result. Values arrive as
/// `{"raw": n, "fmt": "..."}` wrappers.
fn apply_summary(out: &mut ProviderResult, summary: &Value) {
    let module = |name: &str| summary.get(name);

    if let Some(price) = module("price") {
        if out.currency.is_none() {
            out.currency = price
                .get("currency")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        if out.market_cap.is_none() {
            out.market_cap = price.get("marketCap").and_then(json_f64);
        }
    }

    if let Some(detail) = module("summaryDetail") {
        out.pe = detail
            .get("trailingPE")
            .and_then(json_f64)
            .or_else(|| detail.get("forwardPE").and_then(json_f64));
        if out.market_cap.is_none() {
            out.market_cap = detail.get("marketCap").and_then(json_f64);
        }
    }

    if let Some(stats) = module("defaultKeyStatistics") {
        out.pb = stats.get("priceToBook").and_then(json_f64);
        out.net_income_ttm = stats.get("netIncomeToCommon").and_then(json_f64);
    }

    if let Some(financial) = module("financialData") {
        out.revenue_ttm = financial.get("totalRevenue").and_then(json_f64);
        out.fcf_ttm = financial.get("freeCashflow").and_then(json_f64);
        out.roe = financial.get("returnOnEquity").and_then(json_f64);
        out.debt_to_equity = financial.get("debtToEquity").and_then(json_f64);
    }
}

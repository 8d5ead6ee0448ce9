pub mod screener;
pub mod sec_edgar;
pub mod yahoo;

use serde_json::Value;

pub use screener::ScreenerProvider;
pub use sec_edgar::SecEdgarProvider;
pub use yahoo::YahooProvider;

/// Error classification for upstream calls. Rate limiting is typed so the
/// caller can engage cooldowns instead of sniffing error text.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by upstream (HTTP {status})")]
    RateLimited { status: u16 },
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected payload: {0}")]
    Payload(String),
}

/// Outcome of one provider fetch. `status` is "ok", "skipped", or "error";
/// `detail` carries a short human-readable reason for the latter two.
#[derive(Debug, Clone, Default)]
pub struct ProviderResult {
    pub status: &'static str,
    pub detail: Option<String>,

    pub currency: Option<String>,
    pub asof_date: Option<String>,

    pub market_cap: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,

    pub revenue_ttm: Option<f64>,
    pub net_income_ttm: Option<f64>,
    pub fcf_ttm: Option<f64>,

    pub debt_to_equity: Option<f64>,
    pub roe: Option<f64>,

    /// Provider-specific extras destined for the persisted diagnostics
    /// blob, not for merging.
    pub diagnostics: Option<Value>,
}

impl ProviderResult {
    pub fn success() -> Self {
        Self {
            status: "ok",
            ..Default::default()
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: "skipped",
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: "error",
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Pull a float out of provider JSON, tolerating the shapes the upstreams
/// actually send: a plain number, a `{"raw": n}` wrapper, or a numeric
/// string.
pub fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => map.get("raw").and_then(|v| v.as_f64()),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

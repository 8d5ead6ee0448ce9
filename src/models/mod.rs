use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market a symbol trades in. Determines provider routing and cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Us,
    In,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Us => "US",
            Market::In => "IN",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "US" => Ok(Market::Us),
            "IN" => Ok(Market::In),
            other => Err(format!("unknown market: {}", other)),
        }
    }
}

/// One cached fundamentals row, keyed by (market, symbol).
///
/// Every numeric field is independently nullable: a provider that cannot
/// produce one figure does not invalidate the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsRecord {
    pub market: String,
    pub symbol: String,
    pub currency: Option<String>,
    pub asof_date: Option<String>,
    pub updated_at: String,
    pub source: Option<String>,

    pub market_cap: Option<f64>,
    pub pe: Option<f64>,
    pub pb: Option<f64>,

    pub revenue_ttm: Option<f64>,
    pub net_income_ttm: Option<f64>,
    pub fcf_ttm: Option<f64>,

    pub debt_to_equity: Option<f64>,
    pub roe: Option<f64>,

    /// Compact JSON diagnostics blob (provider flags, cooldown state).
    pub raw_json: Option<String>,
}

/// Valuation ratios in the caller-facing response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ratios {
    pub pe: Option<f64>,
    pub pb: Option<f64>,
    pub roe: Option<f64>,
    pub debt_to_equity: Option<f64>,
}

/// Trailing-twelve-month figures in the caller-facing response shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ttm {
    pub revenue: Option<f64>,
    pub net_income: Option<f64>,
    pub fcf: Option<f64>,
}

/// Formatted fundamentals payload returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsResponse {
    pub market: String,
    pub symbol: String,
    pub updated_at: String,
    pub asof_date: Option<String>,
    pub currency: Option<String>,
    pub source: Option<String>,
    pub ratios: Ratios,
    pub ttm: Ttm,
    pub market_cap: Option<f64>,
}

impl From<FundamentalsRecord> for FundamentalsResponse {
    fn from(row: FundamentalsRecord) -> Self {
        FundamentalsResponse {
            market: row.market,
            symbol: row.symbol,
            updated_at: row.updated_at,
            asof_date: row.asof_date,
            currency: row.currency,
            source: row.source,
            ratios: Ratios {
                pe: row.pe,
                pb: row.pb,
                roe: row.roe,
                debt_to_equity: row.debt_to_equity,
            },
            ttm: Ttm {
                revenue: row.revenue_ttm,
                net_income: row.net_income_ttm,
                fcf: row.fcf_ttm,
            },
            market_cap: row.market_cap,
        }
    }
}

/// Caller-visible failure marker: every provider failed and no usable cache
/// row exists. Echoes the requested key, never internal details.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("fundamentals computation failed for {market}:{symbol}")]
pub struct FundamentalsError {
    pub market: String,
    pub symbol: String,
}

/// Current UTC time as a second-resolution ISO-8601 string with a Z suffix,
/// the format stored in `updated_at` columns.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_parses_case_insensitively() {
        assert_eq!("us".parse::<Market>().unwrap(), Market::Us);
        assert_eq!(" IN ".parse::<Market>().unwrap(), Market::In);
        assert!("UK".parse::<Market>().is_err());
    }

    #[test]
    fn response_keeps_nested_shape() {
        let record = FundamentalsRecord {
            market: "US".to_string(),
            symbol: "AAPL".to_string(),
            currency: Some("USD".to_string()),
            asof_date: Some("2024-06-30".to_string()),
            updated_at: now_iso(),
            source: Some("sec+yf".to_string()),
            market_cap: Some(3.0e12),
            pe: Some(30.0),
            pb: None,
            revenue_ttm: Some(4.0e11),
            net_income_ttm: Some(1.0e11),
            fcf_ttm: None,
            debt_to_equity: Some(1.5),
            roe: Some(1.2),
            raw_json: None,
        };

        let resp = FundamentalsResponse::from(record);
        assert_eq!(resp.ratios.pe, Some(30.0));
        assert_eq!(resp.ratios.debt_to_equity, Some(1.5));
        assert_eq!(resp.ttm.revenue, Some(4.0e11));
        assert_eq!(resp.market_cap, Some(3.0e12));
        assert_eq!(resp.source.as_deref(), Some("sec+yf"));
    }

    #[test]
    fn now_iso_is_parseable() {
        let ts = now_iso();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}

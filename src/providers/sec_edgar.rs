use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::database::{is_stale, Database};
use crate::providers::{json_f64, ProviderError, ProviderResult};
use crate::throttle::ProviderRateLimiter;

const CIK_CACHE_TTL_DAYS: i64 = 30;

const QUARTER_FORMS: [&str; 4] = ["10-Q", "10-K", "20-F", "40-F"];
const QUARTER_PERIODS: [&str; 4] = ["Q1", "Q2", "Q3", "Q4"];

/// SEC EDGAR XBRL client. Resolves tickers to CIKs through the public
/// company directory (cached in SQLite) and derives TTM fundamentals from
/// companyfacts filings.
pub struct SecEdgarProvider {
    client: reqwest::Client,
    limiter: ProviderRateLimiter,
    files_base_url: String,
    data_base_url: String,
    db: Database,
}

impl SecEdgarProvider {
    pub fn new(config: &Config, db: Database) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.sec_user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            limiter: ProviderRateLimiter::new(Duration::from_secs_f64(
                config.sec_min_delay_secs,
            )),
            files_base_url: config.sec_files_base_url.clone(),
            data_base_url: config.sec_data_base_url.clone(),
            db,
        })
    }

    /// Fetch and compute filing-derived metrics for a US symbol. Symbols
    /// with no CIK mapping are skipped rather than treated as failures.
    pub async fn fetch_metrics(&self, symbol: &str) -> ProviderResult {
        let cik10 = match self.resolve_cik(symbol).await {
            Ok(Some(cik)) => cik,
            Ok(None) => return ProviderResult::skipped("no CIK mapping"),
            Err(e) => {
                warn!(symbol, error = %e, "CIK resolution failed");
                return ProviderResult::error(e.to_string());
            }
        };

        let facts = match self.fetch_companyfacts(&cik10).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(symbol, cik10, error = %e, "companyfacts fetch failed");
                return ProviderResult::error(e.to_string());
            }
        };

        compute_metrics(&facts)
    }

    /// Resolve a ticker to its zero-padded 10-digit CIK. Hits the cached
    /// mapping first; refreshes from the SEC directory when stale.
    async fn resolve_cik(&self, symbol: &str) -> Result<Option<String>, ProviderError> {
        let sym = symbol.trim().to_uppercase();

        if let Some((cik10, updated_at)) = self
            .db
            .get_cik(&sym)
            .await
            .map_err(|e| ProviderError::Payload(e.to_string()))?
        {
            if !is_stale(Some(&updated_at), CIK_CACHE_TTL_DAYS) {
                return Ok(Some(cik10));
            }
        }

        self.limiter.wait_if_needed().await;
        let url = format!("{}/files/company_tickers.json", self.files_base_url);
        debug!(%url, "refreshing SEC ticker directory");
        let directory: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(entries) = directory.as_object() else {
            return Err(ProviderError::Payload(
                "company_tickers.json is not an object".to_string(),
            ));
        };

        for entry in entries.values() {
            let ticker = entry
                .get("ticker")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_uppercase();
            if ticker != sym {
                continue;
            }
            let Some(cik) = entry.get("cik_str").and_then(|v| v.as_u64()) else {
                continue;
            };
            let cik10 = format!("{:0>10}", cik);
            self.db
                .upsert_cik(&sym, &cik10)
                .await
                .map_err(|e| ProviderError::Payload(e.to_string()))?;
            return Ok(Some(cik10));
        }

        Ok(None)
    }

    async fn fetch_companyfacts(&self, cik10: &str) -> Result<Value, ProviderError> {
        self.limiter.wait_if_needed().await;
        let url = format!("{}/api/xbrl/companyfacts/CIK{}.json", self.data_base_url, cik10);
        let facts = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(facts)
    }
}

/// Derive TTM and balance-sheet metrics from a companyfacts document.
pub fn compute_metrics(facts: &Value) -> ProviderResult {
    let mut revenue = facts_series(facts, "Revenues");
    if revenue.is_empty() {
        revenue = facts_series(facts, "SalesRevenueNet");
    }

    let net_income = facts_series(facts, "NetIncomeLoss");
    let ocf = facts_series(facts, "NetCashProvidedByUsedInOperatingActivities");
    let capex = facts_series(facts, "PaymentsToAcquirePropertyPlantAndEquipment");

    let mut equity = facts_series(facts, "StockholdersEquity");
    if equity.is_empty() {
        equity = facts_series(
            facts,
            "StockholdersEquityIncludingPortionAttributableToNoncontrollingInterest",
        );
    }

    let debt_current = facts_series(facts, "DebtCurrent");
    let debt_long_term = facts_series(facts, "LongTermDebtNoncurrent");
    let liabilities = facts_series(facts, "Liabilities");

    let mut revenue_ttm = sum_vals(&last_n_quarters(&revenue, 4));
    let mut net_income_ttm = sum_vals(&last_n_quarters(&net_income, 4));
    let ocf_ttm = sum_vals(&last_n_quarters(&ocf, 4));
    let capex_ttm = sum_vals(&last_n_quarters(&capex, 4));

    // Companies that only file annually get the most recent FY figure.
    if revenue_ttm.is_none() {
        revenue_ttm = latest_fiscal_year_val(&revenue);
    }
    if net_income_ttm.is_none() {
        net_income_ttm = latest_fiscal_year_val(&net_income);
    }

    let fcf_ttm = match (ocf_ttm, capex_ttm) {
        (Some(o), Some(c)) => Some(o + c),
        _ => None,
    };

    let equity_latest = latest_by_end(&equity);
    let equity_val = equity_latest.and_then(|it| json_f64(&it["val"]));
    let mut asof_date = equity_latest
        .and_then(|it| it.get("end"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let debt_cur_latest = latest_by_end(&debt_current);
    let debt_lt_latest = latest_by_end(&debt_long_term);
    let debt_val = if debt_cur_latest.is_some() || debt_lt_latest.is_some() {
        let cur = debt_cur_latest.and_then(|it| json_f64(&it["val"])).unwrap_or(0.0);
        let lt = debt_lt_latest.and_then(|it| json_f64(&it["val"])).unwrap_or(0.0);
        Some(cur + lt)
    } else {
        let liab_latest = latest_by_end(&liabilities);
        if asof_date.is_none() {
            asof_date = liab_latest
                .and_then(|it| it.get("end"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
        liab_latest.and_then(|it| json_f64(&it["val"]))
    };

    let debt_to_equity = match (debt_val, equity_val) {
        (Some(d), Some(e)) if e != 0.0 => Some(d / e),
        _ => None,
    };

    let roe = match (net_income_ttm, equity_val) {
        (Some(ni), Some(e)) if e != 0.0 => Some(ni / e),
        _ => None,
    };

    let mut out = ProviderResult::success();
    out.asof_date = asof_date;
    out.revenue_ttm = revenue_ttm;
    out.net_income_ttm = net_income_ttm;
    out.fcf_ttm = fcf_ttm;
    out.debt_to_equity = debt_to_equity;
    out.roe = roe;
    out
}

/// All USD facts reported under a us-gaap tag, or empty when absent.
fn facts_series<'a>(facts: &'a Value, tag: &str) -> Vec<&'a Value> {
    facts
        .get("facts")
        .and_then(|v| v.get("us-gaap"))
        .and_then(|v| v.get(tag))
        .and_then(|v| v.get("units"))
        .and_then(|v| v.get("USD"))
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().collect())
        .unwrap_or_default()
}

/// The four most recent quarterly observations, newest first. Only
/// quarterly periods from real filings count; ISO dates sort
/// lexicographically so `end` strings compare directly.
fn last_n_quarters<'a>(items: &[&'a Value], n: usize) -> Vec<&'a Value> {
    let mut filtered: Vec<&Value> = items
        .iter()
        .copied()
        .filter(|it| {
            let form = it.get("form").and_then(|v| v.as_str()).unwrap_or("").to_uppercase();
            let fp = it.get("fp").and_then(|v| v.as_str()).unwrap_or("").to_uppercase();
            QUARTER_FORMS.contains(&form.as_str())
                && QUARTER_PERIODS.contains(&fp.as_str())
                && it.get("end").and_then(|v| v.as_str()).is_some()
        })
        .collect();

    filtered.sort_by(|a, b| {
        let ea = a.get("end").and_then(|v| v.as_str()).unwrap_or("");
        let eb = b.get("end").and_then(|v| v.as_str()).unwrap_or("");
        eb.cmp(ea)
    });
    filtered.truncate(n);
    filtered
}

fn sum_vals(items: &[&Value]) -> Option<f64> {
    let vals: Vec<f64> = items
        .iter()
        .filter_map(|it| it.get("val").and_then(json_f64))
        .collect();
    if vals.is_empty() {
        None
    } else {
        Some(vals.iter().sum())
    }
}

fn latest_by_end<'a>(items: &[&'a Value]) -> Option<&'a Value> {
    items
        .iter()
        .copied()
        .filter(|it| it.get("end").and_then(|v| v.as_str()).is_some())
        .max_by(|a, b| {
            let ea = a.get("end").and_then(|v| v.as_str()).unwrap_or("");
            let eb = b.get("end").and_then(|v| v.as_str()).unwrap_or("");
            ea.cmp(eb)
        })
}

fn latest_fiscal_year_val(items: &[&Value]) -> Option<f64> {
    let annual: Vec<&Value> = items
        .iter()
        .copied()
        .filter(|it| {
            it.get("fp")
                .and_then(|v| v.as_str())
                .map(|fp| fp.eq_ignore_ascii_case("FY"))
                .unwrap_or(false)
        })
        .collect();
    latest_by_end(&annual).and_then(|it| it.get("val").and_then(json_f64))
}

use crate::models::{now_iso, FundamentalsRecord, Market};
use crate::providers::ProviderResult;

/// Label describing which providers contributed to a merged record.
pub fn pick_source(market: Market, sec: &ProviderResult, yahoo: &ProviderResult) -> &'static str {
    if market == Market::In {
        return "screener";
    }
    if sec.is_ok() && yahoo.status != "skipped" {
        return "sec+yf";
    }
    if sec.is_ok() {
        return "sec";
    }
    "yf"
}

/// US merge: filings data wins for the TTM and balance-sheet fields when
/// the filings lookup succeeded; market pricing (currency, market cap,
/// P/E, P/B) always comes from the quote provider since filings carry no
/// prices.
pub fn merge_domestic(
    market: Market,
    symbol: &str,
    sec: &ProviderResult,
    yahoo: &ProviderResult,
) -> FundamentalsRecord {
    let filings_first = |sec_val: Option<f64>, yahoo_val: Option<f64>| {
        if sec.is_ok() {
            sec_val
        } else {
            yahoo_val
        }
    };

    FundamentalsRecord {
        market: market.as_str().to_string(),
        symbol: symbol.to_uppercase(),
        currency: yahoo.currency.clone(),
        asof_date: sec.asof_date.clone(),
        updated_at: now_iso(),
        source: Some(pick_source(market, sec, yahoo).to_string()),
        market_cap: yahoo.market_cap,
        pe: yahoo.pe,
        pb: yahoo.pb,
        revenue_ttm: filings_first(sec.revenue_ttm, yahoo.revenue_ttm),
        net_income_ttm: filings_first(sec.net_income_ttm, yahoo.net_income_ttm),
        fcf_ttm: filings_first(sec.fcf_ttm, yahoo.fcf_ttm),
        debt_to_equity: filings_first(sec.debt_to_equity, yahoo.debt_to_equity),
        roe: filings_first(sec.roe, yahoo.roe),
        raw_json: None,
    }
}

/// IN merge: the scrape snapshot is authoritative for every field; it
/// carries no TTM figures, so those stay null.
pub fn merge_foreign(market: Market, symbol: &str, screener: &ProviderResult) -> FundamentalsRecord {
    FundamentalsRecord {
        market: market.as_str().to_string(),
        symbol: symbol.to_uppercase(),
        currency: screener.currency.clone(),
        asof_date: None,
        updated_at: now_iso(),
        source: Some("screener".to_string()),
        market_cap: screener.market_cap,
        pe: screener.pe,
        pb: screener.pb,
        revenue_ttm: None,
        net_income_ttm: None,
        fcf_ttm: None,
        debt_to_equity: None,
        roe: screener.roe,
        raw_json: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sec_ok() -> ProviderResult {
        let mut out = ProviderResult::success();
        out.revenue_ttm = Some(100.0);
        out.net_income_ttm = Some(20.0);
        out.debt_to_equity = Some(1.5);
        out.roe = Some(0.3);
        out.asof_date = Some("2024-06-30".to_string());
        out
    }

    fn yahoo_ok() -> ProviderResult {
        let mut out = ProviderResult::success();
        out.currency = Some("USD".to_string());
        out.market_cap = Some(3.0e12);
        out.pe = Some(31.0);
        out.pb = Some(40.0);
        out.revenue_ttm = Some(200.0);
        out.net_income_ttm = Some(40.0);
        out.roe = Some(0.5);
        out
    }

    #[test]
    fn filings_win_ttm_fields_when_ok() {
        let merged = merge_domestic(Market::Us, "AAPL", &sec_ok(), &yahoo_ok());
        assert_eq!(merged.revenue_ttm, Some(100.0));
        assert_eq!(merged.net_income_ttm, Some(20.0));
        assert_eq!(merged.roe, Some(0.3));
        // pricing always from the quote side
        assert_eq!(merged.market_cap, Some(3.0e12));
        assert_eq!(merged.pe, Some(31.0));
        assert_eq!(merged.currency.as_deref(), Some("USD"));
        assert_eq!(merged.asof_date.as_deref(), Some("2024-06-30"));
        assert_eq!(merged.source.as_deref(), Some("sec+yf"));
    }

    #[test]
    fn quote_fields_fill_in_when_filings_failed() {
        let sec = ProviderResult::error("companyfacts fetch failed");
        let merged = merge_domestic(Market::Us, "AAPL", &sec, &yahoo_ok());
        assert_eq!(merged.revenue_ttm, Some(200.0));
        assert_eq!(merged.net_income_ttm, Some(40.0));
        assert_eq!(merged.roe, Some(0.5));
        assert_eq!(merged.source.as_deref(), Some("yf"));
    }

    #[test]
    fn filings_ok_means_filings_nulls_stand() {
        // Filings succeeded but reported no FCF: the quote value must not
        // leak through.
        let mut sec = sec_ok();
        sec.fcf_ttm = None;
        let mut yahoo = yahoo_ok();
        yahoo.fcf_ttm = Some(999.0);
        let merged = merge_domestic(Market::Us, "AAPL", &sec, &yahoo);
        assert_eq!(merged.fcf_ttm, None);
    }

    #[test]
    fn source_reflects_skipped_quote_provider() {
        let yahoo = ProviderResult::skipped("provider on cooldown");
        let merged = merge_domestic(Market::Us, "AAPL", &sec_ok(), &yahoo);
        assert_eq!(merged.source.as_deref(), Some("sec"));
        assert_eq!(merged.market_cap, None);
    }

    #[test]
    fn foreign_market_is_screener_authoritative() {
        let mut screener = ProviderResult::success();
        screener.currency = Some("INR".to_string());
        screener.market_cap = Some(1.845829e13);
        screener.pe = Some(27.5);
        screener.pb = Some(2.0);
        screener.roe = Some(0.0925);

        let merged = merge_foreign(Market::In, "RELIANCE.NS", &screener);
        assert_eq!(merged.market, "IN");
        assert_eq!(merged.symbol, "RELIANCE.NS");
        assert_eq!(merged.source.as_deref(), Some("screener"));
        assert_eq!(merged.pb, Some(2.0));
        assert_eq!(merged.revenue_ttm, None);
        assert_eq!(merged.asof_date, None);
    }

    #[test]
    fn symbols_are_normalized_upper() {
        let merged = merge_domestic(Market::Us, "aapl", &sec_ok(), &yahoo_ok());
        assert_eq!(merged.symbol, "AAPL");
    }
}

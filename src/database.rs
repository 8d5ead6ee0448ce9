use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::models::{now_iso, FundamentalsRecord};

/// SQLite-backed store for merged fundamentals and the SEC ticker->CIK
/// lookup table. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the cache database and ensure the schema.
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(database_path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(database_path)
                    .create_if_missing(true),
            )
            .await?;

        // WAL for concurrent readers during upserts
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fundamentals_latest (
                market        TEXT NOT NULL,
                symbol        TEXT NOT NULL,
                currency      TEXT,
                asof_date     TEXT,
                updated_at    TEXT NOT NULL,
                source        TEXT,

                market_cap    REAL,
                pe            REAL,
                pb            REAL,

                revenue_ttm    REAL,
                net_income_ttm REAL,
                fcf_ttm        REAL,

                debt_to_equity REAL,
                roe            REAL,

                raw_json      TEXT,
                PRIMARY KEY (market, symbol)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sec_ticker_cik (
                symbol     TEXT PRIMARY KEY,
                cik10      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Fetch the cached fundamentals row for (market, symbol), if any.
    pub async fn get_fundamentals(
        &self,
        market: &str,
        symbol: &str,
    ) -> Result<Option<FundamentalsRecord>> {
        let row = sqlx::query(
            "SELECT * FROM fundamentals_latest WHERE market = ? AND symbol = ?",
        )
        .bind(market.to_uppercase())
        .bind(symbol.to_uppercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FundamentalsRecord {
            market: row.get("market"),
            symbol: row.get("symbol"),
            currency: row.get("currency"),
            asof_date: row.get("asof_date"),
            updated_at: row.get("updated_at"),
            source: row.get("source"),
            market_cap: row.get("market_cap"),
            pe: row.get("pe"),
            pb: row.get("pb"),
            revenue_ttm: row.get("revenue_ttm"),
            net_income_ttm: row.get("net_income_ttm"),
            fcf_ttm: row.get("fcf_ttm"),
            debt_to_equity: row.get("debt_to_equity"),
            roe: row.get("roe"),
            raw_json: row.get("raw_json"),
        }))
    }

    /// Insert-or-replace the fundamentals row for the record's (market,
    /// symbol) key. Every column is replaced, including `updated_at`.
    pub async fn upsert_fundamentals(&self, record: &FundamentalsRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fundamentals_latest (
                market, symbol, currency, asof_date, updated_at, source,
                market_cap, pe, pb,
                revenue_ttm, net_income_ttm, fcf_ttm,
                debt_to_equity, roe, raw_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market, symbol) DO UPDATE SET
                currency = excluded.currency,
                asof_date = excluded.asof_date,
                updated_at = excluded.updated_at,
                source = excluded.source,
                market_cap = excluded.market_cap,
                pe = excluded.pe,
                pb = excluded.pb,
                revenue_ttm = excluded.revenue_ttm,
                net_income_ttm = excluded.net_income_ttm,
                fcf_ttm = excluded.fcf_ttm,
                debt_to_equity = excluded.debt_to_equity,
                roe = excluded.roe,
                raw_json = excluded.raw_json
            "#,
        )
        .bind(record.market.to_uppercase())
        .bind(record.symbol.to_uppercase())
        .bind(&record.currency)
        .bind(&record.asof_date)
        .bind(&record.updated_at)
        .bind(&record.source)
        .bind(record.market_cap)
        .bind(record.pe)
        .bind(record.pb)
        .bind(record.revenue_ttm)
        .bind(record.net_income_ttm)
        .bind(record.fcf_ttm)
        .bind(record.debt_to_equity)
        .bind(record.roe)
        .bind(&record.raw_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up the cached CIK mapping for a symbol: (cik10, updated_at).
    pub async fn get_cik(&self, symbol: &str) -> Result<Option<(String, String)>> {
        let row = sqlx::query("SELECT cik10, updated_at FROM sec_ticker_cik WHERE symbol = ?")
            .bind(symbol.to_uppercase())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| (row.get("cik10"), row.get("updated_at"))))
    }

    /// Store (or refresh) the CIK mapping for a symbol.
    pub async fn upsert_cik(&self, symbol: &str, cik10: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sec_ticker_cik (symbol, cik10, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                cik10 = excluded.cik10,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(symbol.to_uppercase())
        .bind(cik10)
        .bind(now_iso())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// True when a timestamp is absent, unparseable, or older than `ttl_days`.
pub fn is_stale(updated_at: Option<&str>, ttl_days: i64) -> bool {
    let Some(ts) = updated_at else {
        return true;
    };
    match DateTime::parse_from_rfc3339(ts) {
        Ok(parsed) => {
            let age = Utc::now() - parsed.with_timezone(&Utc);
            age.num_seconds() > ttl_days * 86_400
        }
        Err(_) => true,
    }
}

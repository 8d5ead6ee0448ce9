use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{is_stale, Database};
use crate::merge::{merge_domestic, merge_foreign};
use crate::models::{FundamentalsError, FundamentalsRecord, FundamentalsResponse, Market};
use crate::providers::{ScreenerProvider, SecEdgarProvider, YahooProvider};
use crate::singleflight::{Flight, SingleFlight};
use crate::throttle::CooldownGate;

/// How long a follower waits for the leader's result before computing on
/// its own.
const FOLLOWER_WAIT: Duration = Duration::from_secs(10);

type SharedOutcome = Result<FundamentalsResponse, FundamentalsError>;

/// Ties the providers, merge policy, cache and single-flight registry
/// together into the compute-and-cache flow. Cheap to clone; all state is
/// behind one Arc.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    db: Database,
    gate: Arc<CooldownGate>,
    sec: SecEdgarProvider,
    yahoo: YahooProvider,
    screener: ScreenerProvider,
    flights: SingleFlight<SharedOutcome>,
}

impl Engine {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db = Database::new(&config.database_path).await?;
        let gate = Arc::new(CooldownGate::new());
        let sec = SecEdgarProvider::new(&config, db.clone())?;
        let yahoo = YahooProvider::new(&config, gate.clone())?;
        let screener = ScreenerProvider::new(&config)?;

        Ok(Engine {
            inner: Arc::new(Inner {
                config,
                db,
                gate,
                sec,
                yahoo,
                screener,
                flights: SingleFlight::new(),
            }),
        })
    }

    /// Compute (or serve from cache) the fundamentals for one key.
    /// Concurrent callers for the same (market, symbol, refresh) key share
    /// a single computation; a follower that waits out the leader falls
    /// back to computing independently.
    pub async fn fundamentals(
        &self,
        market: Market,
        symbol: &str,
        force_refresh: bool,
    ) -> SharedOutcome {
        let sym = symbol.trim().to_uppercase();
        let key = format!("{}:{}:r{}", market.as_str(), sym, u8::from(force_refresh));

        let mut guard = match self.inner.flights.begin(&key) {
            Flight::Leader(guard) => guard,
            Flight::Follower(rx) => {
                if let Some(shared) = self.inner.flights.wait(rx, FOLLOWER_WAIT).await {
                    return shared;
                }
                // Leader took too long; compute independently rather than
                // hang. Duplicate upstream work is acceptable here.
                warn!(%key, "single-flight wait timed out, computing independently");
                return self.compute(market, &sym, force_refresh).await;
            }
        };

        let outcome = self.compute(market, &sym, force_refresh).await;
        self.inner.flights.publish(&mut guard, outcome.clone());
        outcome
    }

    async fn compute(&self, market: Market, sym: &str, force_refresh: bool) -> SharedOutcome {
        let inner = &self.inner;
        let fail = || FundamentalsError {
            market: market.as_str().to_string(),
            symbol: sym.to_string(),
        };

        let ttl_days = match market {
            Market::Us => inner.config.cache_ttl_days_us,
            Market::In => inner.config.cache_ttl_days_in,
        };

        let cached = inner
            .db
            .get_fundamentals(market.as_str(), sym)
            .await
            .map_err(|e| {
                error!(symbol = sym, error = %e, "cache read failed");
                fail()
            })?;

        if let Some(row) = &cached {
            if !force_refresh && !is_stale(Some(&row.updated_at), ttl_days) {
                return Ok(FundamentalsResponse::from(row.clone()));
            }
        }

        let merged = match market {
            Market::In => {
                let snapshot = inner.screener.fetch_snapshot(sym, force_refresh).await;
                if !snapshot.is_ok() {
                    // A dead scrape still beats nothing: serve the stale
                    // row when one exists.
                    if let Some(row) = cached {
                        warn!(symbol = sym, "scrape failed, serving stale cache");
                        return Ok(FundamentalsResponse::from(row));
                    }
                    return Err(fail());
                }

                let mut merged = merge_foreign(market, sym, &snapshot);
                merged.raw_json = Some(
                    json!({
                        "debug": {"provider": "screener", "detail": snapshot.detail},
                        "screener": snapshot.diagnostics,
                    })
                    .to_string(),
                );
                merged
            }
            Market::Us => {
                // A known-unavailable quote provider is not worth blocking
                // on when stale data is at hand.
                if !force_refresh && cached.is_some() && inner.gate.is_blocked() {
                    info!(symbol = sym, "quote provider cooling down, serving stale cache");
                    return Ok(FundamentalsResponse::from(cached.unwrap()));
                }

                let sec = inner.sec.fetch_metrics(sym).await;
                let allow_heavy = force_refresh && inner.config.yahoo_heavy_on_refresh_only;
                let yahoo = inner.yahoo.fetch_summary(sym, allow_heavy).await;

                let mut merged = merge_domestic(market, sym, &sec, &yahoo);
                merged.raw_json = Some(
                    json!({"debug": {
                        "sec_ok": sec.is_ok(),
                        "sec_detail": sec.detail,
                        "yf_skipped": yahoo.status == "skipped",
                        "yf_detail": yahoo.detail,
                        "cooldown_active": inner.gate.is_blocked(),
                        "allow_heavy": allow_heavy,
                    }})
                    .to_string(),
                );
                merged
            }
        };

        self.persist(merged, fail).await
    }

    async fn persist(
        &self,
        merged: FundamentalsRecord,
        fail: impl Fn() -> FundamentalsError,
    ) -> SharedOutcome {
        let inner = &self.inner;
        inner.db.upsert_fundamentals(&merged).await.map_err(|e| {
            error!(symbol = %merged.symbol, error = %e, "cache write failed");
            fail()
        })?;

        let row = inner
            .db
            .get_fundamentals(&merged.market, &merged.symbol)
            .await
            .ok()
            .flatten()
            .unwrap_or(merged);
        Ok(FundamentalsResponse::from(row))
    }
}

//! Velo derivatives adapter.
//!
//! Velo answers with CSV rather than JSON. The snapshot query pulls a daily
//! window of futures rows per coin and condenses it into one record per coin
//! with current open interest, the drawdown from the window's OI peak, and a
//! cross-sectional funding percentile.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::connector::{classify_parse, classify_status, classify_transport, Connector, FetchFuture};
use crate::domain::now_ms;
use crate::error::FetchError;
use crate::http::{HttpClient, HttpRequest};
use crate::query::QueryKind;
use crate::{NormalizedRecord, ProviderId};

/// Daily resolution window backing the OI drawdown calculation.
const SNAPSHOT_WINDOW_DAYS: i64 = 8;

pub struct VeloConnector {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl VeloConnector {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    async fn fetch_snapshot(&self) -> Result<Vec<NormalizedRecord>, FetchError> {
        let end = now_ms();
        let begin = end - SNAPSHOT_WINDOW_DAYS * 24 * 60 * 60 * 1000;
        let request = HttpRequest::get(format!("{}/rows", self.config.base_url))
            .with_query("type", "futures")
            .with_query("columns", "dollar_open_interest_close,funding_rate")
            .with_query("resolution", "1d")
            .with_query("begin", begin.to_string())
            .with_query("end", end.to_string())
            .with_auth(self.config.auth.clone())
            .with_timeout(self.config.sla_timeout);

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| classify_transport(self.id(), e, self.config.sla_timeout))?;
        if !response.is_success() {
            return Err(classify_status(self.id(), &response));
        }

        self.condense(&response.body)
    }

    /// Fold the raw per-day rows into one record per coin.
    fn condense(&self, body: &str) -> Result<Vec<NormalizedRecord>, FetchError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(body.as_bytes());

        let mut by_coin: BTreeMap<String, CoinWindow> = BTreeMap::new();
        for row in reader.deserialize::<VeloRow>() {
            let row = row.map_err(|e| classify_parse(self.id(), format!("csv row: {e}")))?;
            let coin = row.coin.trim().to_lowercase();
            if coin.is_empty() {
                continue;
            }

            let window = by_coin.entry(coin).or_default();
            if let Some(oi) = row.dollar_open_interest_close.filter(|v| v.is_finite()) {
                window.peak_oi = window.peak_oi.max(oi);
                window.latest_oi = Some(oi);
            }
            if let Some(funding) = row.funding_rate.filter(|v| v.is_finite()) {
                window.latest_funding = Some(funding);
            }
        }

        if by_coin.is_empty() {
            return Err(classify_parse(self.id(), "snapshot csv contained no rows"));
        }

        let fundings: Vec<f64> = by_coin
            .values()
            .filter_map(|window| window.latest_funding)
            .collect();

        let mut records = Vec::with_capacity(by_coin.len());
        for (coin, window) in by_coin {
            let mut record = NormalizedRecord::new(&coin, self.id())
                .map_err(|e| classify_parse(self.id(), e.to_string()))?;

            if let Some(latest) = window.latest_oi {
                record = record
                    .with_number("open_interest", latest)
                    .map_err(|e| classify_parse(self.id(), e.to_string()))?;
                if window.peak_oi > 0.0 {
                    let drop_pct = ((window.peak_oi - latest) / window.peak_oi * 100.0).max(0.0);
                    record = record
                        .with_number("oi_drop_pct", drop_pct)
                        .map_err(|e| classify_parse(self.id(), e.to_string()))?;
                }
            }
            if let Some(funding) = window.latest_funding {
                record = record
                    .with_number("funding_rate", funding)
                    .map_err(|e| classify_parse(self.id(), e.to_string()))?;
                record = record
                    .with_number("funding_percentile", percentile_of(&fundings, funding))
                    .map_err(|e| classify_parse(self.id(), e.to_string()))?;
            }
            records.push(record);
        }
        Ok(records)
    }
}

#[derive(Default)]
struct CoinWindow {
    peak_oi: f64,
    latest_oi: Option<f64>,
    latest_funding: Option<f64>,
}

/// Share of values at or below `value`, as 0..=100.
fn percentile_of(values: &[f64], value: f64) -> f64 {
    if values.is_empty() {
        return 50.0;
    }
    let at_or_below = values.iter().filter(|v| **v <= value).count();
    at_or_below as f64 / values.len() as f64 * 100.0
}

impl Connector for VeloConnector {
    fn id(&self) -> ProviderId {
        ProviderId::Velo
    }

    fn supports(&self, query: &QueryKind) -> bool {
        matches!(query, QueryKind::DerivativesSnapshot)
    }

    fn fetch<'a>(&'a self, query: &'a QueryKind) -> FetchFuture<'a> {
        Box::pin(async move {
            match query {
                QueryKind::DerivativesSnapshot => self.fetch_snapshot().await,
                other => Err(classify_parse(
                    self.id(),
                    format!("unsupported query {}", other.signature()),
                )),
            }
        })
    }
}

#[derive(Deserialize)]
struct VeloRow {
    #[serde(default)]
    coin: String,
    dollar_open_interest_close: Option<f64>,
    funding_rate: Option<f64>,
}

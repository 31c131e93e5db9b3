//! CoinGecko Pro adapter.
//!
//! Serves the global market snapshot, ranked asset listings, and the sector
//! category listing. Auth is an API key in the `x-cg-pro-api-key` header.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::connector::{classify_parse, classify_status, classify_transport, Connector, FetchFuture};
use crate::error::FetchError;
use crate::http::{HttpClient, HttpRequest};
use crate::query::QueryKind;
use crate::{NormalizedRecord, ProviderId};

pub struct CoingeckoConnector {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl CoingeckoConnector {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!("{}{path}", self.config.base_url))
            .with_auth(self.config.auth.clone())
            .with_timeout(self.config.sla_timeout)
    }

    async fn fetch_global(&self) -> Result<Vec<NormalizedRecord>, FetchError> {
        let body = self.execute(self.request("/global")).await?;
        let envelope: GlobalEnvelope = serde_json::from_str(&body)
            .map_err(|e| classify_parse(self.id(), format!("global payload: {e}")))?;
        let data = envelope.data;

        let mut record = NormalizedRecord::new("global", self.id())
            .map_err(|e| classify_parse(self.id(), e.to_string()))?;
        if let Some(cap) = data.total_market_cap.get("usd") {
            record = self.number(record, "total_market_cap", *cap)?;
        }
        if let Some(volume) = data.total_volume.get("usd") {
            record = self.number(record, "total_volume_24h", *volume)?;
        }
        if let Some(btc) = data.market_cap_percentage.get("btc") {
            record = self.number(record, "btc_dominance", *btc)?;
        }
        if let Some(change) = data.market_cap_change_percentage_24h_usd {
            record = self.number(record, "market_cap_change_24h", change)?;
        }
        Ok(vec![record])
    }

    async fn fetch_top_assets(&self, limit: usize) -> Result<Vec<NormalizedRecord>, FetchError> {
        let request = self
            .request("/coins/markets")
            .with_query("vs_currency", "usd")
            .with_query("order", "market_cap_desc")
            .with_query("per_page", limit.to_string())
            .with_query("page", "1")
            .with_query("price_change_percentage", "24h,7d");

        let body = self.execute(request).await?;
        let markets: Vec<MarketRow> = serde_json::from_str(&body)
            .map_err(|e| classify_parse(self.id(), format!("markets payload: {e}")))?;

        let mut records = Vec::with_capacity(markets.len());
        for row in markets {
            let mut record = match NormalizedRecord::new(&row.id, self.id()) {
                Ok(record) => record.with_text("name", &row.name).with_text("symbol", &row.symbol),
                // Rows without an id are unusable, skip them.
                Err(_) => continue,
            };
            if let Some(price) = row.current_price {
                record = self.number(record, "price", price)?;
            }
            if let Some(cap) = row.market_cap {
                record = self.number(record, "market_cap", cap)?;
            }
            if let Some(volume) = row.total_volume {
                record = self.number(record, "volume_24h", volume)?;
            }
            if let Some(change) = row.price_change_percentage_24h_in_currency {
                record = self.number(record, "change_24h", change)?;
            }
            if let Some(change) = row.price_change_percentage_7d_in_currency {
                record = self.number(record, "change_7d", change)?;
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn fetch_categories(&self) -> Result<Vec<NormalizedRecord>, FetchError> {
        let request = self
            .request("/coins/categories")
            .with_query("order", "market_cap_desc");

        let body = self.execute(request).await?;
        let categories: Vec<CategoryRow> = serde_json::from_str(&body)
            .map_err(|e| classify_parse(self.id(), format!("categories payload: {e}")))?;

        let mut records = Vec::with_capacity(categories.len());
        for row in categories {
            let mut record = match NormalizedRecord::new(&row.id, self.id()) {
                Ok(record) => record.with_text("name", &row.name),
                Err(_) => continue,
            };
            if let Some(cap) = row.market_cap {
                record = self.number(record, "market_cap", cap)?;
            }
            if let Some(change) = row.market_cap_change_24h {
                record = self.number(record, "momentum", change)?;
            }
            if let Some(volume) = row.volume_24h {
                record = self.number(record, "volume_24h", volume)?;
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn execute(&self, request: HttpRequest) -> Result<String, FetchError> {
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| classify_transport(self.id(), e, self.config.sla_timeout))?;
        if !response.is_success() {
            return Err(classify_status(self.id(), &response));
        }
        Ok(response.body)
    }

    /// Upstream occasionally emits nulls that deserialize as NaN through
    /// `f64` defaults; drop such fields instead of failing the whole fetch.
    fn number(
        &self,
        record: NormalizedRecord,
        name: &'static str,
        value: f64,
    ) -> Result<NormalizedRecord, FetchError> {
        if value.is_finite() {
            record
                .with_number(name, value)
                .map_err(|e| classify_parse(self.id(), e.to_string()))
        } else {
            Ok(record)
        }
    }
}

impl Connector for CoingeckoConnector {
    fn id(&self) -> ProviderId {
        ProviderId::Coingecko
    }

    fn supports(&self, query: &QueryKind) -> bool {
        matches!(
            query,
            QueryKind::GlobalMarket | QueryKind::TopAssets { .. } | QueryKind::Categories
        )
    }

    fn fetch<'a>(&'a self, query: &'a QueryKind) -> FetchFuture<'a> {
        Box::pin(async move {
            match query {
                QueryKind::GlobalMarket => self.fetch_global().await,
                QueryKind::TopAssets { limit } => self.fetch_top_assets(*limit).await,
                QueryKind::Categories => self.fetch_categories().await,
                other => Err(classify_parse(
                    self.id(),
                    format!("unsupported query {}", other.signature()),
                )),
            }
        })
    }
}

#[derive(Deserialize)]
struct GlobalEnvelope {
    data: GlobalData,
}

#[derive(Deserialize)]
struct GlobalData {
    #[serde(default)]
    total_market_cap: std::collections::HashMap<String, f64>,
    #[serde(default)]
    total_volume: std::collections::HashMap<String, f64>,
    #[serde(default)]
    market_cap_percentage: std::collections::HashMap<String, f64>,
    market_cap_change_percentage_24h_usd: Option<f64>,
}

#[derive(Deserialize)]
struct MarketRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    price_change_percentage_24h_in_currency: Option<f64>,
    price_change_percentage_7d_in_currency: Option<f64>,
}

#[derive(Deserialize)]
struct CategoryRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    market_cap: Option<f64>,
    market_cap_change_24h: Option<f64>,
    volume_24h: Option<f64>,
}

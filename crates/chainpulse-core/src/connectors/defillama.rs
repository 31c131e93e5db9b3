//! DefiLlama adapter.
//!
//! Protocol TVLs come from the main API host; yield pools live on a separate
//! yields host. Both endpoints are unauthenticated.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::connector::{classify_parse, classify_status, classify_transport, Connector, FetchFuture};
use crate::error::FetchError;
use crate::http::{HttpClient, HttpRequest};
use crate::query::QueryKind;
use crate::{NormalizedRecord, ProviderId};

pub struct DefillamaConnector {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl DefillamaConnector {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    async fn fetch_protocols(&self) -> Result<Vec<NormalizedRecord>, FetchError> {
        let request = HttpRequest::get(format!("{}/protocols", self.config.base_url))
            .with_timeout(self.config.sla_timeout);
        let body = self.execute(request).await?;

        let protocols: Vec<ProtocolRow> = serde_json::from_str(&body)
            .map_err(|e| classify_parse(self.id(), format!("protocols payload: {e}")))?;

        let mut records = Vec::with_capacity(protocols.len());
        for row in protocols {
            let entity = if row.slug.is_empty() { &row.name } else { &row.slug };
            let mut record = match NormalizedRecord::new(entity, self.id()) {
                Ok(record) => record.with_text("name", &row.name),
                Err(_) => continue,
            };
            if !row.category.is_empty() {
                record = record.with_text("category", &row.category);
            }
            if let Some(tvl) = row.tvl {
                record = self.number(record, "tvl", tvl)?;
            }
            if let Some(change) = row.change_1d {
                record = self.number(record, "tvl_change_1d", change)?;
            }
            if let Some(change) = row.change_7d {
                record = self.number(record, "tvl_change_7d", change)?;
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn fetch_yield_pools(&self) -> Result<Vec<NormalizedRecord>, FetchError> {
        // Yields live on their own host.
        let base = self
            .config
            .alt_base_url
            .as_deref()
            .unwrap_or(&self.config.base_url);
        let request =
            HttpRequest::get(format!("{base}/pools")).with_timeout(self.config.sla_timeout);
        let body = self.execute(request).await?;

        let envelope: PoolsEnvelope = serde_json::from_str(&body)
            .map_err(|e| classify_parse(self.id(), format!("pools payload: {e}")))?;

        let mut records = Vec::with_capacity(envelope.data.len());
        for row in envelope.data {
            let mut record = match NormalizedRecord::new(&row.pool, self.id()) {
                Ok(record) => record
                    .with_text("project", &row.project)
                    .with_text("chain", &row.chain)
                    .with_text("symbol", &row.symbol),
                Err(_) => continue,
            };
            if let Some(apy) = row.apy {
                record = self.number(record, "apy", apy)?;
            }
            if let Some(tvl) = row.tvl_usd {
                record = self.number(record, "tvl_usd", tvl)?;
            }
            if let Some(sigma) = row.sigma {
                record = self.number(record, "sigma", sigma)?;
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

impl Connector for DefillamaConnector {
    fn id(&self) -> ProviderId {
        ProviderId::Defillama
    }

    fn supports(&self, query: &QueryKind) -> bool {
        matches!(query, QueryKind::ProtocolTvls | QueryKind::YieldPools)
    }

    fn fetch<'a>(&'a self, query: &'a QueryKind) -> FetchFuture<'a> {
        Box::pin(async move {
            match query {
                QueryKind::ProtocolTvls => self.fetch_protocols().await,
                QueryKind::YieldPools => self.fetch_yield_pools().await,
                other => Err(classify_parse(
                    self.id(),
                    format!("unsupported query {}", other.signature()),
                )),
            }
        })
    }
}

#[derive(Deserialize)]
struct ProtocolRow {
    #[serde(default)]
    name: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    category: String,
    tvl: Option<f64>,
    change_1d: Option<f64>,
    change_7d: Option<f64>,
}

#[derive(Deserialize)]
struct PoolsEnvelope {
    #[serde(default)]
    data: Vec<PoolRow>,
}

#[derive(Deserialize)]
struct PoolRow {
    #[serde(default)]
    pool: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    chain: String,
    #[serde(default)]
    symbol: String,
    apy: Option<f64>,
    #[serde(rename = "tvlUsd")]
    tvl_usd: Option<f64>,
    sigma: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, StaticHttpClient};

    fn connector(client: Arc<StaticHttpClient>) -> DefillamaConnector {
        DefillamaConnector::new(ProviderConfig::defillama(), client)
    }

    #[tokio::test]
    async fn parses_protocol_listing() {
        let body = r#"[
            {"name":"AAVE","slug":"aave","category":"Lending",
             "tvl":11800000000.0,"change_1d":0.4,"change_7d":3.2},
            {"name":"Lido","slug":"lido","category":"Liquid Staking",
             "tvl":24500000000.0,"change_1d":-0.2,"change_7d":null}
        ]"#;
        let client = Arc::new(StaticHttpClient::always(HttpResponse::ok(body)));
        let connector = connector(client);

        let records = connector
            .fetch(&QueryKind::ProtocolTvls)
            .await
            .expect("parsed");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity, "aave");
        assert_eq!(records[0].text("category"), Some("Lending"));
        assert_eq!(records[0].number("tvl_change_7d"), Some(3.2));
        assert_eq!(records[1].number("tvl_change_7d"), None);
    }

    #[tokio::test]
    async fn yield_pools_hit_the_yields_host() {
        let body = r#"{"status":"success","data":[
            {"pool":"747c1d2a-c668-4682-b9f9-296708a3dd90","project":"lido",
             "chain":"Ethereum","symbol":"STETH","apy":3.1,"tvlUsd":24100000000.0,"sigma":0.02}
        ]}"#;
        let client = Arc::new(StaticHttpClient::always(HttpResponse::ok(body)));
        let connector = connector(client.clone());

        let records = connector
            .fetch(&QueryKind::YieldPools)
            .await
            .expect("parsed");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number("apy"), Some(3.1));
        assert_eq!(records[0].number("tvl_usd"), Some(24_100_000_000.0));

        let url = client.seen_urls().pop().expect("one call");
        assert!(url.starts_with("https://yields.llama.fi/pools"));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let client = Arc::new(StaticHttpClient::always(HttpResponse::with_status(
            503, "maintenance",
        )));
        let connector = connector(client);

        let error = connector
            .fetch(&QueryKind::ProtocolTvls)
            .await
            .expect_err("must fail");
        assert!(error.is_transient());
    }
}

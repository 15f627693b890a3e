//! Market discovery.
//!
//! `GammaDiscovery` resolves configured event slugs through the Gamma API;
//! `StaticDiscovery` serves the market list from the config file.

use std::time::Duration;

use pmm_core::{Market, MarketId, Price, Size, TokenId};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, MarketDiscovery};

/// Tick size when the venue omits it.
const DEFAULT_TICK_SIZE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Raw Gamma event.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    markets: Vec<RawMarket>,
}

/// Raw Gamma market. Numeric fields arrive as numbers or strings.
#[derive(Debug, Deserialize)]
struct RawMarket {
    #[serde(rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    question: Option<String>,
    /// JSON-encoded array inside a string, e.g. `"[\"1\", \"2\"]"`.
    #[serde(rename = "clobTokenIds", default)]
    clob_token_ids: Option<Value>,
    #[serde(rename = "orderPriceMinTickSize", default)]
    tick_size: Option<Value>,
    #[serde(rename = "orderMinSize", default)]
    min_size: Option<Value>,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    closed: Option<bool>,
    #[serde(rename = "acceptingOrders", default)]
    accepting_orders: Option<bool>,
}

/// Decode a numeric field that may be a JSON number or a string.
fn decimal_field(value: &Option<Value>) -> Option<Decimal> {
    match value.as_ref()? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Decode `clobTokenIds`: YES is the first id, NO the second.
fn token_ids(value: &Option<Value>) -> Result<(TokenId, TokenId), String> {
    let ids: Vec<String> = match value {
        Some(Value::String(s)) => {
            serde_json::from_str(s).map_err(|e| format!("clobTokenIds: {e}"))?
        }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => return Err("missing clobTokenIds".to_string()),
    };
    match ids.as_slice() {
        [yes, no, ..] => Ok((TokenId::new(yes.clone()), TokenId::new(no.clone()))),
        _ => Err(format!("expected 2 token ids, got {}", ids.len())),
    }
}

fn market_from_raw(raw: RawMarket, event_title: Option<&str>) -> Result<Market, String> {
    let (yes_token, no_token) = token_ids(&raw.clob_token_ids)?;
    let tick = decimal_field(&raw.tick_size).unwrap_or(DEFAULT_TICK_SIZE);
    let min_size = decimal_field(&raw.min_size).unwrap_or(Decimal::ZERO);
    let active = raw.active.unwrap_or(true)
        && !raw.closed.unwrap_or(false)
        && raw.accepting_orders.unwrap_or(true);

    let market = Market {
        id: MarketId::new(raw.condition_id),
        question: raw
            .question
            .or_else(|| event_title.map(str::to_string))
            .unwrap_or_default(),
        yes_token,
        no_token,
        tick_size: Price::new(tick),
        min_order_size: Size::new(min_size),
        active,
    };
    market.validate().map_err(|e| e.to_string())?;
    Ok(market)
}

/// Gamma API discovery over a fixed set of event slugs.
pub struct GammaDiscovery {
    client: Client,
    base_url: String,
    slugs: Vec<String>,
}

impl GammaDiscovery {
    pub fn new(
        base_url: impl Into<String>,
        slugs: Vec<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            slugs,
        })
    }

    async fn fetch_event(&self, slug: &str) -> GatewayResult<Option<RawEvent>> {
        let url = format!("{}/events/slug/{}", self.base_url, slug);
        info!(url = %url, "Fetching event");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("HTTP {status}")));
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn discover(&self) -> GatewayResult<Vec<Market>> {
        let mut markets = Vec::new();
        let mut last_error = None;

        for slug in &self.slugs {
            let event = match self.fetch_event(slug).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    warn!(slug = %slug, "No event found");
                    continue;
                }
                Err(e) => {
                    warn!(slug = %slug, error = %e, "Event request failed");
                    last_error = Some(e);
                    continue;
                }
            };

            if event.markets.is_empty() {
                warn!(slug = %slug, "Event has no markets");
            }
            let title = event.title.as_deref();
            for raw in event.markets {
                let condition_id = raw.condition_id.clone();
                match market_from_raw(raw, title) {
                    Ok(market) => {
                        debug!(
                            market = %market.id,
                            tick = %market.tick_size,
                            min_size = %market.min_order_size,
                            active = market.active,
                            "Discovered market"
                        );
                        markets.push(market);
                    }
                    Err(reason) => {
                        warn!(slug = %slug, market = %condition_id, reason = %reason, "Skipping market");
                    }
                }
            }
        }

        // Total failure is surfaced so the caller keeps its previous list.
        if markets.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(markets)
    }
}

impl MarketDiscovery for GammaDiscovery {
    fn list_tradable_markets(&self) -> BoxFuture<'_, GatewayResult<Vec<Market>>> {
        Box::pin(self.discover())
    }
}

/// Markets listed in the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    markets: Vec<Market>,
}

impl StaticDiscovery {
    pub fn new(markets: Vec<Market>) -> Self {
        Self { markets }
    }
}

impl MarketDiscovery for StaticDiscovery {
    fn list_tradable_markets(&self) -> BoxFuture<'_, GatewayResult<Vec<Market>>> {
        Box::pin(async move { Ok(self.markets.clone()) })
    }
}

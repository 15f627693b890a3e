//! Read-only CLOB REST client.
//!
//! Fetches order books over `GET {base}/book?token_id=`. Authenticated order
//! entry lives outside this repository, so mutating calls are unsupported;
//! wrap this client in `DryRunGateway` for observation mode.

use std::time::Duration;

use pmm_core::{BookSnapshot, Fill, LiveOrder, OrderId, OrderRequest, Price, TokenId};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, OrderGateway};

/// Raw price level as sent by the venue (decimal strings).
#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

/// Raw `/book` response.
#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

/// Read-only book client for the CLOB REST API.
pub struct ClobRestClient {
    client: Client,
    base_url: String,
}

impl ClobRestClient {
    /// Create a new client. `timeout` bounds every HTTP request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_book(&self, token: TokenId) -> GatewayResult<BookSnapshot> {
        let url = format!("{}/book", self.base_url);
        debug!(token = %token.short(), "Fetching book");

        let response = self
            .client
            .get(&url)
            .query(&[("token_id", token.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("HTTP {status}")));
        }

        let body = response.text().await?;
        let raw: RawBook =
            serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        let received_at = chrono::Utc::now().timestamp_millis().max(0) as u64;
        decode_book(token, raw, received_at)
    }
}

/// Reduce a raw book to its top: highest bid, lowest ask.
///
/// Levels with zero size are ignored. The snapshot is stamped with the local
/// receive time so staleness is measured on our own clock.
fn decode_book(token: TokenId, raw: RawBook, received_at_ms: u64) -> GatewayResult<BookSnapshot> {
    let best = |levels: &[RawLevel], want_max: bool| -> GatewayResult<Option<Price>> {
        let mut best: Option<Price> = None;
        for level in levels {
            let price: Price = level
                .price
                .parse()
                .map_err(|e| GatewayError::Decode(format!("price {:?}: {e}", level.price)))?;
            let size: Decimal = level
                .size
                .parse()
                .map_err(|e| GatewayError::Decode(format!("size {:?}: {e}", level.size)))?;
            if size <= Decimal::ZERO {
                continue;
            }
            best = Some(match best {
                None => price,
                Some(b) if want_max => b.max(price),
                Some(b) => b.min(price),
            });
        }
        Ok(best)
    };

    let best_bid = best(&raw.bids, true)?;
    let best_ask = best(&raw.asks, false)?;
    Ok(BookSnapshot::new(token, best_bid, best_ask, received_at_ms))
}

impl OrderGateway for ClobRestClient {
    fn get_book(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<BookSnapshot>> {
        Box::pin(self.fetch_book(token))
    }

    fn place_order(&self, _request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderId>> {
        Box::pin(async {
            Err(GatewayError::Unsupported(
                "order placement requires an authenticated gateway".to_string(),
            ))
        })
    }

    fn cancel_order(&self, _order_id: OrderId) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(async {
            Err(GatewayError::Unsupported(
                "order cancellation requires an authenticated gateway".to_string(),
            ))
        })
    }

    fn poll_fills(&self) -> BoxFuture<'_, GatewayResult<Vec<Fill>>> {
        Box::pin(async {
            Err(GatewayError::Unsupported(
                "fill polling requires an authenticated gateway".to_string(),
            ))
        })
    }

    fn open_orders(&self, _token: TokenId) -> BoxFuture<'_, GatewayResult<Vec<LiveOrder>>> {
        Box::pin(async {
            Err(GatewayError::Unsupported(
                "open orders require an authenticated gateway".to_string(),
            ))
        })
    }

    fn position(&self, _token: TokenId) -> BoxFuture<'_, GatewayResult<Decimal>> {
        Box::pin(async {
            Err(GatewayError::Unsupported(
                "token balances require an authenticated gateway".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(json: &str) -> RawBook {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_decode_picks_top_of_book() {
        // The venue does not guarantee level ordering.
        let book = raw(
            r#"{
                "market": "0xabc",
                "asset_id": "123",
                "bids": [{"price": "0.44", "size": "100"}, {"price": "0.48", "size": "20"}],
                "asks": [{"price": "0.60", "size": "5"}, {"price": "0.52", "size": "7.5"}],
                "hash": "h"
            }"#,
        );
        let snap = decode_book(TokenId::new("123"), book, 42).unwrap();
        assert_eq!(snap.best_bid, Some(Price::new(dec!(0.48))));
        assert_eq!(snap.best_ask, Some(Price::new(dec!(0.52))));
        assert_eq!(snap.timestamp_ms, 42);
    }

    #[test]
    fn test_decode_skips_empty_levels() {
        let book = raw(
            r#"{"bids": [{"price": "0.49", "size": "0"}], "asks": []}"#,
        );
        let snap = decode_book(TokenId::new("1"), book, 0).unwrap();
        assert_eq!(snap.best_bid, None);
        assert_eq!(snap.best_ask, None);
    }

    #[test]
    fn test_decode_rejects_bad_numbers() {
        let book = raw(r#"{"bids": [{"price": "abc", "size": "1"}]}"#);
        assert!(matches!(
            decode_book(TokenId::new("1"), book, 0),
            Err(GatewayError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_unsupported() {
        let client = ClobRestClient::new("http://localhost:1", Duration::from_millis(10)).unwrap();
        assert!(matches!(
            client.cancel_order(OrderId::new("x")).await,
            Err(GatewayError::Unsupported(_))
        ));
        assert!(matches!(
            client.position(TokenId::new("1")).await,
            Err(GatewayError::Unsupported(_))
        ));
    }
}

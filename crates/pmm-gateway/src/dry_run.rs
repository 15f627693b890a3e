//! Observation-mode gateway.
//!
//! Reads go to the wrapped gateway. Mutating calls are logged and answered
//! locally so the market loop runs its full pipeline without touching the
//! venue.

use parking_lot::Mutex;
use pmm_core::{BookSnapshot, Fill, LiveOrder, OrderId, OrderRequest, TokenId};
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, DynGateway, OrderGateway};

/// Gateway wrapper that never calls mutating endpoints.
pub struct DryRunGateway {
    inner: DynGateway,
    /// Synthetic resting orders, so reconciliation sees a consistent venue.
    resting: Mutex<Vec<LiveOrder>>,
}

impl DryRunGateway {
    pub fn new(inner: DynGateway) -> Self {
        Self {
            inner,
            resting: Mutex::new(Vec::new()),
        }
    }

    /// Number of synthetic resting orders.
    #[must_use]
    pub fn resting_count(&self) -> usize {
        self.resting.lock().len()
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

impl OrderGateway for DryRunGateway {
    fn get_book(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<BookSnapshot>> {
        self.inner.get_book(token)
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, GatewayResult<OrderId>> {
        Box::pin(async move {
            let order_id = OrderId::new(format!("dry-{}", uuid::Uuid::new_v4()));
            info!(
                dry_run = true,
                order_id = %order_id,
                token = %request.token.short(),
                side = %request.side,
                price = %request.price,
                size = %request.size,
                tif = %request.tif,
                "Would place order"
            );
            if !request.tif.is_immediate() {
                self.resting.lock().push(LiveOrder {
                    order_id: order_id.clone(),
                    token: request.token,
                    side: request.side,
                    price: request.price,
                    remaining: request.size,
                    submitted_at_ms: now_ms(),
                });
            }
            Ok(order_id)
        })
    }

    fn cancel_order(&self, order_id: OrderId) -> BoxFuture<'_, GatewayResult<()>> {
        Box::pin(async move {
            info!(dry_run = true, order_id = %order_id, "Would cancel order");
            let mut resting = self.resting.lock();
            let before = resting.len();
            resting.retain(|o| o.order_id != order_id);
            if resting.len() == before {
                return Err(GatewayError::OrderNotFound(order_id.to_string()));
            }
            Ok(())
        })
    }

    fn poll_fills(&self) -> BoxFuture<'_, GatewayResult<Vec<Fill>>> {
        // Dry orders never reach the venue, so they never fill.
        Box::pin(async { Ok(Vec::new()) })
    }

    fn open_orders(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<Vec<LiveOrder>>> {
        Box::pin(async move {
            Ok(self
                .resting
                .lock()
                .iter()
                .filter(|o| o.token == token)
                .cloned()
                .collect())
        })
    }

    fn position(&self, token: TokenId) -> BoxFuture<'_, GatewayResult<Decimal>> {
        // Dry orders never fill; whatever the account holds is real.
        self.inner.position(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{GatewayCall, MockGateway};
    use pmm_core::{OrderSide, Price, Size};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mutations_never_reach_inner() {
        let mock = Arc::new(MockGateway::new());
        let token = TokenId::new("yes");
        mock.set_book(
            &token,
            Some(Price::new(dec!(0.45))),
            Some(Price::new(dec!(0.55))),
            1,
        );
        let dry = DryRunGateway::new(mock.clone());

        let book = dry.get_book(token.clone()).await.unwrap();
        assert_eq!(book.mid(), Some(Price::new(dec!(0.50))));

        let id = dry
            .place_order(OrderRequest::passive(
                token.clone(),
                OrderSide::Buy,
                Price::new(dec!(0.44)),
                Size::new(dec!(5)),
            ))
            .await
            .unwrap();
        assert!(id.as_str().starts_with("dry-"));
        assert_eq!(dry.open_orders(token.clone()).await.unwrap().len(), 1);

        dry.cancel_order(id.clone()).await.unwrap();
        assert_eq!(dry.resting_count(), 0);
        assert!(matches!(
            dry.cancel_order(id).await,
            Err(GatewayError::OrderNotFound(_))
        ));

        assert_eq!(mock.calls(), vec![GatewayCall::GetBook(token)]);
    }

    #[tokio::test]
    async fn test_position_reads_through() {
        let mock = Arc::new(MockGateway::new());
        let token = TokenId::new("yes");
        mock.set_position(&token, dec!(12));
        let dry = DryRunGateway::new(mock.clone());

        assert_eq!(dry.position(token.clone()).await.unwrap(), dec!(12));
        assert_eq!(mock.calls(), vec![GatewayCall::Position(token)]);
    }

    #[tokio::test]
    async fn test_liquidation_does_not_rest() {
        let dry = DryRunGateway::new(Arc::new(MockGateway::new()));
        dry.place_order(OrderRequest::liquidation(
            TokenId::new("yes"),
            OrderSide::Sell,
            Price::new(dec!(0.40)),
            Size::new(dec!(5)),
        ))
        .await
        .unwrap();
        assert_eq!(dry.resting_count(), 0);
        assert!(dry.poll_fills().await.unwrap().is_empty());
    }
}

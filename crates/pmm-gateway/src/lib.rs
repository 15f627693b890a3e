//! Exchange-facing seams for the market maker.
//!
//! The quoting core never talks HTTP. It consumes two traits:
//! - `OrderGateway`: books, placement, cancellation, fills, open orders
//! - `MarketDiscovery`: the list of tradable markets
//!
//! Implementations here:
//! - `ClobRestClient`: read-only CLOB book client (mutations unsupported)
//! - `GammaDiscovery` / `StaticDiscovery`: market discovery
//! - `DryRunGateway`: observation-mode wrapper that never mutates the venue
//! - `MockGateway`: scriptable in-memory gateway for tests
//!
//! `CallPolicy` bounds every gateway call with a timeout and retries
//! transient failures with exponential backoff.

pub mod clob;
pub mod discovery;
pub mod dry_run;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod retry;

pub use clob::ClobRestClient;
pub use discovery::{GammaDiscovery, StaticDiscovery};
pub use dry_run::DryRunGateway;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{BoxFuture, DynDiscovery, DynGateway, MarketDiscovery, OrderGateway};
pub use mock::{GatewayCall, MockGateway};
pub use retry::{CallPolicy, GatewayConfig};

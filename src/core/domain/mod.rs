//! Pure domain types.

mod book;
mod currency;
mod cycle;
mod opportunity;
mod pair;
mod trade;

pub use book::{BookSide, OrderBook, PriceLevel};
pub use currency::Currency;
pub use cycle::Cycle;
pub use opportunity::Opportunity;
pub use pair::{Pair, PairCatalog};
pub use trade::{LegFill, TradeRecord, TradeStatus};

//! Scripted exchange adapter.
//!
//! Orders consume scripts in placement order, so a test declares exactly
//! what the exchange will do to each order the executor places.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use trireme::core::exchange::{
    ExchangeAdapter, FeeSchedule, OrderRequest, OrderState, OrderStatus, PairInfo, TickerQuote,
};
use trireme::error::{Error, Result};

/// What happens to one placed order.
#[derive(Debug, Clone)]
pub enum OrderScript {
    /// Fills at `price`; the fee is `fee_pct` percent of the executed
    /// notional, charged in `fee_currency` (quote-based when
    /// `fee_in_quote`, else volume-based).
    Fill {
        price: Decimal,
        fee_pct: Decimal,
        fee_in_quote: bool,
        fee_currency: Option<&'static str>,
    },
    /// Placement is rejected by the exchange.
    Reject(&'static str),
    /// The order reports `expired` on the first status poll.
    Expire,
    /// The order stays open until the caller's deadline passes.
    Timeout,
}

impl OrderScript {
    /// A clean top-of-book fill with fee charged in the received base.
    pub fn fill_base_fee(price: Decimal, fee_currency: &'static str) -> Self {
        Self::Fill {
            price,
            fee_pct: dec!(0.26),
            fee_in_quote: false,
            fee_currency: Some(fee_currency),
        }
    }

    /// A clean top-of-book fill with fee charged in the quote currency.
    pub fn fill_quote_fee(price: Decimal, fee_currency: &'static str) -> Self {
        Self::Fill {
            price,
            fee_pct: dec!(0.26),
            fee_in_quote: true,
            fee_currency: Some(fee_currency),
        }
    }
}

struct PlacedOrder {
    script: OrderScript,
    request: OrderRequest,
}

/// Scripted implementation of the exchange adapter.
pub struct ScriptedExchange {
    scripts: Mutex<VecDeque<OrderScript>>,
    orders: Mutex<HashMap<String, PlacedOrder>>,
    balances: Mutex<HashMap<String, Decimal>>,
    tickers: Mutex<HashMap<String, TickerQuote>>,
    next_id: AtomicU64,
    placed: Mutex<Vec<OrderRequest>>,
    canceled: Mutex<Vec<String>>,
}

impl ScriptedExchange {
    pub fn new(scripts: Vec<OrderScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            orders: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::from([("ZUSD".to_string(), dec!(1000))])),
            tickers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            placed: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
        }
    }

    /// Queue additional order scripts (e.g. for a later resolution order).
    pub fn push_scripts(&self, scripts: Vec<OrderScript>) {
        self.scripts.lock().extend(scripts);
    }

    pub fn set_ticker(&self, pair: &str, bid: Decimal, ask: Decimal, last: Decimal) {
        self.tickers
            .lock()
            .insert(pair.to_string(), TickerQuote { bid, ask, last });
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances.lock().insert(asset.to_string(), amount);
    }

    /// Every order the executor placed, in order.
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    /// Every cancel issued.
    pub fn canceled_orders(&self) -> Vec<String> {
        self.canceled.lock().clone()
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedExchange {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn list_pairs(&self, _max_pairs: usize) -> Result<Vec<PairInfo>> {
        Ok(Vec::new())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String> {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(OrderScript::Reject("no script for order"));

        self.placed.lock().push(request.clone());

        if let OrderScript::Reject(reason) = script {
            return Err(Error::Exchange(reason.to_string()));
        }

        let txid = format!("SCRIPT-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.orders.lock().insert(
            txid.clone(),
            PlacedOrder {
                script,
                request: request.clone(),
            },
        );
        Ok(txid)
    }

    async fn query_order(&self, txid: &str) -> Result<OrderStatus> {
        let orders = self.orders.lock();
        let order = orders
            .get(txid)
            .ok_or_else(|| Error::Exchange(format!("unknown order {txid}")))?;

        match &order.script {
            OrderScript::Fill {
                price,
                fee_pct,
                fee_in_quote,
                fee_currency,
            } => {
                let volume = order.request.volume;
                let fee = if *fee_in_quote {
                    volume * *price * *fee_pct / Decimal::ONE_HUNDRED
                } else {
                    volume * *fee_pct / Decimal::ONE_HUNDRED
                };
                Ok(OrderStatus {
                    state: OrderState::Closed,
                    price: *price,
                    executed_volume: volume,
                    fee,
                    fee_currency: fee_currency.map(ToString::to_string),
                })
            }
            OrderScript::Expire => Ok(OrderStatus {
                state: OrderState::Expired,
                price: Decimal::ZERO,
                executed_volume: Decimal::ZERO,
                fee: Decimal::ZERO,
                fee_currency: None,
            }),
            OrderScript::Timeout => Ok(OrderStatus {
                state: OrderState::Open,
                price: Decimal::ZERO,
                executed_volume: Decimal::ZERO,
                fee: Decimal::ZERO,
                fee_currency: None,
            }),
            OrderScript::Reject(_) => unreachable!("rejected orders are never stored"),
        }
    }

    async fn cancel_order(&self, txid: &str) -> Result<()> {
        self.canceled.lock().push(txid.to_string());
        Ok(())
    }

    async fn balance(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self.balances.lock().clone())
    }

    async fn fees(&self) -> Result<FeeSchedule> {
        Ok(FeeSchedule {
            taker_pct: dec!(0.26),
            maker_pct: dec!(0.16),
        })
    }

    async fn ticker(&self, pair: &str) -> Result<TickerQuote> {
        self.tickers
            .lock()
            .get(pair)
            .copied()
            .ok_or_else(|| Error::Exchange(format!("no ticker for {pair}")))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

//! Kraken REST client (public + authenticated private endpoints).

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::auth::{Credentials, NonceGenerator};
use crate::core::exchange::{
    ExchangeAdapter, FeeSchedule, OrderKind, OrderRequest, OrderState, OrderStatus, PairInfo,
    TickerQuote,
};
use crate::error::{Error, Result};

/// Default REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.kraken.com";

/// Fallback fee tier when the account lookup fails: Kraken's published
/// tier-0 taker/maker rates for spot pairs.
const DEFAULT_TAKER_FEE_PCT: &str = "0.26";
const DEFAULT_MAKER_FEE_PCT: &str = "0.16";

/// Authenticated Kraken REST client.
pub struct KrakenClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    nonce: NonceGenerator,
}

impl KrakenClient {
    /// Create a client. Private endpoints require credentials.
    #[must_use]
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            nonce: NonceGenerator::new(),
        }
    }

    async fn public_get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/0/public/{endpoint}", self.base_url);
        let response = self.http.get(&url).query(params).send().await?;
        Self::unwrap_result(response.json().await?)
    }

    async fn private_post(&self, endpoint: &str, fields: &[(&str, String)]) -> Result<Value> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Config("API credentials not configured".to_string()))?;

        let url_path = format!("/0/private/{endpoint}");
        let nonce = self.nonce.next().to_string();
        let body = Self::build_private_body(&nonce, fields);

        let signature = credentials.sign(&url_path, &nonce, &body)?;

        let response = self
            .http
            .post(format!("{}{url_path}", self.base_url))
            .header("API-Key", credentials.api_key())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        Self::unwrap_result(response.json().await?)
    }

    /// Build the form-urlencoded request body for a private endpoint call.
    fn build_private_body(nonce: &str, fields: &[(&str, String)]) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("nonce", nonce);
        for (key, value) in fields {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    /// Pull `result` out of the exchange envelope, surfacing API errors.
    fn unwrap_result(envelope: Value) -> Result<Value> {
        if let Some(errors) = envelope.get("error").and_then(Value::as_array) {
            if !errors.is_empty() {
                let joined: Vec<String> = errors
                    .iter()
                    .map(|e| e.as_str().unwrap_or_default().to_string())
                    .collect();
                return Err(Error::Exchange(joined.join(", ")));
            }
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Parse("missing result in exchange response".to_string()))
    }

    fn decimal_field(value: &Value, key: &str) -> Option<Decimal> {
        match value.get(key)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    }

    /// First element of a ticker array field (`"a": [price, whole, lot]`).
    fn ticker_price(pair_data: &Value, key: &str) -> Option<Decimal> {
        pair_data
            .get(key)?
            .as_array()?
            .first()?
            .as_str()?
            .parse()
            .ok()
    }
}

#[async_trait]
impl ExchangeAdapter for KrakenClient {
    fn name(&self) -> &'static str {
        "Kraken"
    }

    async fn list_pairs(&self, max_pairs: usize) -> Result<Vec<PairInfo>> {
        let pairs = self.public_get("AssetPairs", &[]).await?;
        let pairs = pairs
            .as_object()
            .ok_or_else(|| Error::Parse("AssetPairs result is not an object".to_string()))?;

        let mut infos = Vec::new();
        for (wire_name, attrs) in pairs {
            // Skip dark-pool and margin-only listings without a wsname
            let Some(wsname) = attrs.get("wsname").and_then(Value::as_str) else {
                continue;
            };
            let Some((base, quote)) = wsname.split_once('/') else {
                continue;
            };
            infos.push(PairInfo {
                wire_name: wire_name.clone(),
                ws_name: wsname.to_string(),
                base: base.to_string(),
                quote: quote.to_string(),
                price_decimals: attrs
                    .get("pair_decimals")
                    .and_then(Value::as_u64)
                    .unwrap_or(5) as u32,
                volume_decimals: attrs
                    .get("lot_decimals")
                    .and_then(Value::as_u64)
                    .unwrap_or(8) as u32,
                min_volume: Self::decimal_field(attrs, "ordermin").unwrap_or(Decimal::ZERO),
                volume_24h: Decimal::ZERO,
            });
        }

        // Rank by 24h notional so max_pairs keeps the liquid pairs
        let names: Vec<String> = infos.iter().map(|p| p.wire_name.clone()).collect();
        match self
            .public_get("Ticker", &[("pair", names.join(","))])
            .await
        {
            Ok(tickers) => {
                for info in &mut infos {
                    if let Some(pair_data) = tickers.get(&info.wire_name) {
                        let volume = pair_data
                            .get("v")
                            .and_then(Value::as_array)
                            .and_then(|v| v.get(1))
                            .and_then(Value::as_str)
                            .and_then(|s| s.parse::<Decimal>().ok())
                            .unwrap_or(Decimal::ZERO);
                        let last = Self::ticker_price(pair_data, "c").unwrap_or(Decimal::ZERO);
                        info.volume_24h = volume * last;
                    }
                }
            }
            Err(e) => warn!(error = %e, "24h volume lookup failed, keeping catalog order"),
        }

        infos.sort_by(|a, b| b.volume_24h.cmp(&a.volume_24h));
        infos.truncate(max_pairs);

        debug!(pairs = infos.len(), "Active pair catalog fetched");
        Ok(infos)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String> {
        let mut fields = vec![
            ("pair", request.pair.clone()),
            ("type", request.side.as_str().to_string()),
            ("ordertype", request.kind.as_str().to_string()),
            ("volume", request.volume.to_string()),
        ];
        if let (OrderKind::Limit, Some(price)) = (request.kind, request.price) {
            fields.push(("price", price.to_string()));
        }

        let result = self.private_post("AddOrder", &fields).await?;
        result
            .get("txid")
            .and_then(Value::as_array)
            .and_then(|txids| txids.first())
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| Error::Exchange("no order id returned".to_string()))
    }

    async fn query_order(&self, txid: &str) -> Result<OrderStatus> {
        let result = self
            .private_post("QueryOrders", &[("txid", txid.to_string())])
            .await?;
        let order = result
            .get(txid)
            .ok_or_else(|| Error::Exchange(format!("unknown order {txid}")))?;

        let state = match order.get("status").and_then(Value::as_str) {
            Some("closed") => OrderState::Closed,
            Some("canceled") => OrderState::Canceled,
            Some("expired") => OrderState::Expired,
            _ => OrderState::Open,
        };

        Ok(OrderStatus {
            state,
            price: Self::decimal_field(order, "price").unwrap_or(Decimal::ZERO),
            executed_volume: Self::decimal_field(order, "vol_exec").unwrap_or(Decimal::ZERO),
            fee: Self::decimal_field(order, "fee").unwrap_or(Decimal::ZERO),
            fee_currency: order
                .get("fee_currency")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        })
    }

    async fn cancel_order(&self, txid: &str) -> Result<()> {
        self.private_post("CancelOrder", &[("txid", txid.to_string())])
            .await?;
        Ok(())
    }

    async fn balance(&self) -> Result<HashMap<String, Decimal>> {
        let result = self.private_post("Balance", &[]).await?;
        let balances = result
            .as_object()
            .ok_or_else(|| Error::Parse("Balance result is not an object".to_string()))?;

        Ok(balances
            .iter()
            .filter_map(|(asset, amount)| {
                let amount = match amount {
                    Value::String(s) => s.parse().ok()?,
                    Value::Number(n) => n.to_string().parse().ok()?,
                    _ => return None,
                };
                Some((asset.clone(), amount))
            })
            .collect())
    }

    async fn fees(&self) -> Result<FeeSchedule> {
        let fallback = FeeSchedule {
            taker_pct: DEFAULT_TAKER_FEE_PCT.parse().unwrap_or(Decimal::ZERO),
            maker_pct: DEFAULT_MAKER_FEE_PCT.parse().unwrap_or(Decimal::ZERO),
        };

        let result = match self.private_post("TradeVolume", &[]).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Fee tier lookup failed, using default fees");
                return Ok(fallback);
            }
        };

        let taker = result
            .get("fees")
            .and_then(Value::as_object)
            .and_then(|fees| fees.values().next())
            .and_then(|tier| Self::decimal_field(tier, "fee"));
        let maker = result
            .get("fees_maker")
            .and_then(Value::as_object)
            .and_then(|fees| fees.values().next())
            .and_then(|tier| Self::decimal_field(tier, "fee"));

        Ok(FeeSchedule {
            taker_pct: taker.unwrap_or(fallback.taker_pct),
            maker_pct: maker.unwrap_or(fallback.maker_pct),
        })
    }

    async fn ticker(&self, pair: &str) -> Result<TickerQuote> {
        let result = self
            .public_get("Ticker", &[("pair", pair.to_string())])
            .await?;
        let pair_data = result
            .as_object()
            .and_then(|pairs| pairs.values().next())
            .ok_or_else(|| Error::Exchange(format!("no ticker for {pair}")))?;

        Ok(TickerQuote {
            bid: Self::ticker_price(pair_data, "b")
                .ok_or_else(|| Error::Parse("missing bid in ticker".to_string()))?,
            ask: Self::ticker_price(pair_data, "a")
                .ok_or_else(|| Error::Parse("missing ask in ticker".to_string()))?,
            last: Self::ticker_price(pair_data, "c")
                .ok_or_else(|| Error::Parse("missing last in ticker".to_string()))?,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.public_get("Time", &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn unwrap_result_surfaces_api_errors() {
        let envelope = json!({"error": ["EOrder:Insufficient funds"], "result": {}});
        let err = KrakenClient::unwrap_result(envelope).unwrap_err();
        assert!(err.to_string().contains("Insufficient funds"));
    }

    #[test]
    fn unwrap_result_returns_payload() {
        let envelope = json!({"error": [], "result": {"txid": ["OABC-123"]}});
        let result = KrakenClient::unwrap_result(envelope).unwrap();
        assert_eq!(result["txid"][0], "OABC-123");
    }

    #[test]
    fn decimal_field_parses_strings_and_numbers() {
        let value = json!({"a": "1.25", "b": 3});
        assert_eq!(KrakenClient::decimal_field(&value, "a"), Some(dec!(1.25)));
        assert_eq!(KrakenClient::decimal_field(&value, "b"), Some(dec!(3)));
        assert_eq!(KrakenClient::decimal_field(&value, "c"), None);
    }

    #[test]
    fn ticker_price_reads_first_array_element() {
        let pair_data = json!({"a": ["30000.1", "1", "1.000"], "b": ["29999.9", "2", "2.000"]});
        assert_eq!(
            KrakenClient::ticker_price(&pair_data, "a"),
            Some(dec!(30000.1))
        );
        assert_eq!(
            KrakenClient::ticker_price(&pair_data, "b"),
            Some(dec!(29999.9))
        );
    }
}

//! Raw wire shapes for the exchange's REST API. These are translated into the
//! engine's own `ExchangeRecord`/`Balance`/`CurrencyPair` contracts (§4.4,
//! §6) at the client boundary; nothing outside this module ever sees them.

use serde::{Deserialize, Serialize};

fn deserialize_f64_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrF64 {
        String(String),
        F64(f64),
    }
    match StringOrF64::deserialize(deserializer)? {
        StringOrF64::String(s) => s.parse().map_err(serde::de::Error::custom),
        StringOrF64::F64(f) => Ok(f),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTicker {
    pub market: String,
    #[serde(deserialize_with = "deserialize_f64_or_string")]
    pub last_price: f64,
    #[serde(default, deserialize_with = "deserialize_f64_or_string")]
    pub bid: f64,
    #[serde(default, deserialize_with = "deserialize_f64_or_string")]
    pub ask: f64,
    #[serde(default, deserialize_with = "deserialize_f64_or_string")]
    pub volume: f64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLevel {
    #[serde(deserialize_with = "deserialize_f64_or_string")]
    pub price: f64,
    #[serde(deserialize_with = "deserialize_f64_or_string")]
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOrderBook {
    pub bids: Vec<WireLevel>,
    pub asks: Vec<WireLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOrderRequest {
    pub side: String,
    pub order_type: String,
    pub market: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<f64>,
    pub total_quantity: f64,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOrderResponse {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub fee_amount: Option<f64>,
    #[serde(default)]
    pub total_quantity: Option<f64>,
    #[serde(default)]
    pub remaining_quantity: Option<f64>,
    #[serde(default)]
    pub avg_price: Option<f64>,
    #[serde(default)]
    pub price_per_unit: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireOrdersResponse {
    pub orders: Vec<WireOrderResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCancelRequest {
    pub id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireActiveOrdersRequest {
    pub market: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTimestampRequest {
    pub timestamp: i64,
}

impl WireTimestampRequest {
    pub fn new() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireBalance {
    pub currency: String,
    #[serde(deserialize_with = "deserialize_f64_or_string")]
    pub balance: f64,
    #[serde(deserialize_with = "deserialize_f64_or_string")]
    pub locked_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMarketDetails {
    pub pair: Option<String>,
    pub coindcx_name: String,
    pub base_currency_short_name: String,
    pub target_currency_short_name: String,
    pub min_quantity: f64,
    pub max_quantity: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_notional: f64,
    pub step: f64,
    #[serde(default)]
    pub maker_fee: Option<f64>,
    #[serde(default)]
    pub taker_fee: Option<f64>,
}

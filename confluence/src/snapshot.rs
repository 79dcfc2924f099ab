//! Market data snapshot consumed by one analysis call.
//!
//! Every field is optional in practice: providers must tolerate empty series, a missing order
//! book, or absent sentiment inputs.

use crate::model::{RegimeClassification, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Aggressor side of a trade.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY")]
    Buy,
    #[serde(alias = "sell", alias = "SELL")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }

    /// `+1.0` for buys, `-1.0` for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// OHLCV bar.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle series for one [`Timeframe`], oldest first.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct TimeframeData {
    #[serde(default)]
    pub candles: Vec<Candle>,
}

impl TimeframeData {
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|candle| candle.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|candle| candle.volume).collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// Price/quantity level in an order book.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

impl Level {
    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }

    pub fn amount_f64(&self) -> f64 {
        self.amount.to_f64().unwrap_or(0.0)
    }

    /// Quote notional resting at this level, `None` on overflow.
    pub fn notional(&self) -> Option<Decimal> {
        self.price.checked_mul(self.amount)
    }
}

/// Order book depth snapshot. Bids best (highest) first, asks best (lowest) first.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct OrderBookSnapshot {
    #[serde(default)]
    pub bids: Vec<Level>,
    #[serde(default)]
    pub asks: Vec<Level>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price.checked_sub(bid.price),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid
                .price
                .checked_add(ask.price)
                .and_then(|sum| sum.checked_div(Decimal::TWO)),
            _ => None,
        }
    }

    /// Total bid and ask quantity over the first `depth` levels of each side, `None` on
    /// overflow.
    pub fn depth(&self, depth: usize) -> Option<(Decimal, Decimal)> {
        let total = |levels: &[Level]| {
            levels
                .iter()
                .take(depth)
                .try_fold(Decimal::ZERO, |total, level| total.checked_add(level.amount))
        };
        Some((total(&self.bids)?, total(&self.asks)?))
    }

    /// Quantity imbalance `(bid - ask) / (bid + ask)` over `depth` levels, in `[-1, 1]`.
    pub fn imbalance(&self, depth: usize) -> Option<f64> {
        let (bid, ask) = self.depth(depth)?;
        let total = bid.checked_add(ask)?;
        if total > Decimal::ZERO {
            bid.checked_sub(ask)?.checked_div(total)?.to_f64()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Public trade.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct Trade {
    #[serde(default)]
    pub id: SmolStr,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
    pub time: DateTime<Utc>,
}

impl Trade {
    /// Signed quote volume: positive for aggressive buys, negative for sells.
    pub fn signed_quote(&self) -> f64 {
        self.side.sign() * self.amount * self.price
    }
}

/// Derivatives sentiment inputs.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct SentimentInputs {
    /// Funding rate per interval as a fraction (0.0001 = 0.01%).
    #[serde(default)]
    pub funding_rate: Option<f64>,
    /// Ratio of long to short accounts.
    #[serde(default)]
    pub long_short_ratio: Option<f64>,
}

/// Everything known about one symbol at one point in time.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct MarketSnapshot {
    pub symbol: SmolStr,
    /// Snapshot time; becomes the result timestamp.
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub timeframes: BTreeMap<Timeframe, TimeframeData>,
    #[serde(default)]
    pub order_book: Option<OrderBookSnapshot>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default)]
    pub sentiment: Option<SentimentInputs>,
    /// Pre-computed regime, taking precedence over any configured detector.
    #[serde(default)]
    pub regime: Option<RegimeClassification>,
}

impl MarketSnapshot {
    /// Empty snapshot for `symbol` at `time`.
    pub fn new(symbol: impl Into<SmolStr>, time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            time,
            timeframes: BTreeMap::new(),
            order_book: None,
            trades: Vec::new(),
            sentiment: None,
            regime: None,
        }
    }

    pub fn with_candles(mut self, timeframe: Timeframe, candles: Vec<Candle>) -> Self {
        self.timeframes.insert(timeframe, TimeframeData { candles });
        self
    }

    pub fn with_order_book(mut self, order_book: OrderBookSnapshot) -> Self {
        self.order_book = Some(order_book);
        self
    }

    pub fn with_trades(mut self, trades: Vec<Trade>) -> Self {
        self.trades = trades;
        self
    }

    pub fn with_sentiment(mut self, sentiment: SentimentInputs) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_regime(mut self, regime: RegimeClassification) -> Self {
        self.regime = Some(regime);
        self
    }

    pub fn timeframe(&self, timeframe: Timeframe) -> Option<&TimeframeData> {
        self.timeframes.get(&timeframe)
    }

    /// Close series for `timeframe`, empty if absent.
    pub fn closes(&self, timeframe: Timeframe) -> Vec<f64> {
        self.timeframe(timeframe)
            .map(TimeframeData::closes)
            .unwrap_or_default()
    }
}

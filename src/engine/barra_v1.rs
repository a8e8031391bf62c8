use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

use log::info;
use serde::{Deserialize, Serialize};

use crate::input::camilla::Camilla;

pub type OrderId = u64;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl From<Side> for u8 {
    fn from(value: Side) -> Self {
        match value {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }
}

impl TryFrom<u8> for Side {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Side::Buy),
            1 => Ok(Side::Sell),
            _ => Err(value),
        }
    }
}

/// One market price update. Prices are carried as integer multiples of the instrument's tick size
/// so that price comparisons never depend on floating-point representation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Tick {
    pub ts_ms: i64,
    pub price_ticks: i64,
    pub qty: f64,
    pub side: Side,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Order {
    pub order_id: Option<OrderId>,
    pub order_type: OrderType,
    pub side: Side,
    pub qty: f64,
    pub limit_price_ticks: Option<i64>,
}

impl Order {
    fn market(side: Side, qty: f64) -> Self {
        Self {
            order_id: None,
            order_type: OrderType::Market,
            side,
            qty,
            limit_price_ticks: None,
        }
    }

    fn delayed(side: Side, qty: f64, limit_price_ticks: i64) -> Self {
        Self {
            order_id: None,
            order_type: OrderType::Limit,
            side,
            qty,
            limit_price_ticks: Some(limit_price_ticks),
        }
    }

    pub fn market_buy(qty: f64) -> Self {
        Order::market(Side::Buy, qty)
    }

    pub fn market_sell(qty: f64) -> Self {
        Order::market(Side::Sell, qty)
    }

    pub fn limit_buy(qty: f64, limit_price_ticks: i64) -> Self {
        Order::delayed(Side::Buy, qty, limit_price_ticks)
    }

    pub fn limit_sell(qty: f64, limit_price_ticks: i64) -> Self {
        Order::delayed(Side::Sell, qty, limit_price_ticks)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum FillKind {
    Maker,
    Taker,
}

/// Record of one executed order. Appended to the engine-lifetime trade log.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Fill {
    pub order_id: OrderId,
    pub ts_ms: i64,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub fee: f64,
    pub kind: FillKind,
}

/// Output of the pure fill model: the execution price, the fee charged, and which fee schedule
/// applied. An order that does not fill produces no result at all.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct FillResult {
    pub price: f64,
    pub fee: f64,
    pub kind: FillKind,
}

/// Static per-instance configuration. Validated once at construction and never mutated.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct EngineConfig {
    pub initial_cash: f64,
    pub maker_fee_rate: f64,
    pub taker_fee_rate: f64,
    pub spread_bps: f64,
    pub tick_size: f64,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_cash < 0.0 {
            return Err(ConfigError::NegativeInitialCash);
        }
        if self.maker_fee_rate < 0.0 || self.taker_fee_rate < 0.0 {
            return Err(ConfigError::NegativeFeeRate);
        }
        if self.spread_bps < 0.0 {
            return Err(ConfigError::NegativeSpread);
        }
        if !(self.tick_size > 0.0) {
            return Err(ConfigError::NonPositiveTickSize);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConfigError {
    NegativeInitialCash,
    NegativeFeeRate,
    NegativeSpread,
    NonPositiveTickSize,
}

impl std::error::Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NegativeInitialCash => write!(f, "initial_cash cannot be negative"),
            ConfigError::NegativeFeeRate => write!(f, "fee rates cannot be negative"),
            ConfigError::NegativeSpread => write!(f, "spread_bps cannot be negative"),
            ConfigError::NonPositiveTickSize => write!(f, "tick_size must be positive"),
        }
    }
}

/// Order was rejected at admission. The account state is left untouched so the client can correct
/// and resubmit.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum OrderError {
    NonPositiveQty,
    MissingLimitPrice,
    UnexpectedLimitPrice,
    InsufficientCash,
    NoMarketPrice,
    UnknownOrder,
}

impl std::error::Error for OrderError {}

impl Display for OrderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderError::NonPositiveQty => write!(f, "order qty must be positive"),
            OrderError::MissingLimitPrice => write!(f, "limit order is missing a limit price"),
            OrderError::UnexpectedLimitPrice => write!(f, "market order cannot carry a limit price"),
            OrderError::InsufficientCash => write!(f, "insufficient cash for worst-case order cost"),
            OrderError::NoMarketPrice => write!(f, "no market price seen yet"),
            OrderError::UnknownOrder => write!(f, "no resting order with that id"),
        }
    }
}

/// A tick arrived with a timestamp earlier than the last processed tick. Determinism depends on
/// strictly ordered input so the engine fails the call rather than reordering or dropping.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SequencingError {
    pub last_ts_ms: i64,
    pub tick_ts_ms: i64,
}

impl std::error::Error for SequencingError {}

impl Display for SequencingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tick at {} arrived after tick at {}",
            self.tick_ts_ms, self.last_ts_ms
        )
    }
}

/// Point-in-time record of account state after processing one tick.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct Snapshot {
    pub ts_ms: i64,
    pub cash: f64,
    pub position_qty: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum OrderOutcome {
    Filled(Fill),
    Rested(OrderId),
}

/// Order submitted through the batch driver, keyed to the tick index it should be placed before.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScheduledOrder {
    pub index: usize,
    pub order: Order,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BatchOutput {
    pub snapshots: Vec<Snapshot>,
    /// Orders rejected at admission, keyed by their position in the scheduled array. Rejection is
    /// recoverable so the batch keeps running, exactly as a sequence of single calls would.
    pub rejected: Vec<(usize, OrderError)>,
}

fn quantize(price: f64, tick_size: f64) -> f64 {
    (price / tick_size).round() * tick_size
}

/// Execution price for an order removing liquidity at the given mark, with the configured spread
/// applied symmetrically around the mark and the result quantized to the tick grid.
pub fn spread_adjusted_price(mark_price_ticks: i64, side: Side, config: &EngineConfig) -> f64 {
    let mark = mark_price_ticks as f64 * config.tick_size;
    let half_spread = config.spread_bps / 2.0 / 10_000.0;
    let raw = match side {
        Side::Buy => mark * (1.0 + half_spread),
        Side::Sell => mark * (1.0 - half_spread),
    };
    quantize(raw, config.tick_size)
}

/// The fill model. Pure: whether and at what price an order fills against the given mark is a
/// function of the order and config alone, never of account state.
///
/// Market orders always fill at the spread-adjusted mark and pay the taker rate. Limit orders fill
/// only once the spread-adjusted mark has crossed the limit, execute at the limit price itself,
/// and pay the maker rate.
pub fn try_fill(order: &Order, mark_price_ticks: i64, config: &EngineConfig) -> Option<FillResult> {
    let adjusted = spread_adjusted_price(mark_price_ticks, order.side, config);
    match order.order_type {
        OrderType::Market => {
            let fee = order.qty * adjusted * config.taker_fee_rate;
            Some(FillResult {
                price: adjusted,
                fee,
                kind: FillKind::Taker,
            })
        }
        OrderType::Limit => {
            // Order shape is validated at admission so limit orders always carry a price
            let limit = order.limit_price_ticks? as f64 * config.tick_size;
            let crossed = match order.side {
                Side::Buy => adjusted <= limit,
                Side::Sell => adjusted >= limit,
            };
            if crossed {
                let fee = order.qty * limit * config.maker_fee_rate;
                Some(FillResult {
                    price: limit,
                    fee,
                    kind: FillKind::Maker,
                })
            } else {
                None
            }
        }
    }
}

/// Deterministic single-account execution engine.
///
/// All state for one simulated run is owned here and mutated only through [BarraV1::step_tick],
/// [BarraV1::place_order], and the batch driver built on top of them. There is no internal
/// locking: one logical thread of control per instance, with independent instances free to run
/// in parallel on the host's side.
///
/// Resting orders are held in insertion order and evaluated front-to-back on every tick. This is
/// an explicit tie-break rule that batch and single-call processing both depend on, not a property
/// inherited from the container.
#[derive(Clone, Debug)]
pub struct BarraV1 {
    config: EngineConfig,
    cash: f64,
    position_qty: f64,
    avg_entry_price: f64,
    realized_pnl: f64,
    last_mark_price_ticks: Option<i64>,
    last_ts_ms: Option<i64>,
    resting: VecDeque<Order>,
    last_inserted: OrderId,
    trade_log: Vec<Fill>,
    history: Vec<Snapshot>,
}

impl BarraV1 {
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "ENGINE: Created instance with initial cash of {:?}",
            config.initial_cash
        );
        Ok(Self {
            config,
            cash: config.initial_cash,
            position_qty: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            last_mark_price_ticks: None,
            last_ts_ms: None,
            resting: VecDeque::new(),
            last_inserted: 0,
            trade_log: Vec::new(),
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn position_qty(&self) -> f64 {
        self.position_qty
    }

    pub fn avg_entry_price(&self) -> f64 {
        self.avg_entry_price
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn mark_price(&self) -> Option<f64> {
        self.last_mark_price_ticks
            .map(|ticks| ticks as f64 * self.config.tick_size)
    }

    pub fn resting_orders(&self) -> impl Iterator<Item = &Order> {
        self.resting.iter()
    }

    pub fn trade_log(&self) -> &[Fill] {
        &self.trade_log
    }

    pub fn fetch_fills(&self, from: usize) -> Vec<Fill> {
        self.trade_log.iter().skip(from).copied().collect()
    }

    pub fn history(&self) -> &[Snapshot] {
        &self.history
    }

    /// Most recent snapshot without mutating state. Before the first tick this synthesizes the
    /// initial account state; the history proper only ever contains per-tick snapshots.
    pub fn snapshot(&self) -> Snapshot {
        if let Some(last) = self.history.last() {
            *last
        } else {
            Snapshot {
                ts_ms: 0,
                cash: self.cash,
                position_qty: 0.0,
                mark_price: 0.0,
                unrealized_pnl: 0.0,
                equity: self.cash,
            }
        }
    }

    fn validate_order(order: &Order) -> Result<(), OrderError> {
        if !(order.qty > 0.0) || !order.qty.is_finite() {
            return Err(OrderError::NonPositiveQty);
        }
        match order.order_type {
            OrderType::Limit if order.limit_price_ticks.is_none() => {
                Err(OrderError::MissingLimitPrice)
            }
            OrderType::Market if order.limit_price_ticks.is_some() => {
                Err(OrderError::UnexpectedLimitPrice)
            }
            _ => Ok(()),
        }
    }

    /// Worst-case cash outlay for an order. Buys cost notional plus fee, sells cost the fee alone
    /// as fees are debited from cash regardless of side. Sale proceeds are not netted against the
    /// check.
    fn worst_case_cost(&self, order: &Order) -> Result<f64, OrderError> {
        match order.order_type {
            OrderType::Market => {
                let mark = self
                    .last_mark_price_ticks
                    .ok_or(OrderError::NoMarketPrice)?;
                let price = spread_adjusted_price(mark, order.side, &self.config);
                let fee = order.qty * price * self.config.taker_fee_rate;
                match order.side {
                    Side::Buy => Ok(order.qty * price + fee),
                    Side::Sell => Ok(fee),
                }
            }
            OrderType::Limit => {
                // Limit orders always execute at the limit price so this bound is exact
                let limit = order.limit_price_ticks.ok_or(OrderError::MissingLimitPrice)?
                    as f64
                    * self.config.tick_size;
                let fee = order.qty * limit * self.config.maker_fee_rate;
                match order.side {
                    Side::Buy => Ok(order.qty * limit + fee),
                    Side::Sell => Ok(fee),
                }
            }
        }
    }

    /// Validates and admits one order. Market orders are evaluated against the fill model
    /// immediately at the current mark; limit orders that already cross fill immediately and the
    /// rest are inserted at the back of the resting book. All-or-nothing: a rejection leaves the
    /// account byte-identical.
    pub fn place_order(&mut self, order: Order) -> Result<OrderOutcome, OrderError> {
        Self::validate_order(&order)?;
        let cost = self.worst_case_cost(&order)?;
        if cost > self.cash {
            info!(
                "ENGINE: Rejected order for {:?} units, worst-case cost {:?} exceeds cash {:?}",
                order.qty, cost, self.cash
            );
            return Err(OrderError::InsufficientCash);
        }

        let mut order = order;
        let order_id = self.last_inserted;
        order.order_id = Some(order_id);
        self.last_inserted += 1;

        // Limit orders can only cross immediately once a mark price exists
        let immediate = match self.last_mark_price_ticks {
            Some(mark) => try_fill(&order, mark, &self.config),
            None => None,
        };

        if let Some(result) = immediate {
            let fill = self.apply_fill(&order, &result);
            Ok(OrderOutcome::Filled(fill))
        } else {
            info!(
                "ENGINE: Order {:?} resting, book depth now {:?}",
                order_id,
                self.resting.len() + 1
            );
            self.resting.push_back(order);
            Ok(OrderOutcome::Rested(order_id))
        }
    }

    /// Removes a resting order. No side effects on cash or PnL.
    pub fn cancel_order(&mut self, order_id: OrderId) -> Result<(), OrderError> {
        let mut cancel_position: Option<usize> = None;
        for (position, order) in self.resting.iter().enumerate() {
            if order.order_id == Some(order_id) {
                cancel_position = Some(position);
                break;
            }
        }
        if let Some(position) = cancel_position {
            self.resting.remove(position);
            info!("ENGINE: Cancelled resting order {:?}", order_id);
            return Ok(());
        }
        Err(OrderError::UnknownOrder)
    }

    fn apply_fill(&mut self, order: &Order, result: &FillResult) -> Fill {
        let signed_qty = match order.side {
            Side::Buy => order.qty,
            Side::Sell => -order.qty,
        };

        // The accumulation order below is fixed: notional, fee, realized PnL, then position and
        // entry price. Reordering these sums changes bit-exact reproducibility.
        self.cash -= signed_qty * result.price;
        self.cash -= result.fee;

        let prev_position = self.position_qty;
        if prev_position != 0.0 && prev_position.signum() != signed_qty.signum() {
            // Only the reducing portion books realized PnL, matched at the average entry price
            let reducing = prev_position.abs().min(signed_qty.abs());
            self.realized_pnl +=
                reducing * (result.price - self.avg_entry_price) * prev_position.signum();
        }

        let new_position = prev_position + signed_qty;
        if new_position == 0.0 {
            self.avg_entry_price = 0.0;
        } else if prev_position == 0.0 || prev_position.signum() != new_position.signum() {
            // Opened from flat or reversed through it: the residual is a fresh position at the
            // execution price
            self.avg_entry_price = result.price;
        } else if prev_position.signum() == signed_qty.signum() {
            self.avg_entry_price = (self.avg_entry_price * prev_position.abs()
                + result.price * signed_qty.abs())
                / (prev_position.abs() + signed_qty.abs());
        }
        // A pure reduction keeps the existing entry price
        self.position_qty = new_position;

        let fill = Fill {
            // Assigned at admission so always present here
            order_id: order.order_id.unwrap_or_default(),
            ts_ms: self.last_ts_ms.unwrap_or_default(),
            side: order.side,
            qty: order.qty,
            price: result.price,
            fee: result.fee,
            kind: result.kind,
        };
        info!(
            "ENGINE: Filled order {:?} for {:?} units @ {:?}, fee {:?}, cash now {:?}",
            fill.order_id, fill.qty, fill.price, fill.fee, self.cash
        );
        self.trade_log.push(fill);
        fill
    }

    /// Advances the account by one tick: updates the mark, fills any resting orders that now
    /// cross, and appends a snapshot. Ticks must arrive with non-decreasing timestamps; equal
    /// timestamps are allowed, regressions fail without mutating anything.
    pub fn step_tick(&mut self, tick: &Tick) -> Result<Snapshot, SequencingError> {
        if let Some(last) = self.last_ts_ms {
            if tick.ts_ms < last {
                return Err(SequencingError {
                    last_ts_ms: last,
                    tick_ts_ms: tick.ts_ms,
                });
            }
        }
        self.last_ts_ms = Some(tick.ts_ms);
        self.last_mark_price_ticks = Some(tick.price_ticks);

        // Front-to-back over the resting book is insertion order, the earliest-placed order is
        // always evaluated first
        let mut filled: Vec<(Order, FillResult)> = Vec::new();
        for order in self.resting.iter() {
            if let Some(result) = try_fill(order, tick.price_ticks, &self.config) {
                filled.push((order.clone(), result));
            }
        }
        for (order, result) in &filled {
            self.apply_fill(order, result);
        }
        if !filled.is_empty() {
            self.resting
                .retain(|order| !filled.iter().any(|(f, _)| f.order_id == order.order_id));
        }

        let mark_price = tick.price_ticks as f64 * self.config.tick_size;
        let unrealized_pnl = if self.position_qty == 0.0 {
            0.0
        } else {
            self.position_qty * (mark_price - self.avg_entry_price)
        };
        let equity = self.cash + self.position_qty * mark_price;
        let snapshot = Snapshot {
            ts_ms: tick.ts_ms,
            cash: self.cash,
            position_qty: self.position_qty,
            mark_price,
            unrealized_pnl,
            equity,
        };
        self.history.push(snapshot);
        Ok(snapshot)
    }

    /// Batch driver: applies [BarraV1::step_tick] across a columnar tick array, interleaving any
    /// scheduled orders before the tick they are keyed to. Purely a throughput optimization: the
    /// resulting history is identical, field for field, to the equivalent sequence of single
    /// calls. Order rejections are recoverable so they are collected rather than aborting; a
    /// sequencing error is fatal and stops the batch where a single call would have stopped.
    pub fn step_batch(
        &mut self,
        ticks: &Camilla,
        scheduled: &[ScheduledOrder],
    ) -> Result<BatchOutput, SequencingError> {
        let mut output = BatchOutput {
            snapshots: Vec::with_capacity(ticks.len()),
            rejected: Vec::new(),
        };

        let mut cursor = 0;
        for (index, tick) in ticks.iter().enumerate() {
            while cursor < scheduled.len() && scheduled[cursor].index <= index {
                if let Err(err) = self.place_order(scheduled[cursor].order.clone()) {
                    output.rejected.push((cursor, err));
                }
                cursor += 1;
            }
            output.snapshots.push(self.step_tick(&tick)?);
        }
        // Orders keyed past the final tick are still admitted, the same as placing them after the
        // last single-tick call
        while cursor < scheduled.len() {
            if let Err(err) = self.place_order(scheduled[cursor].order.clone()) {
                output.rejected.push((cursor, err));
            }
            cursor += 1;
        }
        Ok(output)
    }
}

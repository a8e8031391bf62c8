use std::fmt::{Display, Formatter};

use rand::thread_rng;
use rand_distr::{Distribution, Exp, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::engine::barra_v1::{Side, Snapshot, Tick};

/// Columnar tick dataset, one array per field in Struct-of-Arrays layout. This is the format the
/// batch driver consumes and the layout exchanged across a language boundary: every column is a
/// fixed-width numeric type and all columns share the same length.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Camilla {
    ts_ms: Vec<i64>,
    price_ticks: Vec<i64>,
    qty: Vec<f64>,
    side: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnError {
    LengthMismatch,
    BadSide { pos: usize, value: u8 },
}

impl std::error::Error for ColumnError {}

impl Display for ColumnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnError::LengthMismatch => write!(f, "columns must all have the same length"),
            ColumnError::BadSide { pos, value } => {
                write!(f, "side column holds {} at position {}", value, pos)
            }
        }
    }
}

impl Camilla {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dataset from caller-supplied columns, validating lengths and side values once at
    /// the boundary so that row access never fails afterwards.
    pub fn from_columns(
        ts_ms: Vec<i64>,
        price_ticks: Vec<i64>,
        qty: Vec<f64>,
        side: Vec<u8>,
    ) -> Result<Self, ColumnError> {
        if ts_ms.len() != price_ticks.len()
            || ts_ms.len() != qty.len()
            || ts_ms.len() != side.len()
        {
            return Err(ColumnError::LengthMismatch);
        }
        for (pos, value) in side.iter().enumerate() {
            if Side::try_from(*value).is_err() {
                return Err(ColumnError::BadSide { pos, value: *value });
            }
        }
        Ok(Self {
            ts_ms,
            price_ticks,
            qty,
            side,
        })
    }

    pub fn len(&self) -> usize {
        self.ts_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts_ms.is_empty()
    }

    pub fn add_tick(&mut self, tick: &Tick) {
        self.ts_ms.push(tick.ts_ms);
        self.price_ticks.push(tick.price_ticks);
        self.qty.push(tick.qty);
        self.side.push(tick.side.into());
    }

    pub fn get(&self, pos: usize) -> Option<Tick> {
        // Side values are validated at construction so the conversion cannot fail here
        Some(Tick {
            ts_ms: *self.ts_ms.get(pos)?,
            price_ticks: *self.price_ticks.get(pos)?,
            qty: *self.qty.get(pos)?,
            side: Side::try_from(*self.side.get(pos)?).ok()?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Tick> + '_ {
        (0..self.len()).filter_map(move |pos| self.get(pos))
    }

    pub fn ts_ms(&self) -> &[i64] {
        &self.ts_ms
    }

    pub fn price_ticks(&self) -> &[i64] {
        &self.price_ticks
    }

    pub fn qty(&self) -> &[f64] {
        &self.qty
    }

    pub fn side(&self) -> &[u8] {
        &self.side
    }

    /// Synthetic random-walk tick stream for tests, benches, and server demos: normal price
    /// increments around a base price, exponentially distributed qtys, uniform sides, 1ms
    /// spacing. Prices are snapped to the given tick size before storage.
    pub fn random(length: usize, tick_size: f64) -> Self {
        let mut rng = thread_rng();
        let step_dist = Normal::new(0.0, 5.0).unwrap();
        let qty_dist = Exp::new(20.0).unwrap();
        let side_dist = Uniform::new_inclusive(0u8, 1u8);

        let start_ts: i64 = 1_609_459_200_000;
        let mut price = 42_000.0;
        let mut data = Camilla::new();
        for pos in 0..length {
            price += step_dist.sample(&mut rng);
            data.ts_ms.push(start_ts + pos as i64);
            data.price_ticks.push((price / tick_size).round() as i64);
            data.qty.push(qty_dist.sample(&mut rng));
            data.side.push(side_dist.sample(&mut rng));
        }
        data
    }
}

/// Snapshot history in the same columnar layout as [Camilla], one array per snapshot field, in
/// the same order the snapshots were produced.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SnapshotColumns {
    pub ts_ms: Vec<i64>,
    pub cash: Vec<f64>,
    pub position_qty: Vec<f64>,
    pub mark_price: Vec<f64>,
    pub unrealized_pnl: Vec<f64>,
    pub equity: Vec<f64>,
}

impl SnapshotColumns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ts_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts_ms.is_empty()
    }

    pub fn push(&mut self, snapshot: &Snapshot) {
        self.ts_ms.push(snapshot.ts_ms);
        self.cash.push(snapshot.cash);
        self.position_qty.push(snapshot.position_qty);
        self.mark_price.push(snapshot.mark_price);
        self.unrealized_pnl.push(snapshot.unrealized_pnl);
        self.equity.push(snapshot.equity);
    }
}

impl From<&[Snapshot]> for SnapshotColumns {
    fn from(value: &[Snapshot]) -> Self {
        let mut columns = SnapshotColumns::new();
        for snapshot in value {
            columns.push(snapshot);
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::{Camilla, ColumnError};
    use crate::engine::barra_v1::Side;

    #[test]
    fn test_that_mismatched_columns_are_rejected() {
        let result = Camilla::from_columns(vec![100, 101], vec![10], vec![1.0, 1.0], vec![0, 1]);
        assert_eq!(result.err(), Some(ColumnError::LengthMismatch));
    }

    #[test]
    fn test_that_bad_side_values_are_rejected() {
        let result = Camilla::from_columns(vec![100], vec![10], vec![1.0], vec![2]);
        assert_eq!(
            result.err(),
            Some(ColumnError::BadSide { pos: 0, value: 2 })
        );
    }

    #[test]
    fn test_that_rows_round_trip_through_columns() {
        let data =
            Camilla::from_columns(vec![100, 101], vec![10, 11], vec![1.0, 2.0], vec![0, 1]).unwrap();

        let first = data.get(0).unwrap();
        assert_eq!(first.ts_ms, 100);
        assert_eq!(first.side, Side::Buy);

        let second = data.get(1).unwrap();
        assert_eq!(second.price_ticks, 11);
        assert_eq!(second.side, Side::Sell);

        assert!(data.get(2).is_none());
    }

    #[test]
    fn test_that_random_produces_ordered_timestamps() {
        let data = Camilla::random(1_000, 10.0);

        assert_eq!(data.len(), 1_000);
        for window in data.ts_ms().windows(2) {
            assert!(window[0] <= window[1]);
        }
    }
}

//! Engines are the main interface presented to clients. An engine owns the full account state for
//! one simulated run (cash, position, resting orders, PnL) and advances it tick-by-tick. The
//! execution logic itself lives in the fill model which is kept pure so that the engine primarily
//! concerns itself with sequencing, admission of orders, and the snapshot history that clients
//! consume downstream.
pub mod barra_v1;

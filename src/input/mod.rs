//! Inputs wrap around a dataset providing a simple transparent interface producing the tick type
//! that engines operate on.
//!
//! The columnar layout used here doubles as the batch transfer format: ticks are held as one
//! fixed-width array per field so that a host on the other side of a language boundary can hand a
//! whole dataset over without row-by-row marshalling.
pub mod camilla;

//! # What is Ludwigia?
//!
//! Ludwigia provides a deterministic trade-execution simulator against which users can evaluate
//! trading strategies. The standard mechanism for creating and running a simulation is the JSON
//! server but users can also import a lib. The simulator only decides whether and at what price
//! an order fills and how account state evolves; deciding what orders to place, loading market
//! data, and computing performance metrics are left to callers.
//!
//! # Implementation
//!
//! A simulator is composed of:
//! - An engine implementation, [BarraV1](crate::engine::barra_v1::BarraV1) is the current one.
//!   The engine owns the account state for one run, admits orders, fills them against ticks
//!   through a pure fill model, and appends one snapshot per tick to an append-only history.
//!   Given identical inputs in identical order, the history is bit-identical across runs, across
//!   processes, and across single-call versus batch invocation.
//! - An input, [Camilla](crate::input::camilla::Camilla) is an example. Inputs hold ticks in
//!   columnar layout so a whole dataset can be handed across a language boundary without
//!   row-by-row marshalling, and the batch driver runs directly over the columns.
//! - The server implementation returning JSON responses over a registry of engine instances.
//!   Instances are created, operated through their id, and destroyed explicitly; operations on a
//!   destroyed instance fail fast.
//! - The client implementation which provides a Rust API for the server, as much for documenting
//!   how clients can call the server.
//!
//! The engine contains no native synchronization: every operation on one instance is synchronous
//! and assumes a single logical thread of control. Independent instances share no state so hosts
//! can run parameter sweeps with one instance per worker.
//!
//! ``
//! cargo run --bin barra_server_v1 [ipv4_address] [port]
//! ``
pub mod engine;
pub mod http;
pub mod input;

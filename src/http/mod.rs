//! JSON server and Rust client over the engine. The server holds a registry of engine instances
//! keyed by id; creating an instance hands the id back to the client and destroying it releases
//! the instance, after which any operation on that id fails fast.
pub mod barra_v1;

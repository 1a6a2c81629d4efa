// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

mod error;
mod postgres_counter_store;

pub use error::classify_sqlstate;
pub use postgres_counter_store::PostgresConnector;
pub use postgres_counter_store::PostgresCounterStore;

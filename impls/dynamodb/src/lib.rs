// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

mod dynamo_counter_store;
mod error;

pub use dynamo_counter_store::DynamoCounterStore;
pub use error::classify_service_error;

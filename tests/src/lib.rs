// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! counterbench test utilities

pub mod fixtures;
pub mod scenarios;

pub use futures;

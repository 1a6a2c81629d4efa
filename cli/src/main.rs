// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! counterbench - runs shared-counter experiments against a backend

use anyhow::Result;
use clap::Parser;
use counterbench_cli_lib::CommonArgs;

#[derive(Parser, Debug)]
#[clap(
    name = "counterbench",
    about = "Concurrency-control strategies on a shared counter"
)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    counterbench_core::init_logging(args.common.log_level)?;

    let summaries = counterbench_cli_lib::run(&args.common).await?;
    counterbench_cli_lib::print_summaries(&summaries, args.common.json)
}

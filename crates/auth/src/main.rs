// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use qbo_auth::config::Config;
use qbo_auth::error::AuthError;
use qbo_auth::run::{init_tracing, run};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e.downcast_ref::<AuthError>().map(AuthError::exit_code).unwrap_or(1);
            std::process::exit(code);
        }
    }
}

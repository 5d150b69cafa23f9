//! Minimal worker: one app, one function, runs until SIGINT/SIGTERM.
//!
//! ```sh
//! SIGNING_KEY=signkey-test-00ff cargo run --example basic_worker
//! ```

use tungsten::prelude::*;

#[tokio::main]
async fn main() -> Result<(), TungstenError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let worker = Worker::builder()
        .signing_key(std::env::var("SIGNING_KEY").unwrap_or_default())
        .dev(std::env::var("SIGNING_KEY").is_err())
        .app("demo", Some("1.0.0".to_string()), Vec::new())
        .function(
            "demo",
            "echo",
            |input: FunctionInput| -> Result<FunctionOutput, FunctionError> {
                Ok(FunctionOutput::ok(input.body))
            },
        )
        .connect()
        .await?;

    println!("worker state: {}", worker.state());
    worker.closed().await;
    Ok(())
}

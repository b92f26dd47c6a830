//! Echo front end speaking the bridge protocol on stdin/stdout.
//!
//! Answers `echo` calls with their input and serves until stdin closes or
//! ctrl-c. Launches the configured companion first, if any.

use anyhow::Context;
use hostbridge::logging::init_tracing;
use hostbridge::transport::stream;
use hostbridge::{Bridge, BridgeConfig, CallContext, handler_fn};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("hostbridge-echo {}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::from_env();
    let bridge = Bridge::new(config);

    bridge.handle(
        "echo",
        handler_fn(|call: CallContext| async move {
            call.reply(call.input().clone()).await?;
            Ok(())
        }),
    );

    if bridge.config().launcher.is_some() {
        bridge
            .try_launch()
            .await
            .context("failed to launch companion")?;
    }

    let (activation, handle) = stream::activation(tokio::io::stdin(), tokio::io::stdout());
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, closing connection");
            cancel.cancel();
        }
    });

    let reason = bridge
        .serve(activation)
        .await
        .context("bridge refused activation")?;
    info!(reason = reason.as_str(), "Bridge stopped");
    Ok(())
}

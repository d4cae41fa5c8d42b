// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `emberd`
//!
//! Binds [`ember_runtime::Runtime`] to a TCP socket: one newline-delimited
//! command in, one reply line out. Config is resolved here, at the binary
//! layer, and handed to the runtime as plain values, so the runtime crate
//! itself never depends on a config format.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ember_build_sched::{BuildOutcome, Builder};
use ember_config::{ConfigService, FsConfigStore};
use ember_core::ModuleId;
use ember_runtime::{Runtime, RuntimeConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address the command socket binds to.
    #[clap(long, default_value = "127.0.0.1:7777")]
    listen: SocketAddr,

    /// Config key loaded from the platform config directory (file
    /// `<key>.json`); missing or malformed config falls back to built-in
    /// defaults rather than failing startup.
    #[clap(long, default_value = "emberd")]
    config_key: String,

    /// Byte budget the build cache evicts against.
    #[clap(long, default_value_t = 512 * 1024 * 1024)]
    cache_max_bytes: usize,

    /// Memory budget telemetry's memory-pressure metric normalizes against.
    #[clap(long, default_value_t = 4u64 * 1024 * 1024 * 1024)]
    memory_budget_bytes: u64,

    /// CPU cores the build scheduler assumes are available.
    #[clap(long, default_value_t = 4)]
    build_cores: usize,
}

/// Placeholder compiler-driver invocation. The compiler driver is opaque to
/// the core by design, so until a real driver process is wired in, every
/// build reports an immediate, zero-cost success.
struct NoopBuilder;

#[async_trait::async_trait]
impl Builder for NoopBuilder {
    async fn build(&self, module: ModuleId) -> BuildOutcome {
        info!(%module, "build (no-op compiler driver)");
        BuildOutcome { success: true, message: None, time_ns: 0 }
    }
}

fn runtime_config(args: &Args) -> RuntimeConfig {
    let mut config = RuntimeConfig {
        cache_max_bytes: args.cache_max_bytes,
        memory_budget_bytes: args.memory_budget_bytes,
        ..RuntimeConfig::default()
    };
    config.build_budget.cores = args.build_cores;

    match FsConfigStore::new() {
        Ok(store) => {
            let mut service = ConfigService::new(store);
            if let Err(err) = service.load(&args.config_key) {
                warn!(error = %err, "no on-disk config loaded, using built-in defaults");
                return config;
            }
            let tree = service.current();
            if let Some(bytes) = tree
                .get("cache_max_bytes")
                .and_then(ember_config::ConfigValue::as_int)
                .and_then(|n| usize::try_from(n).ok())
            {
                config.cache_max_bytes = bytes;
            }
            if let Some(bytes) = tree
                .get("memory_budget_bytes")
                .and_then(ember_config::ConfigValue::as_int)
                .and_then(|n| u64::try_from(n).ok())
            {
                config.memory_budget_bytes = bytes;
            }
            config
        }
        Err(err) => {
            warn!(error = %err, "config directory unavailable, using built-in defaults");
            config
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber failed")?;

    info!(listen = %args.listen, "starting emberd");

    let config = runtime_config(&args);
    let runtime = Arc::new(Mutex::new(Runtime::new(config, Arc::new(NoopBuilder))));

    let listener = TcpListener::bind(args.listen).await.context("binding command socket")?;
    info!(addr = %listener.local_addr()?, "command socket listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "accept failed");
                continue;
            }
        };
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            if let Err(err) = serve_connection(socket, &runtime).await {
                warn!(%peer, error = %err, "connection ended with an error");
            }
        });
    }
}

async fn serve_connection(
    socket: tokio::net::TcpStream,
    runtime: &Arc<Mutex<Runtime>>,
) -> Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await.context("reading command line")? {
        if line.trim().is_empty() {
            continue;
        }
        let now_micros = now_micros();
        let reply = {
            let mut runtime = runtime.lock().await;
            runtime.dispatch(&line, now_micros).await
        };
        write_half.write_all(reply.as_bytes()).await.context("writing reply")?;
        write_half.write_all(b"\n").await.context("writing reply newline")?;
    }
    Ok(())
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn now_micros_is_nonzero_after_epoch() {
        assert!(now_micros() > 0);
    }

    #[test]
    fn default_args_parse_from_just_the_binary_name() {
        let args = Args::parse_from(["emberd"]);
        assert_eq!(args.listen, "127.0.0.1:7777".parse::<SocketAddr>().unwrap());
        assert_eq!(args.config_key, "emberd");
    }
}

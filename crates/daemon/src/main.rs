// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `opford` — the OPFOR engagement daemon.

use tracing_subscriber::EnvFilter;

use opfor_daemon::lifecycle::{self, Config};

fn init_tracing(base_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard>
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,opfor_daemon=debug"));

    match std::fs::create_dir_all(base_dir.join("logs")) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(base_dir.join("logs"), "opford.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("opford: {e}");
            std::process::exit(1);
        }
    };
    let _guard = init_tracing(&config.base_dir);

    let code = lifecycle::run(config).await;
    std::process::exit(code);
}

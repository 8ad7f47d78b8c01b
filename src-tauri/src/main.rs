// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("object_lens=debug,object_lens_lib=debug,info")))
        .init();

    tracing::info!("Starting Object Lens v{}", env!("CARGO_PKG_VERSION"));
    object_lens_lib::run()
}

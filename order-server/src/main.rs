use order_server::utils::{init_logger, init_logger_with_file};
use order_server::{Config, Server};

fn print_banner(config: &Config) {
    println!();
    println!("  order-server v{}", env!("CARGO_PKG_VERSION"));
    println!("  environment : {}", config.environment);
    println!("  http        : 0.0.0.0:{}", config.http_port);
    println!(
        "  cache       : {:?} (capacity {})",
        config.cache_backend, config.cache_capacity
    );
    println!(
        "  channel     : {:?} (topic {})",
        config.channel_backend, config.orders_topic
    );
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    // Logging settings live in the config; a broken config still gets a
    // console logger so the error is reported
    let config = match Config::from_env() {
        Ok(config) => {
            init_logger_with_file(&config.log_level, config.log_json, config.log_dir.as_deref())?;
            config
        }
        Err(e) => {
            init_logger("info", false)?;
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    print_banner(&config);
    tracing::info!(
        environment = %config.environment,
        cache_backend = ?config.cache_backend,
        channel_backend = ?config.channel_backend,
        "Starting order-server"
    );

    if let Err(e) = Server::new(config).run().await {
        tracing::error!(error = %e, "Order server failed");
        return Err(e.into());
    }
    Ok(())
}

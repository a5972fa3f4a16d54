use clap::Parser;
use sqlx::postgres::PgPoolOptions;

mod models;
mod repositories;
pub mod services;
pub mod settings;

#[derive(Parser)]
#[command(about = "Subscription-gated course bot backend")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: String,
    /// Path to the log4rs configuration file.
    #[arg(long, default_value = "log4rs.yaml")]
    log_config: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    dotenv::dotenv().ok();
    log4rs::init_file(&cli.log_config, Default::default()).expect("Could not set up logging.");

    let config = settings::Settings::from_file(&cli.config).expect("Could not load config file.");
    let conn = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.postgres.url)
        .await
        .expect("Could not connect to database.");

    sqlx::migrate!("./migrations")
        .run(&conn)
        .await
        .expect("Could not run database migrations.");

    println!("[*] Starting services.");
    // Holds the inbound event senders; dropping them would stop the services.
    let _channels = services::start_services(conn, config)
        .await
        .expect("Could not start services.");

    tokio::signal::ctrl_c()
        .await
        .expect("Could not listen for shutdown signal.");
    println!("[*] Shutting down.");
}

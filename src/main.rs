mod api;
mod config;
mod db;
mod error;
mod payment;
mod provider;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

use crate::{
    api::InnerData,
    config::Config,
    db::{PaymentStore, SqliteStore},
    payment::{NewPayment, STATUS_PENDING},
    provider::ProviderClient,
};

#[derive(Parser, Debug)]
#[command(about = "Payment provider proxy: create, approve and execute payments")]
struct Args {
    /// Address the HTTP listener binds to
    #[arg(long, global = true, env = "BIND_ADDR", default_value = "0.0.0.0:9999")]
    bind: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Store a payment record so a later execute can mark it approved
    Record {
        #[arg(long)]
        payment_id: String,
        #[arg(long)]
        payer_id: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "USD")]
        currency: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = STATUS_PENDING)]
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_tracing(args.log_json);

    let config = Config::from_env().context("invalid configuration")?;

    tracing::info!(?config, "starting payflow");

    let pool = db::init_pool(&config).context("opening database")?;
    let store = SqliteStore::new(pool);

    match args.command {
        Some(Command::Record {
            payment_id,
            payer_id,
            amount,
            currency,
            email,
            status,
        }) => {
            let payment = store.insert(NewPayment {
                payer_id,
                payment_id,
                amount,
                currency,
                status,
                email,
            })?;

            tracing::info!(id = payment.id, %payment, "payment recorded");

            return Ok(());
        }
        Some(Command::Serve) | None => {}
    }

    let provider = ProviderClient::new(reqwest::Client::new(), &config);

    let data = Arc::new(InnerData {
        config,
        provider,
        store: Box::new(store),
    });

    api::serve(data, &args.bind).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

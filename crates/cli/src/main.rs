//! Koi Market CLI - Database migrations and operator tools.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! koi-cli migrate
//!
//! # Sign a webhook payload the way the payment provider does
//! koi-cli webhook sign --file event.json
//!
//! # Price a cart subtotal with an optional coupon
//! koi-cli quote --subtotal 250 --coupon SAVE20 --coupons-file coupons.json
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `webhook sign` - Compute the `signature` header for a payload
//! - `quote` - Print the price breakdown for a subtotal

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

mod commands;

#[derive(Parser)]
#[command(name = "koi-cli")]
#[command(author, version, about = "Koi Market CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Webhook utilities
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Print the price breakdown for a subtotal
    Quote {
        /// Cart subtotal
        #[arg(short, long)]
        subtotal: Decimal,

        /// Coupon code to apply
        #[arg(short, long)]
        coupon: Option<String>,

        /// JSON coupon catalogue (defaults to `COUPONS_FILE`)
        #[arg(long)]
        coupons_file: Option<PathBuf>,

        /// Flat shipping fee
        #[arg(long, default_value = "15")]
        shipping_fee: Decimal,

        /// Subtotal from which shipping is free
        #[arg(long, default_value = "500")]
        threshold: Decimal,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Compute the signature for a payload
    Sign {
        /// File containing the exact payload bytes (stdin when omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::storefront().await?,
        Commands::Webhook { action } => match action {
            WebhookAction::Sign { file } => commands::webhook::sign(file.as_deref())?,
        },
        Commands::Quote {
            subtotal,
            coupon,
            coupons_file,
            shipping_fee,
            threshold,
        } => commands::quote::print(commands::quote::QuoteArgs {
            subtotal,
            coupon,
            coupons_file,
            shipping_fee,
            threshold,
        })?,
    }
    Ok(())
}

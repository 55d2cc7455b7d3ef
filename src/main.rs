use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use clap::Parser;

mod app;
mod auth;
mod cli;
mod config;
mod embed;
mod items;
mod search;
mod storage;
#[cfg(test)]
mod tests;
mod vectors;
mod web;

use app::App;
use config::Config;
use items::{ItemCreate, ItemFilters};
use search::SearchQuery;

fn base_path() -> PathBuf {
    std::env::var("ROLODEX_BASE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let base_path = base_path();
    let config = Arc::new(RwLock::new(Config::load_with(&base_path)));

    match args.command {
        cli::Command::Daemon {} => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();

            let mut app = App::new(config, &base_path)?;
            app.run_queue();
            web::start_daemon(app);
            Ok(())
        }

        cli::Command::Search {
            owner,
            query,
            category,
            vendor,
            colour,
            price_max,
            limit,
            cursor,
            keyword,
        } => {
            let app = App::new(config, &base_path)?;

            let search_query = SearchQuery {
                owner_id: owner,
                text: query,
                filters: ItemFilters {
                    category,
                    vendor,
                    colour_hex: colour,
                    price_max,
                },
                limit,
                cursor,
                semantic: !keyword,
            };

            let response = app.search(&search_query)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }

        cli::Command::Add {
            owner,
            img_url,
            src_url,
            title,
            vendor,
            description,
            category,
            material,
            colour,
            price,
            currency,
        } => {
            let app = App::new(config, &base_path)?;

            let item = app.create(
                &owner,
                ItemCreate {
                    img_url,
                    src_url,
                    title,
                    vendor,
                    description,
                    category,
                    material,
                    colour_hex: colour,
                    price,
                    currency,
                },
            )?;

            // no queue in one-shot mode; embed inline, tolerating failure
            app.enrich_now(&owner, &item.id);

            println!("{}", serde_json::to_string_pretty(&item)?);
            Ok(())
        }

        cli::Command::Reembed { owner } => {
            let app = App::new(config, &base_path)?;
            let count = app.reembed(&owner)?;
            println!("{count} items enriched");
            Ok(())
        }
    }
}

extern crate dotenv;

use dotenv::dotenv;
use std::error::Error;

use crypto_events_hub::events::Events;
use crypto_events_hub::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load()?;
    let events = Events::from_config(&config.events)?;

    let loaded = events.fetch_and_build().await;

    println!("{:?}", loaded.origin);
    println!("{:#?}", loaded.events);

    Ok(())
}

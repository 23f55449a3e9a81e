use log::info;
use mongodb::bson::doc;
use mongodb::{options::ClientOptions, Client, Database};

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<Database, mongodb::error::Error> {
    // The driver keeps a connection pool per client; requests borrow from it.
    let mut client_options = ClientOptions::parse(&config.database_url).await?;
    client_options.app_name = Some("e-com-cart".to_string());

    let client = Client::with_options(client_options)?;
    let db = client.database(&config.database_name);
    db.run_command(doc! { "ping": 1 }, None).await?;
    info!("connected to MongoDB database {}", config.database_name);
    Ok(db)
}

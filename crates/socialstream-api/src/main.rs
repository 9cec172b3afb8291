use socialstream_api::setup;
use socialstream_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize the application (database, bus, consumer, routes)
    let (_state, router, background) = setup::initialize_app(config.clone()).await?;

    // Start the server
    setup::server::start_server(&config, router, background).await?;

    Ok(())
}

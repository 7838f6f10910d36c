// Process entry: load config, start the scraper, serve the operational endpoints.
use actix_web::{web, App, HttpServer};
use std::io;
use vcenter_scraper::error::ScraperError;
use vcenter_scraper::handlers;
use vcenter_scraper::scraper::{ScraperConfig, VCenterScraper};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn to_io(e: ScraperError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    log::info!("loading config from {}", path);
    let config = ScraperConfig::from_file(&path).map_err(to_io)?;
    let listen_address = config.listen_address.clone();

    let scraper = web::Data::new(VCenterScraper::new(config).map_err(to_io)?);
    if let Err(e) = scraper.start().await {
        log::error!("failed to start scraper: {}", e);
        scraper.stop().await;
        return Err(to_io(e));
    }

    log::info!("listening on {}", listen_address);
    let data = scraper.clone();
    let res = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .configure(handlers::configure)
    })
    .bind(listen_address)?
    .run()
    .await;

    scraper.stop().await;
    res
}

pub mod scraper_handler;

pub use scraper_handler::configure;

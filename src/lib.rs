pub mod error;
pub mod handlers;
pub mod helper;
pub mod pool;
pub mod scraper;
pub mod timequeue;
pub mod vsphere;

#[cfg(test)]
pub(crate) mod testing;

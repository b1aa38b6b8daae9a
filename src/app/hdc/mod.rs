pub mod channel;
pub mod client;
pub mod device;
pub mod gateway;
pub mod locator;
pub mod parse;
pub mod runner;
pub mod tracking;

#[cfg(test)]
pub(crate) mod fake;

pub mod config;
pub mod devices;
pub mod error;
pub mod kernel;
pub mod sim;

#[cfg(test)]
mod tests;

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_support;

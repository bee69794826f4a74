pub mod cli;
pub mod config;
pub mod discovery;
pub mod library;
pub mod metadata_db;
pub mod net;
pub mod player;
pub mod queue;
pub mod runtime;
pub mod state;
pub mod tags;

#[cfg(test)]
mod test_support;

pub mod app;
pub mod cli;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod reflect;
pub mod runner;
pub mod stages;

#[cfg(test)]
mod tests;

pub mod change;
pub mod input;
pub mod orchestrator;
pub mod refresh;
pub mod registry;
pub mod sanitize;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub mod config;
pub mod event_log;
pub mod persistence;
pub mod process;
pub mod tmux;

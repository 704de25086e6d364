pub mod app;
pub mod audio;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod sequencer;
pub mod ui;

pub mod audio;
pub mod bot;
pub mod config;
pub mod sources;
pub mod ui;

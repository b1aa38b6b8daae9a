pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hdc;
pub mod hierarchy;
pub mod logging;
pub mod models;
pub mod shell;
pub mod state;
pub mod ui_capture;
pub mod ui_html;

pub mod color_mode;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod events;
pub mod library;
pub mod processing;
pub mod retry;
pub mod rotation;
pub mod schedule;
pub mod store;
pub mod tasks {
    pub mod buttons;
    pub mod files;
    pub mod frame;
    pub mod ingest;
}

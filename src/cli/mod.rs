pub mod app;
pub mod autocomplete;
pub mod ui;

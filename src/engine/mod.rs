// Book replica + derived metrics
pub mod analytics;
pub mod book;
pub mod types;

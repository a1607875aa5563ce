mod app;
mod dashboard;

pub use app::App;
pub use dashboard::run_ui;

pub mod authorization;
pub mod client;
pub mod listeners;
pub mod utility;

pub use authorization::authorize;
pub use client::WebApiClient;
pub use listeners::{bar_chart_path, bars_back_path, BarChartListener, QuoteListener};
pub use utility::{api_version, is_online};

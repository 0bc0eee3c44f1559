pub mod core;
pub mod webapi;

pub use crate::core::{
    config::{ClientConfig, WebApiEnvironment},
    errors::ClientError,
    events::{ClientEvent, StreamEvent},
    types::*,
};
pub use webapi::{BarChartListener, QuoteListener, WebApiClient};

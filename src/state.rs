use crate::adapter::PricingAdapter;
use std::sync::Arc;

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<PricingAdapter>,
}

impl AppState {
    pub fn new(adapter: Arc<PricingAdapter>) -> Self {
        Self { adapter }
    }
}

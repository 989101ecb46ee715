use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::settlement::models::StatusSummary;

// ========== REQUEST MODELS ==========

/// Paging parameters shared by every listing endpoint, read from the query string
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

// ========== RESPONSE MODELS ==========

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-status breakdown plus grand totals
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub statuses: Vec<StatusSummary>,
    pub bundle_count: i64,
    pub total_amount: Decimal,
    pub total_tax_amount: Decimal,
    pub total_amount_with_tax: Decimal,
}

impl From<Vec<StatusSummary>> for SummaryResponse {
    fn from(statuses: Vec<StatusSummary>) -> Self {
        Self {
            bundle_count: statuses.iter().map(|s| s.bundle_count).sum(),
            total_amount: statuses.iter().map(|s| s.total_amount).sum(),
            total_tax_amount: statuses.iter().map(|s| s.total_tax_amount).sum(),
            total_amount_with_tax: statuses.iter().map(|s| s.total_amount_with_tax).sum(),
            statuses,
        }
    }
}

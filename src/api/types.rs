//! API response types

use std::collections::HashMap;

use serde::Serialize;

use crate::flush::FlushStats;
use crate::module::ModuleSummary;

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    pub timestamp: String,
    pub storage: StorageHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub backend: String,
    pub healthy: bool,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

/// Response for GET /api/v1/stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub flush: FlushStats,
}

/// Response for GET /api/v1/modules
#[derive(Debug, Clone, Serialize)]
pub struct ModulesResponse {
    pub modules: Vec<ModuleSummary>,
}

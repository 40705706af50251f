use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API response for health check
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// Whether the last headcount publish reached redis
    pub redis: bool,
    pub rooms: usize,
    pub connections: usize,
}

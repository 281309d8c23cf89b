//! The `api.v1.APIService` example service.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use switchyard_core::{RequestContext, ServiceDefinition, Status};

/// Fully qualified service name.
pub const SERVICE_NAME: &str = "api.v1.APIService";

/// `Ping` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PingRequest {
    /// Text to echo.
    pub message: String,
}

/// `Ping` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PingResponse {
    /// `"Pong: "` followed by the request message.
    pub message: String,
}

/// Answers `"Pong: " + message`.
pub async fn ping(_ctx: RequestContext, request: PingRequest) -> Result<PingResponse, Status> {
    Ok(PingResponse {
        message: format!("Pong: {}", request.message),
    })
}

/// Builds the service definition.
pub fn api_service() -> ServiceDefinition {
    ServiceDefinition::new(SERVICE_NAME).unary("Ping", ping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::ServiceRegistry;

    #[tokio::test]
    async fn test_ping() {
        let response = ping(
            RequestContext::mock(),
            PingRequest {
                message: "hi".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.message, "Pong: hi");
    }

    #[tokio::test]
    async fn test_ping_empty() {
        let response = ping(RequestContext::mock(), PingRequest::default())
            .await
            .unwrap();
        assert_eq!(response.message, "Pong: ");
    }

    #[test]
    fn test_registration() {
        let mut registry = ServiceRegistry::new();
        registry.register(api_service()).unwrap();

        let handle = registry.lookup(SERVICE_NAME, "Ping").unwrap();
        assert_eq!(handle.descriptor().http_path, "/api.v1.APIService/Ping");
        assert!(registry.lookup("APIService", "Ping").is_ok());
    }
}

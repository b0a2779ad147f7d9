//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check listener addresses and pool limits
//! - Check service names, strategies and endpoints
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::load_balancer::Strategy;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("pool.max_connections must be greater than zero")]
    ZeroPoolSize,

    #[error("service #{index} has an empty name")]
    EmptyServiceName { index: usize },

    #[error("service `{0}` is declared more than once")]
    DuplicateService(String),

    #[error("service `{service}`: unknown strategy `{strategy}`")]
    UnknownStrategy { service: String, strategy: String },

    #[error("service `{service}`: endpoint #{index} has an empty address")]
    EmptyEndpoint { service: String, index: usize },

    #[error("service `{service}`: endpoint `{address}` has zero weight")]
    ZeroWeight { service: String, address: String },
}

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("listener.http_address", &config.listener.http_address),
        ("listener.grpc_address", &config.listener.grpc_address),
    ] {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.clone(),
            });
        }
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.pool.max_connections == 0 {
        errors.push(ValidationError::ZeroPoolSize);
    }

    let mut seen = HashSet::new();
    for (index, service) in config.services.iter().enumerate() {
        let name = service.name.trim();
        if name.is_empty() {
            errors.push(ValidationError::EmptyServiceName { index });
        } else if !seen.insert(name) {
            errors.push(ValidationError::DuplicateService(name.to_owned()));
        }

        if service.strategy.parse::<Strategy>().is_err() {
            errors.push(ValidationError::UnknownStrategy {
                service: service.name.clone(),
                strategy: service.strategy.clone(),
            });
        }

        for (index, endpoint) in service.endpoints.iter().enumerate() {
            if endpoint.address.trim().is_empty() {
                errors.push(ValidationError::EmptyEndpoint {
                    service: service.name.clone(),
                    index,
                });
            } else if endpoint.weight == 0 {
                errors.push(ValidationError::ZeroWeight {
                    service: service.name.clone(),
                    address: endpoint.address.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

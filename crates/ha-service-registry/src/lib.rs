//! Service registry with async handlers for Home Assistant
//!
//! Integrations register `domain.service` handlers here, optionally with a
//! JSON schema for the service data. Calls are validated before they reach
//! the handler.

use dashmap::DashMap;
use ha_core::{Context, ServiceCall};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result of a service handler
pub type ServiceResult = Result<(), ServiceError>;

pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Async service handler
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors from registering or calling services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// No handler registered under this name
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    /// The handler returned an error
    #[error("service call failed: {0}")]
    CallFailed(String),

    /// Service data did not pass the schema
    #[error("invalid service data: {0}")]
    InvalidData(String),

    /// The schema given at registration does not compile
    #[error("invalid schema for {domain}.{service}: {message}")]
    InvalidSchema {
        domain: String,
        service: String,
        message: String,
    },
}

struct RegisteredService {
    handler: ServiceHandler,
    schema: Option<Arc<JSONSchema>>,
}

/// All registered services, keyed by `domain.service`
pub struct ServiceRegistry {
    services: DashMap<String, RegisteredService>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Register (or replace) a service handler
    #[instrument(skip(self, domain, service, handler, schema))]
    pub fn register<F, Fut>(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        handler: F,
        schema: Option<serde_json::Value>,
    ) -> Result<(), ServiceError>
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let domain = domain.into();
        let service = service.into();

        let schema = match schema {
            Some(schema) => {
                let compiled = JSONSchema::compile(&schema).map_err(|e| {
                    ServiceError::InvalidSchema {
                        domain: domain.clone(),
                        service: service.clone(),
                        message: e.to_string(),
                    }
                })?;
                Some(Arc::new(compiled))
            }
            None => None,
        };

        debug!(domain = %domain, service = %service, "Registering service");

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            format!("{}.{}", domain, service),
            RegisteredService { handler, schema },
        );
        Ok(())
    }

    /// Validate `service_data` and run the handler to completion
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let (handler, schema) = {
            let registered = self.services.get(&key).ok_or_else(|| {
                warn!(domain = %domain, service = %service, "Service not found");
                ServiceError::NotFound {
                    domain: domain.to_string(),
                    service: service.to_string(),
                }
            })?;
            (registered.handler.clone(), registered.schema.clone())
        };

        if let Some(schema) = schema {
            if let Err(errors) = schema.validate(&service_data) {
                return Err(ServiceError::InvalidData(humanize_errors(errors)));
            }
        }

        debug!(domain = %domain, service = %service, "Calling service");
        handler(ServiceCall::new(domain, service, service_data, context)).await
    }

    /// Check if a service is registered
    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }

    /// Remove a service, returning whether it existed
    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let removed = self
            .services
            .remove(&format!("{}.{}", domain, service))
            .is_some();

        if removed {
            debug!(domain = %domain, service = %service, "Unregistered service");
        }
        removed
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared reference to the service registry
pub type SharedServiceRegistry = Arc<ServiceRegistry>;

/// Render schema violations as `<problem> @ data['key'][0]`, joined by `; `
pub fn humanize_errors<'a>(errors: impl Iterator<Item = ValidationError<'a>>) -> String {
    errors
        .map(|error| {
            let mut path: Vec<String> = error
                .instance_path
                .to_string()
                .split('/')
                .filter(|chunk| !chunk.is_empty())
                .map(String::from)
                .collect();

            let problem = match &error.kind {
                ValidationErrorKind::Required { property } => {
                    path.push(property.as_str().unwrap_or_default().to_string());
                    "required key not provided".to_string()
                }
                ValidationErrorKind::AdditionalProperties { unexpected } => {
                    path.extend(unexpected.iter().take(1).cloned());
                    "extra keys not allowed".to_string()
                }
                _ => error.to_string(),
            };

            if path.is_empty() {
                problem
            } else {
                format!("{} @ data{}", problem, render_path(&path))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn render_path(path: &[String]) -> String {
    path.iter()
        .map(|chunk| match chunk.parse::<usize>() {
            Ok(index) => format!("[{}]", index),
            Err(_) => format!("['{}']", chunk),
        })
        .collect()
}

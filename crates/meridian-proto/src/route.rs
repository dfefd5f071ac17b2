//! Route identifiers.

use std::str::FromStr;

use crate::error::ProtoError;

/// A dotted identifier locating one handler or remote method.
///
/// Full form is `serverType.serviceName.methodName`; the leading server
/// type is optional for local routing. The registry keys on the short form
/// `serviceName.methodName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Server type owning the target service, when addressing across nodes.
    pub server_type: Option<String>,
    /// Service name.
    pub service: String,
    /// Method name.
    pub method: String,
}

impl Route {
    /// Creates a local route.
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            server_type: None,
            service: service.into(),
            method: method.into(),
        }
    }

    /// Creates a route addressed to a server type.
    #[must_use]
    pub fn remote(
        server_type: impl Into<String>,
        service: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            server_type: Some(server_type.into()),
            service: service.into(),
            method: method.into(),
        }
    }

    /// The registry key, `serviceName.methodName`.
    #[must_use]
    pub fn short(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

impl FromStr for Route {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(ProtoError::InvalidRoute(s.to_owned()));
        }

        match segments.as_slice() {
            [service, method] => Ok(Self::new(*service, *method)),
            [server_type, service, method] => Ok(Self::remote(*server_type, *service, *method)),
            _ => Err(ProtoError::InvalidRoute(s.to_owned())),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.server_type {
            Some(server_type) => {
                write!(f, "{}.{}.{}", server_type, self.service, self.method)
            }
            None => write!(f, "{}.{}", self.service, self.method),
        }
    }
}

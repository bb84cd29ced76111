//! Endpoint instance identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One addressable deployment of a logical endpoint.
///
/// Equality and hashing use both fields, so instances de-duplicate by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointInstance {
    endpoint: String,
    discriminator: Option<String>,
}

impl EndpointInstance {
    /// The default (undiscriminated) instance of `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            discriminator: None,
        }
    }

    #[must_use]
    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// Physical queue address: `endpoint` or `endpoint-discriminator`.
    #[must_use]
    pub fn transport_address(&self) -> String {
        match &self.discriminator {
            Some(d) => format!("{}-{d}", self.endpoint),
            None => self.endpoint.clone(),
        }
    }
}

impl fmt::Display for EndpointInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            Some(d) => write!(f, "{}@{d}", self.endpoint),
            None => f.write_str(&self.endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equality_uses_both_fields() {
        let a = EndpointInstance::new("Sales").with_discriminator("1");
        let b = EndpointInstance::new("Sales").with_discriminator("1");
        let c = EndpointInstance::new("Sales");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn transport_address_appends_discriminator() {
        assert_eq!(EndpointInstance::new("Sales").transport_address(), "Sales");
        assert_eq!(
            EndpointInstance::new("Sales").with_discriminator("blue").transport_address(),
            "Sales-blue"
        );
        assert_eq!(
            EndpointInstance::new("Sales").with_discriminator("blue").to_string(),
            "Sales@blue"
        );
    }
}

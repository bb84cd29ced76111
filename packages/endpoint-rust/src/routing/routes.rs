//! Static unicast route table.

use std::collections::HashMap;

use super::RoutingError;

/// Maps a message kind to the logical endpoint that owns it.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct UnicastRoutes {
    routes: HashMap<String, String>,
}

impl UnicastRoutes {
    #[must_use]
    pub fn new(routes: HashMap<String, String>) -> Self {
        Self { routes }
    }

    /// Logical endpoint for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::NoRoute`] when `kind` has no entry.
    pub fn route_for(&self, kind: &str) -> Result<&str, RoutingError> {
        self.routes
            .get(kind)
            .map(String::as_str)
            .ok_or_else(|| RoutingError::NoRoute {
                kind: kind.to_string(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_kinds_only() {
        let routes = UnicastRoutes::new(HashMap::from([(
            "PlaceOrder".to_string(),
            "Sales".to_string(),
        )]));
        assert_eq!(routes.route_for("PlaceOrder"), Ok("Sales"));
        assert_eq!(
            routes.route_for("ShipOrder"),
            Err(RoutingError::NoRoute {
                kind: "ShipOrder".to_string()
            })
        );
        assert_eq!(routes.len(), 1);
    }
}

use std::collections::BTreeMap;

use ild_db::Server;

use crate::builder::Route;

/// Produces the container labels a reverse proxy discovers routes from.
pub trait LabelBuilder: Send + Sync + 'static {
    fn labels(&self, server: &Server, routes: &[Route]) -> BTreeMap<String, String>;
}

/// Traefik labels: one path-prefix frontend and one `X-Server-Id` header
/// frontend per exposed port.
#[derive(Debug, Clone, Default)]
pub struct TraefikLabels {
    /// Docker network Traefik reaches the container on, if any.
    pub network: Option<String>,
}

impl TraefikLabels {
    pub fn new(network: Option<String>) -> Self {
        Self { network }
    }
}

impl LabelBuilder for TraefikLabels {
    fn labels(&self, server: &Server, routes: &[Route]) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("traefik.enable".to_string(), "true".to_string());
        if let Some(network) = &self.network {
            labels.insert("traefik.docker.network".to_string(), network.clone());
        }

        for route in routes {
            let path = format!("traefik.{}", route.endpoint);
            labels.insert(format!("{path}.port"), route.port.to_string());
            labels.insert(
                format!("{path}.frontend.rule"),
                format!("PathPrefix:{}", route.path),
            );

            let header = format!("traefik.{}-header", route.endpoint);
            labels.insert(format!("{header}.port"), route.port.to_string());
            labels.insert(
                format!("{header}.frontend.rule"),
                format!(
                    "Headers:X-Server-Id,{};PathPrefix:/endpoint/{}",
                    server.id, route.endpoint
                ),
            );
        }

        labels
    }
}

//! Traefik file-provider dynamic configuration, rendered as TOML.

use std::collections::BTreeMap;

use serde::Serialize;

use super::Route;

pub const ENTRYPOINT: &str = "web";

#[derive(Serialize)]
struct DynamicConfig {
    http: HttpSection,
}

#[derive(Serialize)]
struct HttpSection {
    routers: BTreeMap<String, Router>,
    services: BTreeMap<String, Service>,
}

#[derive(Serialize)]
struct Router {
    rule: String,
    service: String,
    #[serde(rename = "entryPoints")]
    entry_points: Vec<String>,
}

#[derive(Serialize)]
struct Service {
    #[serde(rename = "loadBalancer")]
    load_balancer: LoadBalancer,
}

#[derive(Serialize)]
struct LoadBalancer {
    servers: Vec<Server>,
}

#[derive(Serialize)]
struct Server {
    url: String,
}

pub fn router_name(project_id: &str) -> String {
    format!("{project_id}-router")
}

pub fn service_name(project_id: &str) -> String {
    format!("{project_id}-service")
}

/// Render the whole routing table. Output depends only on the table's
/// contents: keys are sorted, so equal tables render byte-identically.
pub fn render(routes: &BTreeMap<String, Route>) -> Result<String, toml::ser::Error> {
    let mut config = DynamicConfig {
        http: HttpSection {
            routers: BTreeMap::new(),
            services: BTreeMap::new(),
        },
    };
    for (project_id, route) in routes {
        let service = service_name(project_id);
        config.http.routers.insert(
            router_name(project_id),
            Router {
                rule: format!("Host(`{}`)", route.domain),
                service: service.clone(),
                entry_points: vec![ENTRYPOINT.to_string()],
            },
        );
        config.http.services.insert(
            service,
            Service {
                load_balancer: LoadBalancer {
                    servers: vec![Server {
                        url: format!("http://localhost:{}", route.port),
                    }],
                },
            },
        );
    }
    toml::to_string(&config)
}

//! Service-catalog resolver (C2): selects an endpoint URL for a
//! (service-name, region) pair out of a token-issuance response.
//!
//! Grounded directly in `otter.worker.launch_server_v1.endpoints`, which
//! filters a list of services by name/type then by region and yields
//! matching endpoints in catalog order.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEndpoint {
    pub region: String,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogService {
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub endpoints: Vec<CatalogEndpoint>,
}

/// The service catalog as returned alongside an auth token.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceCatalog {
    #[serde(rename = "serviceCatalog")]
    pub services: Vec<CatalogService>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoEndpointError {
    #[error("no endpoint found for service_name={service_name:?} service_type={service_type:?} region={region:?}")]
    NotFound {
        service_name: Option<String>,
        service_type: Option<String>,
        region: Option<String>,
    },
    #[error("endpoint URL was not a valid URL: {0}")]
    InvalidUrl(String),
}

/// Filters the catalog down to endpoints matching the given criteria. Ties
/// (multiple endpoints satisfying the filter) are broken by input order --
/// the first match in the catalog's own ordering wins.
pub fn endpoints<'a>(
    catalog: &'a ServiceCatalog,
    service_name: Option<&'a str>,
    service_type: Option<&'a str>,
    region: Option<&'a str>,
) -> impl Iterator<Item = &'a CatalogEndpoint> + 'a {
    catalog
        .services
        .iter()
        .filter(move |service| {
            service_type.map_or(true, |t| t == service.service_type)
                && service_name.map_or(true, |n| n == service.name)
        })
        .flat_map(move |service| service.endpoints.iter())
        .filter(move |endpoint| region.map_or(true, |r| r == endpoint.region))
}

/// Returns the first matching endpoint's URL, or `NoEndpointError` if none
/// match -- the empty-result-is-an-error contract documented at call sites.
pub fn resolve_endpoint(
    catalog: &ServiceCatalog,
    service_name: Option<&str>,
    service_type: Option<&str>,
    region: Option<&str>,
) -> Result<Url, NoEndpointError> {
    let found = endpoints(catalog, service_name, service_type, region)
        .next()
        .ok_or_else(|| NoEndpointError::NotFound {
            service_name: service_name.map(str::to_owned),
            service_type: service_type.map(str::to_owned),
            region: region.map(str::to_owned),
        })?;
    Url::parse(&found.public_url).map_err(|_| NoEndpointError::InvalidUrl(found.public_url.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ServiceCatalog {
        ServiceCatalog {
            services: vec![
                CatalogService {
                    name: "cloudLoadBalancers".to_owned(),
                    service_type: "rax:load-balancer".to_owned(),
                    endpoints: vec![CatalogEndpoint {
                        region: "ORD".to_owned(),
                        public_url: "https://ord.loadbalancers.example.com/v1.0/1".to_owned(),
                    }],
                },
                CatalogService {
                    name: "cloudServersOpenStack".to_owned(),
                    service_type: "compute".to_owned(),
                    endpoints: vec![
                        CatalogEndpoint {
                            region: "ORD".to_owned(),
                            public_url: "https://ord.servers.example.com/v2/1".to_owned(),
                        },
                        CatalogEndpoint {
                            region: "DFW".to_owned(),
                            public_url: "https://dfw.servers.example.com/v2/1".to_owned(),
                        },
                    ],
                },
            ],
        }
    }

    #[test]
    fn resolves_by_name_and_region() {
        let url = resolve_endpoint(&catalog(), Some("cloudServersOpenStack"), None, Some("DFW"))
            .unwrap();
        assert_eq!(url.as_str(), "https://dfw.servers.example.com/v2/1");
    }

    #[test]
    fn empty_result_is_an_error() {
        let err =
            resolve_endpoint(&catalog(), Some("cloudServersOpenStack"), None, Some("LON"))
                .unwrap_err();
        assert!(matches!(err, NoEndpointError::NotFound { .. }));
    }

    #[test]
    fn ties_broken_by_catalog_order() {
        let mut c = catalog();
        c.services[1].endpoints.push(CatalogEndpoint {
            region: "DFW".to_owned(),
            public_url: "https://dfw2.servers.example.com/v2/1".to_owned(),
        });
        let url =
            resolve_endpoint(&c, Some("cloudServersOpenStack"), None, Some("DFW")).unwrap();
        assert_eq!(url.as_str(), "https://dfw.servers.example.com/v2/1");
    }
}

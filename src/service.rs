use std::net::IpAddr;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::error::Error;
use crate::ledger::{Port, Protocol};

/// Opaque key under which services agree to share one address.
pub const SHARING_KEY_ANNOTATION: &str = "keel.dev/sharing-key";
/// Pool the service wants its address drawn from.
pub const DESIRED_POOL_ANNOTATION: &str = "keel.dev/address-pool";
/// Pool the current address was drawn from, written back by the caller.
pub const POOL_BINDING_ANNOTATION: &str = "keel.dev/allocated-pool";

pub fn namespaced_name(svc: &Service) -> String {
    match svc.namespace() {
        Some(ns) => format!("{ns}/{}", svc.name_any()),
        None => svc.name_any(),
    }
}

pub fn is_loadbalancer(svc: &Service) -> bool {
    match svc.spec.as_ref().and_then(|spec| spec.type_.as_ref()) {
        Some(t) => t.eq("LoadBalancer"),
        None => false,
    }
}

/// The service's cluster-internal address. Drives the address family of the
/// allocation; headless or malformed values leave the family unconstrained.
pub fn cluster_addr(svc: &Service) -> Option<IpAddr> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_ref())
        .and_then(|ip| IpAddr::from_str(ip).ok())
}

/// The address the service demands, if it demands one.
pub fn explicit_lb_addr(svc: &Service) -> Result<Option<IpAddr>, Error> {
    match svc.spec.as_ref().and_then(|spec| spec.load_balancer_ip.as_ref()) {
        Some(raw) if !raw.is_empty() => IpAddr::from_str(raw)
            .map(Some)
            .map_err(|_| Error::InvalidAddress(raw.clone())),
        _ => Ok(None),
    }
}

pub fn ports(svc: &Service) -> Vec<Port> {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| {
                    let port = u16::try_from(p.port).ok()?;
                    let protocol = p
                        .protocol
                        .as_deref()
                        .and_then(|s| Protocol::from_str(s).ok())
                        .unwrap_or(Protocol::Tcp);
                    Some(Port { protocol, port })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn sharing_key(svc: &Service) -> String {
    svc.annotations()
        .get(SHARING_KEY_ANNOTATION)
        .cloned()
        .unwrap_or_default()
}

pub fn desired_pool(svc: &Service) -> Option<String> {
    svc.annotations()
        .get(DESIRED_POOL_ANNOTATION)
        .cloned()
        .filter(|s| !s.is_empty())
}

/// Addresses already written to the service's loadBalancer status, used to
/// re-warm the allocator from existing services at startup.
pub fn allocated_ingress_addrs(svc: &Service) -> Vec<IpAddr> {
    svc.status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .filter_map(|i| i.ip.as_deref().and_then(|ip| IpAddr::from_str(ip).ok()))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServicePort, ServiceSpec, ServiceStatus,
    };
    use kube::core::ObjectMeta;
    use rstest::rstest;

    use super::*;

    fn svc_with_spec(spec: ServiceSpec) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("unit".to_string()),
                name: Some("svc".to_string()),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        }
    }

    fn svc_with_annotations(annotations: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                namespace: Some("unit".to_string()),
                name: Some("svc".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<String, String>>(),
                ),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn works_namespaced_name() {
        let svc = svc_with_spec(ServiceSpec::default());
        assert_eq!(namespaced_name(&svc), "unit/svc");
    }

    #[rstest]
    #[case(Some("LoadBalancer"), true)]
    #[case(Some("ClusterIP"), false)]
    #[case(None, false)]
    fn works_is_loadbalancer(#[case] type_: Option<&str>, #[case] expected: bool) {
        let svc = svc_with_spec(ServiceSpec {
            type_: type_.map(|t| t.to_string()),
            ..Default::default()
        });
        assert_eq!(is_loadbalancer(&svc), expected);
    }

    #[rstest]
    #[case(Some("10.96.0.10"), Some("10.96.0.10"))]
    #[case(Some("2001:db8::10"), Some("2001:db8::10"))]
    #[case(Some("None"), None)]
    #[case(None, None)]
    fn works_cluster_addr(#[case] cluster_ip: Option<&str>, #[case] expected: Option<&str>) {
        let svc = svc_with_spec(ServiceSpec {
            cluster_ip: cluster_ip.map(|ip| ip.to_string()),
            ..Default::default()
        });
        assert_eq!(
            cluster_addr(&svc),
            expected.map(|ip| IpAddr::from_str(ip).unwrap())
        );
    }

    #[rstest]
    #[case(Some("1.2.3.4"), Ok(Some("1.2.3.4")))]
    #[case(Some(""), Ok(None))]
    #[case(None, Ok(None))]
    #[case(Some("bogus"), Err(Error::InvalidAddress("bogus".to_string())))]
    fn works_explicit_lb_addr(
        #[case] lb_ip: Option<&str>,
        #[case] expected: Result<Option<&str>, Error>,
    ) {
        let svc = svc_with_spec(ServiceSpec {
            load_balancer_ip: lb_ip.map(|ip| ip.to_string()),
            ..Default::default()
        });
        assert_eq!(
            explicit_lb_addr(&svc),
            expected.map(|o| o.map(|ip| IpAddr::from_str(ip).unwrap()))
        );
    }

    #[test]
    fn works_ports() {
        let svc = svc_with_spec(ServiceSpec {
            ports: Some(vec![
                ServicePort {
                    port: 80,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: 53,
                    protocol: Some("UDP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: 443,
                    protocol: None,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });
        assert_eq!(
            ports(&svc),
            vec![
                Port {
                    protocol: Protocol::Tcp,
                    port: 80
                },
                Port {
                    protocol: Protocol::Udp,
                    port: 53
                },
                Port {
                    protocol: Protocol::Tcp,
                    port: 443
                },
            ]
        );
    }

    #[test]
    fn works_annotations() {
        let svc = svc_with_annotations(&[
            (SHARING_KEY_ANNOTATION, "share"),
            (DESIRED_POOL_ANNOTATION, "alternate"),
        ]);
        assert_eq!(sharing_key(&svc), "share");
        assert_eq!(desired_pool(&svc), Some("alternate".to_string()));

        let bare = svc_with_annotations(&[]);
        assert_eq!(sharing_key(&bare), "");
        assert_eq!(desired_pool(&bare), None);
    }

    #[test]
    fn works_allocated_ingress_addrs() {
        let mut svc = svc_with_spec(ServiceSpec::default());
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![
                    LoadBalancerIngress {
                        ip: Some("10.0.0.1".to_string()),
                        ..Default::default()
                    },
                    LoadBalancerIngress {
                        hostname: Some("lb.example.com".to_string()),
                        ..Default::default()
                    },
                    LoadBalancerIngress {
                        ip: Some("2001:db8::1".to_string()),
                        ..Default::default()
                    },
                ]),
            }),
            ..Default::default()
        });
        assert_eq!(
            allocated_ingress_addrs(&svc),
            vec![
                IpAddr::from_str("10.0.0.1").unwrap(),
                IpAddr::from_str("2001:db8::1").unwrap(),
            ]
        );
    }
}

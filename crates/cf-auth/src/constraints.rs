//! Role constraint matching.
//!
//! Evaluated in order, first failure wins:
//! 1. Bound CIDRs: the caller's address must fall in one of them
//! 2. IP matching: the caller's address must equal the certificate's IP
//! 3. Bound instance, app, org and space IDs
//!
//! Empty lists are unrestricted.

use crate::identity::{Identity, IdentityField};
use crate::role::Role;
use crate::{Error, Result};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

/// Checks an identity and the caller's address against a role.
pub fn check(identity: &Identity, role: &Role, remote_addr: Option<&str>) -> Result<()> {
    check_bound_cidrs(&role.bound_cidrs, remote_addr)?;

    if !role.disable_ip_matching {
        let matches = remote_addr
            .and_then(parse_remote_addr)
            .is_some_and(|ip| ip == identity.ip_address.to_canonical());
        if !matches {
            return Err(Error::IpMismatch);
        }
    }

    for (field, allowed) in [
        (IdentityField::InstanceId, &role.bound_instance_ids),
        (IdentityField::AppId, &role.bound_app_ids),
        (IdentityField::OrgId, &role.bound_org_ids),
        (IdentityField::SpaceId, &role.bound_space_ids),
    ] {
        let value = identity.field(field);
        if !meets_bound_constraints(value, allowed) {
            return Err(Error::ConstraintViolation {
                field,
                value: value.to_string(),
                allowed: allowed.clone(),
            });
        }
    }

    Ok(())
}

/// Checks the caller's address against bound CIDRs only.
///
/// Login runs this before any cryptographic work so out-of-range callers are
/// turned away cheaply.
pub fn check_bound_cidrs(bound_cidrs: &[IpNet], remote_addr: Option<&str>) -> Result<()> {
    if bound_cidrs.is_empty() {
        return Ok(());
    }
    let Some(raw) = remote_addr else {
        tracing::warn!("bound CIDRs configured but no connection information available");
        return Err(Error::CidrMismatch("<unknown>".to_string()));
    };
    let allowed = parse_remote_addr(raw)
        .is_some_and(|ip| bound_cidrs.iter().any(|net| net.contains(&ip)));
    if allowed {
        Ok(())
    } else {
        Err(Error::CidrMismatch(raw.to_string()))
    }
}

fn meets_bound_constraints(value: &str, constraints: &[String]) -> bool {
    constraints.is_empty() || constraints.iter().any(|c| c == value)
}

/// Parses a remote address such as `10.255.181.105`, `10.255.181.105/32` or
/// `10.255.181.105:52312`. Any subnet mask is dropped; use bound CIDRs to
/// match on subnets. IPv4-mapped IPv6 addresses (`::ffff:10.255.181.105`,
/// as seen on dual-stack listeners) come back as plain IPv4.
pub fn parse_remote_addr(raw: &str) -> Option<IpAddr> {
    let host = raw.split('/').next().unwrap_or(raw).trim();
    host.parse::<IpAddr>()
        .ok()
        .or_else(|| host.parse::<SocketAddr>().ok().map(|s| s.ip()))
        .map(|ip| ip.to_canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity::new("inst-1", "app-1", "org-1", "space-1", "10.0.0.7".parse().unwrap()).unwrap()
    }

    fn role() -> Role {
        Role::new("web")
    }

    #[test]
    fn test_unrestricted_role_matching_ip() {
        assert!(check(&identity(), &role(), Some("10.0.0.7")).is_ok());
        assert!(check(&identity(), &role(), Some("10.0.0.7/32")).is_ok());
        assert!(check(&identity(), &role(), Some("10.0.0.7:41234")).is_ok());
    }

    #[test]
    fn test_ip_mismatch() {
        let result = check(&identity(), &role(), Some("10.0.0.8"));
        assert!(matches!(result, Err(Error::IpMismatch)));

        let result = check(&identity(), &role(), None);
        assert!(matches!(result, Err(Error::IpMismatch)));
    }

    #[test]
    fn test_ip_matching_disabled() {
        let mut role = role();
        role.disable_ip_matching = true;
        assert!(check(&identity(), &role, Some("192.168.1.1")).is_ok());
        assert!(check(&identity(), &role, None).is_ok());
    }

    #[test]
    fn test_bound_cidrs() {
        let mut role = role();
        role.bound_cidrs = vec!["10.0.0.0/24".parse().unwrap()];
        assert!(check(&identity(), &role, Some("10.0.0.7")).is_ok());

        role.disable_ip_matching = true;
        let result = check(&identity(), &role, Some("10.0.1.7"));
        assert!(matches!(result, Err(Error::CidrMismatch(_))));

        let result = check(&identity(), &role, None);
        assert!(matches!(result, Err(Error::CidrMismatch(_))));
    }

    #[test]
    fn test_cidr_checked_before_ip() {
        let mut role = role();
        role.bound_cidrs = vec!["192.168.0.0/16".parse().unwrap()];
        let result = check(&identity(), &role, Some("10.0.0.8"));
        assert!(matches!(result, Err(Error::CidrMismatch(_))));
    }

    #[test]
    fn test_bound_app_ids() {
        let mut role = role();
        role.bound_app_ids = vec!["app-1".into()];
        assert!(check(&identity(), &role, Some("10.0.0.7")).is_ok());

        let mut other = identity();
        other.app_id = "app-2".into();
        let result = check(&other, &role, Some("10.0.0.7"));
        assert!(matches!(
            result,
            Err(Error::ConstraintViolation {
                field: IdentityField::AppId,
                ..
            })
        ));
    }

    #[test]
    fn test_each_field_constrained() {
        let cases: [(IdentityField, fn(&mut Role)); 4] = [
            (IdentityField::InstanceId, |r| r.bound_instance_ids = vec!["x".into()]),
            (IdentityField::AppId, |r| r.bound_app_ids = vec!["x".into()]),
            (IdentityField::OrgId, |r| r.bound_org_ids = vec!["x".into()]),
            (IdentityField::SpaceId, |r| r.bound_space_ids = vec!["x".into()]),
        ];
        for (expected, constrain) in cases {
            let mut role = role();
            constrain(&mut role);
            match check(&identity(), &role, Some("10.0.0.7")) {
                Err(Error::ConstraintViolation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected {expected} violation, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_remote_addr() {
        assert_eq!(parse_remote_addr("10.1.2.3"), Some("10.1.2.3".parse().unwrap()));
        assert_eq!(parse_remote_addr("[fd00::1]:8200"), Some("fd00::1".parse().unwrap()));
        assert_eq!(parse_remote_addr("fd00::1/128"), Some("fd00::1".parse().unwrap()));
        assert_eq!(parse_remote_addr("not an address"), None);
        assert_eq!(
            parse_remote_addr("[::ffff:10.1.2.3]:8200"),
            Some("10.1.2.3".parse().unwrap())
        );
    }

    #[test]
    fn test_ipv4_mapped_caller() {
        assert!(check(&identity(), &role(), Some("::ffff:10.0.0.7")).is_ok());

        let mut role = role();
        role.bound_cidrs = vec!["10.0.0.0/24".parse().unwrap()];
        role.disable_ip_matching = true;
        assert!(check(&identity(), &role, Some("::ffff:10.0.0.7")).is_ok());
        assert!(matches!(
            check(&identity(), &role, Some("::ffff:10.0.1.7")),
            Err(Error::CidrMismatch(_))
        ));
    }

    #[test]
    fn test_ipv4_mapped_certificate_ip() {
        let mapped =
            Identity::new("inst-1", "app-1", "org-1", "space-1", "::ffff:10.0.0.7".parse().unwrap())
                .unwrap();
        assert!(check(&mapped, &role(), Some("10.0.0.7")).is_ok());
    }
}

use std::net::IpAddr;
use std::str::FromStr;

use crate::crd::ServiceGroupSpec;
use crate::error::Error;
use crate::ledger::{Port, SharingLedger};
use crate::range::{AddressFamily, AddressRange};

/// A named collection of address ranges the allocator draws from.
///
/// Local pools are the only variant today; the enum is the seam for further
/// pool kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pool {
    Local(LocalPool),
}

impl Pool {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match self {
            Pool::Local(p) => p.contains(addr),
        }
    }

    pub fn capacity(&self) -> u128 {
        match self {
            Pool::Local(p) => p.capacity(),
        }
    }

    pub fn has_family(&self, family: AddressFamily) -> bool {
        match self {
            Pool::Local(p) => p.has_family(family),
        }
    }

    pub fn assign_next(
        &self,
        svc: &str,
        ports: &[Port],
        sharing_key: &str,
        family: Option<AddressFamily>,
        ledger: &SharingLedger,
    ) -> Result<IpAddr, Error> {
        match self {
            Pool::Local(p) => p.assign_next(svc, ports, sharing_key, family, ledger),
        }
    }
}

impl TryFrom<&ServiceGroupSpec> for Pool {
    type Error = Error;

    fn try_from(spec: &ServiceGroupSpec) -> Result<Pool, Error> {
        let local = spec
            .local
            .as_ref()
            .ok_or_else(|| Error::InvalidPoolDefinition("missing pool variant body".to_string()))?;
        if local.pools.is_empty() {
            return Err(Error::InvalidPoolDefinition(
                "local pool carries no ranges".to_string(),
            ));
        }
        let ranges = local
            .pools
            .iter()
            .map(|cidr| AddressRange::from_str(cidr))
            .collect::<Result<Vec<AddressRange>, Error>>()?;
        Ok(Pool::Local(LocalPool::new(ranges)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPool {
    ranges: Vec<AddressRange>,
}

impl LocalPool {
    pub fn new(ranges: Vec<AddressRange>) -> LocalPool {
        LocalPool { ranges }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }

    pub fn capacity(&self) -> u128 {
        self.ranges.iter().map(|r| r.size()).sum()
    }

    pub fn has_family(&self, family: AddressFamily) -> bool {
        self.ranges.iter().any(|r| r.family() == family)
    }

    /// The lowest address of the requested family that is either free or
    /// compatible with the requested ports and sharing key.
    ///
    /// Ranges are consulted in declaration order, addresses within a range in
    /// ascending numeric order.
    pub fn assign_next(
        &self,
        svc: &str,
        ports: &[Port],
        sharing_key: &str,
        family: Option<AddressFamily>,
        ledger: &SharingLedger,
    ) -> Result<IpAddr, Error> {
        let mut family_covered = family.is_none();
        for range in &self.ranges {
            if let Some(f) = family {
                if range.family() != f {
                    continue;
                }
            }
            family_covered = true;
            for addr in range.iter() {
                if ledger.can_assign(&addr, svc, ports, sharing_key).is_ok() {
                    return Ok(addr);
                }
            }
        }
        if !family_covered {
            return Err(Error::FamilyMismatch);
        }
        Err(Error::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ServiceGroupLocalSpec;
    use crate::ledger::Protocol;
    use rstest::rstest;

    fn pool(cidrs: &[&str]) -> LocalPool {
        LocalPool::new(
            cidrs
                .iter()
                .map(|c| AddressRange::from_str(c).unwrap())
                .collect(),
        )
    }

    fn addr(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    #[rstest]
    #[case(&["1.2.3.4/30"], 4)]
    #[case(&["1.2.3.4/30", "10.0.0.0/24"], 260)]
    #[case(&["1000::/126"], 4)]
    fn works_capacity(#[case] cidrs: &[&str], #[case] expected: u128) {
        assert_eq!(pool(cidrs).capacity(), expected);
    }

    #[test]
    fn works_assign_next_declaration_order() {
        let pool = pool(&["10.0.1.0/30", "10.0.0.0/30"]);
        let mut ledger = SharingLedger::new();
        let first = pool.assign_next("s1", &[], "", None, &ledger).unwrap();
        assert_eq!(first, addr("10.0.1.0"));
        ledger.assign(first, "s1", &[], "", "test");
        let second = pool.assign_next("s2", &[], "", None, &ledger).unwrap();
        assert_eq!(second, addr("10.0.1.1"));
    }

    #[test]
    fn works_assign_next_family_filter() {
        let pool = pool(&["1.2.3.4/30", "1000::/126"]);
        let ledger = SharingLedger::new();
        assert_eq!(
            pool.assign_next("s1", &[], "", Some(AddressFamily::V6), &ledger),
            Ok(addr("1000::"))
        );
        assert_eq!(
            pool.assign_next("s1", &[], "", Some(AddressFamily::V4), &ledger),
            Ok(addr("1.2.3.4"))
        );
    }

    #[test]
    fn fails_assign_next_family_not_covered() {
        let pool = pool(&["1.2.3.4/30"]);
        let ledger = SharingLedger::new();
        assert_eq!(
            pool.assign_next("s1", &[], "", Some(AddressFamily::V6), &ledger),
            Err(Error::FamilyMismatch)
        );
    }

    #[test]
    fn works_assign_next_prefers_compatible_shared() {
        let pool = pool(&["1.2.3.4/30"]);
        let mut ledger = SharingLedger::new();
        let web = [Port {
            protocol: Protocol::Tcp,
            port: 80,
        }];
        let dns = [Port {
            protocol: Protocol::Udp,
            port: 53,
        }];
        ledger.assign(addr("1.2.3.4"), "s1", &web, "share", "test");
        // Compatible sharing wins over the next free address.
        assert_eq!(
            pool.assign_next("s2", &dns, "share", None, &ledger),
            Ok(addr("1.2.3.4"))
        );
        // Without the key the taken address is skipped.
        assert_eq!(
            pool.assign_next("s3", &dns, "", None, &ledger),
            Ok(addr("1.2.3.5"))
        );
    }

    #[test]
    fn fails_assign_next_exhausted() {
        let pool = pool(&["10.0.0.0/31"]);
        let mut ledger = SharingLedger::new();
        ledger.assign(addr("10.0.0.0"), "s1", &[], "", "test");
        ledger.assign(addr("10.0.0.1"), "s2", &[], "", "test");
        assert_eq!(
            pool.assign_next("s3", &[], "", None, &ledger),
            Err(Error::Exhausted)
        );
    }

    #[rstest]
    #[case(Some(ServiceGroupLocalSpec { pools: vec!["10.0.0.0/24".to_string()] }), Ok(()))]
    #[case(None, Err(Error::InvalidPoolDefinition("missing pool variant body".to_string())))]
    #[case(Some(ServiceGroupLocalSpec { pools: vec![] }), Err(Error::InvalidPoolDefinition("local pool carries no ranges".to_string())))]
    #[case(Some(ServiceGroupLocalSpec { pools: vec!["bogus".to_string()] }), Err(Error::InvalidCidr("bogus".to_string())))]
    fn works_try_from_spec(
        #[case] local: Option<ServiceGroupLocalSpec>,
        #[case] expected: Result<(), Error>,
    ) {
        let spec = ServiceGroupSpec { local };
        assert_eq!(Pool::try_from(&spec).map(|_| ()), expected);
    }
}

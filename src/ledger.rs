use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Protocol, Error> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            _ => Err(Error::InvalidProtocol),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// A transport endpoint of a service, the unit of conflict for address
/// sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Port {
    pub protocol: Protocol,
    pub port: u16,
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

/// Per-address bookkeeping of which services currently bind an address.
///
/// Ports are kept per owner so that an owner's previous contribution can be
/// subtracted before evaluating an in-place update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pool: String,
    sharing_key: String,
    owners: BTreeMap<String, BTreeSet<Port>>,
}

impl LedgerEntry {
    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn sharing_key(&self) -> &str {
        &self.sharing_key
    }

    pub fn services(&self) -> Vec<&str> {
        self.owners.keys().map(String::as_str).collect()
    }

    pub fn holds(&self, svc: &str) -> bool {
        self.owners.contains_key(svc)
    }

    pub fn ports(&self) -> BTreeSet<Port> {
        self.owners.values().flatten().copied().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharingLedger {
    entries: HashMap<IpAddr, LedgerEntry>,
}

impl SharingLedger {
    pub fn new() -> SharingLedger {
        SharingLedger {
            entries: HashMap::new(),
        }
    }

    pub fn entry(&self, addr: &IpAddr) -> Option<&LedgerEntry> {
        self.entries.get(addr)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&IpAddr, &LedgerEntry)> {
        self.entries.iter()
    }

    /// Whether `svc` may bind `addr` with the given ports and sharing key.
    ///
    /// The service's own current contribution, if any, is subtracted before
    /// evaluating, so a service may change its ports or sharing key in place
    /// as long as the result is still compatible with the remaining owners.
    pub fn can_assign(
        &self,
        addr: &IpAddr,
        svc: &str,
        ports: &[Port],
        sharing_key: &str,
    ) -> Result<(), Error> {
        let entry = match self.entries.get(addr) {
            Some(e) => e,
            None => return Ok(()),
        };
        let others = entry
            .owners
            .iter()
            .filter(|(owner, _)| owner.as_str() != svc)
            .collect::<Vec<_>>();
        if others.is_empty() {
            return Ok(());
        }
        // An empty sharing key is never compatible with an existing entry.
        if sharing_key.is_empty() || entry.sharing_key != sharing_key {
            return Err(Error::SharingKeyMismatch);
        }
        let in_use = others
            .iter()
            .flat_map(|(_, ports)| ports.iter())
            .collect::<BTreeSet<_>>();
        if let Some(conflict) = ports.iter().find(|p| in_use.contains(p)) {
            return Err(Error::PortConflict(*conflict));
        }
        Ok(())
    }

    /// Records `svc` as an owner of `addr`, replacing any previous
    /// contribution of the same service.
    pub fn assign(&mut self, addr: IpAddr, svc: &str, ports: &[Port], sharing_key: &str, pool: &str) {
        let entry = self.entries.entry(addr).or_insert_with(|| LedgerEntry {
            pool: pool.to_string(),
            sharing_key: sharing_key.to_string(),
            owners: BTreeMap::new(),
        });
        entry.pool = pool.to_string();
        entry.sharing_key = sharing_key.to_string();
        entry
            .owners
            .insert(svc.to_string(), ports.iter().copied().collect());
    }

    /// Removes the service's stake. Returns the address and pool of the entry
    /// that became empty, if any.
    pub fn release(&mut self, svc: &str) -> Option<(IpAddr, String)> {
        let addr = self
            .entries
            .iter()
            .find(|(_, entry)| entry.holds(svc))
            .map(|(addr, _)| *addr)?;
        let entry = self.entries.get_mut(&addr)?;
        entry.owners.remove(svc);
        if entry.owners.is_empty() {
            let pool = entry.pool.clone();
            self.entries.remove(&addr);
            return Some((addr, pool));
        }
        None
    }
}

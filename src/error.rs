use std::net::IpAddr;

use thiserror::Error;

use crate::ledger::Port;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("invalid pool definition: {0}")]
    InvalidPoolDefinition(String),

    #[error("duplicate pool name: {0}")]
    DuplicatePool(String),

    #[error("no pool named {0}")]
    NoSuchPool(String),

    #[error("cannot request a specific address and a pool at the same time")]
    DesiredPoolWithExplicitAddress,

    #[error("{0} is not contained by any configured pool")]
    NotInAnyPool(IpAddr),

    #[error("address family mismatch")]
    FamilyMismatch,

    #[error("port conflict on {0}")]
    PortConflict(Port),

    #[error("sharing key mismatch")]
    SharingKeyMismatch,

    #[error("no allocatable address")]
    Exhausted,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid protocol")]
    InvalidProtocol,

    #[error("failed to get lock")]
    FailedToGetLock,
}

//! Infrastructure documents: the domain an identity administers, its nodes
//! and the network map tying them together.

use uuid::Uuid;

use crate::document::Document;
use crate::error::{DocError, Result};
use crate::field::{self, parse_fields, tag, FieldMap, FieldWriter};
use crate::kind::DocKind;
use crate::report::{check, check_that};
use crate::stamp::Stamp;

const HOSTNAME_MAX: usize = 128;
/// Fits a textual IPv6 address.
const IP_MAX: usize = 45;

/// The administrative domain of a private portfolio. All state lives in the
/// stamp; the document exists to be referenced by nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub stamp: Stamp,
}

impl Domain {
    pub fn create(issuer: Uuid) -> Self {
        Domain {
            stamp: Stamp::new(issuer, DocKind::Domain),
        }
    }
}

impl Document for Domain {
    const KIND: DocKind = DocKind::Domain;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, _w: &mut FieldWriter) {}

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Domain {
            stamp: Stamp::from_fields(map)?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("domain-expiry", self.stamp.check_expiry(Self::KIND))?;
        Ok(())
    }
}

/// One device participating in a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub stamp: Stamp,
    pub domain: Uuid,
    pub role: String,
    pub device: String,
    pub serial: String,
    pub hostname: Vec<String>,
    pub ip: Vec<String>,
}

impl Document for Node {
    const KIND: DocKind = DocKind::Node;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::DOMAIN, &self.domain);
        for hostname in &self.hostname {
            w.put_str(tag::HOSTNAME, hostname);
        }
        w.put_str(tag::ROLE, &self.role);
        w.put_str(tag::DEVICE, &self.device);
        w.put_str(tag::SERIAL, &self.serial);
        for ip in &self.ip {
            w.put_str(tag::IP, ip);
        }
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::DOMAIN,
            tag::HOSTNAME,
            tag::ROLE,
            tag::DEVICE,
            tag::SERIAL,
            tag::IP,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Node {
            stamp: Stamp::from_fields(map)?,
            domain: field::uuid(map.one(tag::DOMAIN)?)?,
            role: field::string(map.one(tag::ROLE)?, 16)?,
            device: field::string(map.one(tag::DEVICE)?, 64)?,
            serial: field::string(map.one(tag::SERIAL)?, 64)?,
            hostname: map
                .many(tag::HOSTNAME)
                .map(|h| field::string(h, HOSTNAME_MAX))
                .collect::<Result<_>>()?,
            ip: map
                .many(tag::IP)
                .map(|i| field::string(i, IP_MAX))
                .collect::<Result<_>>()?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("node-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that(
            "node-role",
            matches!(self.role.as_str(), "client" | "server" | "backup"),
            "role must be client, server or backup",
        )?;
        check_that("node-domain", !self.domain.is_nil(), "node without domain")?;
        Ok(())
    }

    fn changeable() -> &'static [u8] {
        &[tag::HOSTNAME, tag::IP, tag::ROLE]
    }
}

/// One reachable host inside a [`Network`]; serialized as a nested field
/// run under [`tag::HOSTS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub node: Uuid,
    pub hostname: Vec<String>,
    pub ip: Vec<String>,
}

impl Host {
    fn to_bytes(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        for hostname in &self.hostname {
            w.put_str(tag::HOSTNAME, hostname);
        }
        for ip in &self.ip {
            w.put_str(tag::IP, ip);
        }
        w.put_uuid(tag::NODE, &self.node);
        w.finish()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let fields = parse_fields(bytes)?;
        let mut node = None;
        let mut hostname = Vec::new();
        let mut ip = Vec::new();
        for (t, value) in &fields {
            match *t {
                tag::NODE => node = Some(field::uuid(value)?),
                tag::HOSTNAME => hostname.push(field::string(value, HOSTNAME_MAX)?),
                tag::IP => ip.push(field::string(value, IP_MAX)?),
                other => return Err(DocError::InvalidType(other)),
            }
        }
        Ok(Host {
            node: node.ok_or(DocError::MissingField(tag::NODE))?,
            hostname,
            ip,
        })
    }
}

/// The published map of a domain's reachable nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub stamp: Stamp,
    pub domain: Uuid,
    pub hosts: Vec<Host>,
}

impl Document for Network {
    const KIND: DocKind = DocKind::Network;

    fn stamp(&self) -> &Stamp {
        &self.stamp
    }

    fn stamp_mut(&mut self) -> &mut Stamp {
        &mut self.stamp
    }

    fn write_body(&self, w: &mut FieldWriter) {
        w.put_uuid(tag::DOMAIN, &self.domain);
        for host in &self.hosts {
            w.put(tag::HOSTS, &host.to_bytes());
        }
    }

    fn allowed_tags() -> &'static [u8] {
        &[
            tag::ID,
            tag::ISSUER,
            tag::CREATED,
            tag::EXPIRES,
            tag::UPDATED,
            tag::DOMAIN,
            tag::HOSTS,
            tag::SIGNATURE,
        ]
    }

    fn from_map(map: &FieldMap) -> Result<Self> {
        Ok(Network {
            stamp: Stamp::from_fields(map)?,
            domain: field::uuid(map.one(tag::DOMAIN)?)?,
            hosts: map
                .many(tag::HOSTS)
                .map(Host::from_bytes)
                .collect::<Result<_>>()?,
        })
    }

    fn validate(&self) -> Result<()> {
        check("network-expiry", self.stamp.check_expiry(Self::KIND))?;
        check_that("network-hosts", !self.hosts.is_empty(), "network without hosts")?;
        Ok(())
    }

    fn changeable() -> &'static [u8] {
        &[tag::HOSTS]
    }
}

//! Authority version resolution and schema selection

use std::fmt;

use k8s_openapi::apimachinery::pkg::version::Info;

use crate::{Error, Result};

/// Minor release of a 1.x authority that introduced `certificates.k8s.io/v1`
pub const CURRENT_SCHEMA_MIN_MINOR: u32 = 19;

/// Which generation of the signing-request resource to speak
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaGeneration {
    /// `certificates.k8s.io/v1beta1`
    Legacy,
    /// `certificates.k8s.io/v1`
    Current,
}

impl SchemaGeneration {
    /// API version string of this generation
    pub fn api_version(self) -> &'static str {
        match self {
            Self::Legacy => "certificates.k8s.io/v1beta1",
            Self::Current => "certificates.k8s.io/v1",
        }
    }

    /// Whether a condition status counts as true under this generation
    ///
    /// The legacy generation predates condition status on approvals, so an
    /// `Approved` condition with no status is treated as true there.
    pub fn condition_is_true(self, condition_type: &str, status: Option<&str>) -> bool {
        match (self, status) {
            (_, Some("True")) => true,
            (Self::Legacy, None | Some("")) => condition_type == "Approved",
            _ => false,
        }
    }
}

/// Major/minor version reported by the authority
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthorityVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
}

impl AuthorityVersion {
    /// Parse the version strings reported by the API server
    ///
    /// Trailing qualifiers are dropped, so `"19+"` parses as 19.
    pub fn parse(major: &str, minor: &str) -> Result<Self> {
        Ok(Self {
            major: leading_number(major)
                .ok_or_else(|| Error::version_parse(format!("major version {:?}", major)))?,
            minor: leading_number(minor)
                .ok_or_else(|| Error::version_parse(format!("minor version {:?}", minor)))?,
        })
    }

    /// Schema generation to use against this authority
    pub fn schema(self) -> SchemaGeneration {
        if self.major > 1 || (self.major == 1 && self.minor >= CURRENT_SCHEMA_MIN_MINOR) {
            SchemaGeneration::Current
        } else {
            SchemaGeneration::Legacy
        }
    }
}

impl TryFrom<&Info> for AuthorityVersion {
    type Error = Error;

    fn try_from(info: &Info) -> Result<Self> {
        Self::parse(&info.major, &info.minor)
    }
}

impl fmt::Display for AuthorityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn leading_number(s: &str) -> Option<u32> {
    let s = s.trim();
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

use std::fmt;

use crate::ProtocolError;

/// Principal class an ACL entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclScope {
    User,
    Group,
    Mask,
    Other,
}

impl AclScope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(AclScope::User),
            "group" => Some(AclScope::Group),
            "mask" => Some(AclScope::Mask),
            "other" => Some(AclScope::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AclScope::User => "user",
            AclScope::Group => "group",
            AclScope::Mask => "mask",
            AclScope::Other => "other",
        }
    }
}

/// A single `[default:]scope:id[:perm]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub default: bool,
    pub scope: AclScope,
    /// User or group id; empty for the owning user/group, mask and other.
    pub id: String,
    /// `rwx`-style permission triple; absent in removal specs.
    pub permission: Option<String>,
}

impl AclEntry {
    fn parse(raw: &str, require_permission: bool) -> Result<Self, ProtocolError> {
        let invalid = |why: &str| ProtocolError::InvalidAclSpec(format!("{raw:?}: {why}"));

        let mut parts: Vec<&str> = raw.trim().split(':').collect();
        let default = parts.first() == Some(&"default");
        if default {
            parts.remove(0);
        }

        let (scope, id, permission) = match parts.as_slice() {
            [scope, id] => (*scope, *id, None),
            [scope, id, perm] => (*scope, *id, Some(*perm)),
            _ => return Err(invalid("expected scope:id[:permission]")),
        };

        let scope = AclScope::parse(scope).ok_or_else(|| invalid("unknown scope"))?;
        if matches!(scope, AclScope::Mask | AclScope::Other) && !id.is_empty() {
            return Err(invalid("mask and other entries take no id"));
        }

        if let Some(perm) = permission {
            if !is_permission_triple(perm) {
                return Err(invalid("permission must look like rwx"));
            }
        } else if require_permission {
            return Err(invalid("missing permission"));
        }

        Ok(Self {
            default,
            scope,
            id: id.to_string(),
            permission: permission.map(str::to_string),
        })
    }
}

fn is_permission_triple(perm: &str) -> bool {
    let b = perm.as_bytes();
    b.len() == 3
        && (b[0] == b'r' || b[0] == b'-')
        && (b[1] == b'w' || b[1] == b'-')
        && (b[2] == b'x' || b[2] == b'-')
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.default {
            f.write_str("default:")?;
        }
        write!(f, "{}:{}", self.scope.as_str(), self.id)?;
        if let Some(perm) = &self.permission {
            write!(f, ":{perm}")?;
        }
        Ok(())
    }
}

/// Comma-separated list of ACL entries, as sent in the `aclSpec` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclSpec {
    entries: Vec<AclEntry>,
}

impl AclSpec {
    /// Parse a spec for `SETACL` or `MODIFYACLENTRIES`; every entry needs a
    /// permission.
    pub fn parse(spec: &str) -> Result<Self, ProtocolError> {
        Self::parse_inner(spec, true)
    }

    /// Parse a spec for `REMOVEACLENTRIES`; permissions are optional.
    pub fn parse_removal(spec: &str) -> Result<Self, ProtocolError> {
        Self::parse_inner(spec, false)
    }

    fn parse_inner(spec: &str, require_permission: bool) -> Result<Self, ProtocolError> {
        let entries = spec
            .split(',')
            .filter(|e| !e.trim().is_empty())
            .map(|e| AclEntry::parse(e, require_permission))
            .collect::<Result<Vec<_>, _>>()?;
        if entries.is_empty() {
            return Err(ProtocolError::InvalidAclSpec("empty spec".into()));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }
}

impl fmt::Display for AclSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

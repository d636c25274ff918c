//! Generalized resource identifiers.
//!
//! Handles the usual `scheme://authority/path[?query][#fragment]` form
//! plus an archive extension for resources nested inside container
//! files:
//!
//! ```text
//! zip:<base-uri>!/<inner-path>
//! ```
//!
//! where `<base-uri>` is itself a full identifier, recursively, so
//! archive-in-archive references are representable. For archive-type
//! identifiers the fragment holds the inner path and `!` replaces `#`
//! as the separator.
//!
//! Identifiers are immutable values: every operation returns a new
//! instance. In particular, rewriting the nested base of an archive
//! reference (once the enclosing archive has been cached locally) goes
//! through [`ResourceId::with_new_base`] rather than mutating a shared
//! identifier mid-flight.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{FetchError, Result};

/// Recognized identifier schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    File,
    Http,
    Https,
    Sftp,
    Zip,
    Jar,
}

impl Scheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Some(Scheme::File),
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "sftp" => Some(Scheme::Sftp),
            "zip" => Some(Scheme::Zip),
            "jar" => Some(Scheme::Jar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Sftp => "sftp",
            Scheme::Zip => "zip",
            Scheme::Jar => "jar",
        }
    }

    /// Archive-type schemes carry a nested base identifier and an
    /// inner path in the fragment position.
    pub fn is_archive(&self) -> bool {
        matches!(self, Scheme::Zip | Scheme::Jar)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authority component: `[user@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Authority {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Authority {
    fn parse(s: &str) -> Self {
        let (user, rest) = match s.rfind('@') {
            Some(idx) => (Some(s[..idx].to_string()), &s[idx + 1..]),
            None => (None, s),
        };
        // only treat a trailing :NNN as a port
        let (host, port) = match rest.rfind(':') {
            Some(idx) => match rest[idx + 1..].parse::<u16>() {
                Ok(p) => (rest[..idx].to_string(), Some(p)),
                Err(_) => (rest.to_string(), None),
            },
            None => (rest.to_string(), None),
        };
        Authority { user, host, port }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Immutable generalized resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceId {
    scheme: Option<Scheme>,
    authority: Option<Authority>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
    nested: Option<Box<ResourceId>>,
}

impl ResourceId {
    /// Parse a string identifier.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(ResourceId::default());
        }

        // Windows drive-letter paths are file identifiers
        if input.len() > 2 && input.as_bytes()[1] == b':' && input.as_bytes()[0].is_ascii_alphabetic()
        {
            let mut id = ResourceId::default();
            id.scheme = Some(Scheme::File);
            id.path = normalize(&input.replace('\\', "/"));
            return Ok(id);
        }

        let scheme_str = scheme_str(input);
        let Some(scheme_str) = scheme_str else {
            // relative reference: path[?query][#fragment]
            return Ok(Self::parse_relative(input));
        };

        let scheme = Scheme::parse(scheme_str)
            .ok_or_else(|| FetchError::syntax(input, format!("unsupported scheme '{scheme_str}'")))?;
        let rest = &input[scheme_str.len() + 1..];

        if scheme.is_archive() {
            // zip:<base-uri>!/<inner>
            let idx = rest.rfind('!').ok_or_else(|| {
                FetchError::syntax(input, "archive identifiers require a '!' separator")
            })?;
            let nested = ResourceId::parse(&rest[..idx])?;
            let inner = rest[idx + 1..].to_string();
            let mut id = ResourceId::default();
            id.scheme = Some(scheme);
            id.nested = Some(Box::new(nested));
            id.fragment = Some(normalize(&inner));
            return Ok(id);
        }

        let (rest, fragment) = match rest.find('#') {
            Some(idx) => (&rest[..idx], non_empty(&rest[idx + 1..])),
            None => (rest, None),
        };

        let mut id = ResourceId::default();
        id.scheme = Some(scheme);
        id.fragment = fragment;

        let ssp = rest.strip_prefix("//").unwrap_or(rest);
        if scheme == Scheme::File {
            // everything after "//" is the path
            id.path = normalize(ssp);
            return Ok(id);
        }

        match ssp.find(['/', '?']) {
            Some(idx) => {
                if idx > 0 {
                    id.authority = Some(Authority::parse(&ssp[..idx]));
                }
                let tail = &ssp[idx..];
                match tail.find('?') {
                    Some(q) => {
                        id.path = normalize(&tail[..q]);
                        id.query = non_empty(&tail[q + 1..]);
                    }
                    None => id.path = normalize(tail),
                }
            }
            None => {
                if !ssp.is_empty() {
                    id.authority = Some(Authority::parse(ssp));
                }
            }
        }
        Ok(id)
    }

    fn parse_relative(input: &str) -> Self {
        let (rest, fragment) = match input.find('#') {
            Some(idx) => (&input[..idx], non_empty(&input[idx + 1..])),
            None => (input, None),
        };
        let (path, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], non_empty(&rest[idx + 1..])),
            None => (rest, None),
        };
        ResourceId {
            scheme: None,
            authority: None,
            path: normalize(path),
            query,
            fragment,
            nested: None,
        }
    }

    /// Identifier for a local filesystem path.
    pub fn from_path(path: &Path) -> Self {
        let mut p = path.to_string_lossy().replace('\\', "/");
        if path.is_dir() && !p.ends_with('/') {
            p.push('/');
        }
        ResourceId {
            scheme: Some(Scheme::File),
            authority: None,
            path: normalize(&p),
            query: None,
            fragment: None,
            nested: None,
        }
    }

    pub fn scheme(&self) -> Option<Scheme> {
        self.scheme
    }

    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    pub fn host(&self) -> Option<&str> {
        self.authority.as_ref().map(|a| a.host.as_str())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn nested(&self) -> Option<&ResourceId> {
        self.nested.as_deref()
    }

    /// True if this identifier references an entry inside a container
    /// archive.
    pub fn is_archive(&self) -> bool {
        self.scheme.map(|s| s.is_archive()).unwrap_or(false)
    }

    /// The deepest nested identifier, or `self` for non-archive types.
    pub fn base_archive(&self) -> &ResourceId {
        let mut base = self;
        while let Some(nested) = base.nested.as_deref() {
            base = nested;
        }
        base
    }

    /// A relative identifier has no scheme on its deepest base and must
    /// be resolved against an absolute base before use.
    pub fn is_relative(&self) -> bool {
        let base = self.base_archive();
        base.scheme.is_none() || base.is_archive()
    }

    /// Returns a copy with the deepest nested base replaced. Used to
    /// point an archive reference at a locally cached copy of the
    /// enclosing archive without touching the original value.
    pub fn with_new_base(&self, new_base: &ResourceId) -> ResourceId {
        match &self.nested {
            Some(nested) => {
                let mut out = self.clone();
                out.nested = Some(Box::new(nested.with_new_base(new_base)));
                out
            }
            None => new_base.clone(),
        }
    }

    /// Returns a copy with `suffix` appended to the path, or to the
    /// fragment for archive-type identifiers. Used to derive hash
    /// sidecar identifiers.
    pub fn with_suffix(&self, suffix: &str) -> ResourceId {
        let mut out = self.clone();
        if self.is_archive() {
            let frag = self.fragment.clone().unwrap_or_default();
            out.fragment = Some(frag + suffix);
        } else {
            out.path = self.path.clone() + suffix;
        }
        out
    }

    /// Final segment of the path (or the fragment for archive types),
    /// used when a destination filename must be derived.
    pub fn file_name(&self) -> String {
        let name = if self.is_archive() {
            self.fragment.as_deref().unwrap_or("")
        } else {
            &self.path
        };
        let name = name.trim_end_matches('/');
        match name.rfind('/') {
            Some(idx) => name[idx + 1..].to_string(),
            None => name.to_string(),
        }
    }

    /// Default local destination path derived from the identifier: the
    /// raw path for plain identifiers; for archive identifiers, the
    /// inner path nested under the default destination of the enclosing
    /// archive.
    pub fn default_destination(&self) -> String {
        if !self.is_archive() {
            return self.path.clone();
        }
        let mut inner = self.fragment.clone().unwrap_or_default();
        if let Some(stripped) = inner.strip_prefix('/') {
            inner = stripped.to_string();
        }
        if inner.is_empty() {
            inner = "./".to_string();
        }
        match &self.nested {
            Some(base) => concat_paths(&base.default_destination(), &inner),
            None => inner,
        }
    }

    /// Resolve `rel` against `base` per RFC 3986 relative-reference
    /// rules. Absolute identifiers are returned unchanged. Resolving a
    /// plain relative path against an archive base appends to the
    /// archive's inner path.
    pub fn resolve(base: &ResourceId, rel: &ResourceId) -> ResourceId {
        if !rel.is_relative() {
            return rel.clone();
        }

        if !base.is_archive() {
            if !rel.is_archive() {
                let mut merged = resolve_path(base, &rel.path);
                merged.query = rel.query.clone();
                merged.fragment = rel.fragment.clone();
                merged
            } else {
                // resolve the relative reference's own base against ours
                let rel_base = rel.base_archive();
                let new_base = if rel_base.is_archive() {
                    base.clone()
                } else {
                    ResourceId::resolve(base, rel_base)
                };
                rel.with_new_base(&new_base)
            }
        } else if !rel.is_archive() {
            resolve_path(base, &rel.path)
        } else {
            // archive-in-archive relative reference: resolve its base
            // path into our fragment space
            let rel_base_path = rel.base_archive().path.clone();
            let mut outer = base.clone();
            if rel_base_path.starts_with('/') {
                outer.fragment = Some(normalize(&rel_base_path));
            } else if !rel_base_path.is_empty() {
                let frag = outer.fragment.clone().unwrap_or_default();
                outer.fragment = Some(concat_paths(&frag, &rel_base_path));
            }
            rel.with_new_base(&outer)
        }
    }

    /// For `file` identifiers, the local filesystem path.
    pub fn to_local_path(&self) -> Option<PathBuf> {
        if self.scheme == Some(Scheme::File) {
            Some(PathBuf::from(&self.path))
        } else {
            None
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = self.scheme {
            if scheme.is_archive() {
                write!(f, "{scheme}:")?;
                if let Some(nested) = &self.nested {
                    write!(f, "{nested}")?;
                }
                write!(f, "!{}", self.fragment.as_deref().unwrap_or(""))?;
                return Ok(());
            }
            write!(f, "{scheme}://")?;
            if let Some(auth) = &self.authority {
                write!(f, "{auth}")?;
            }
            if !self.path.is_empty() {
                // windows drive letters keep their bare form
                let bytes = self.path.as_bytes();
                let is_drive = bytes.len() > 1 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
                if !self.path.starts_with('/') && !is_drive {
                    write!(f, "/")?;
                }
                write!(f, "{}", self.path)?;
            }
        } else {
            write!(f, "{}", self.path)?;
        }
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(frag) = &self.fragment {
            write!(f, "#{frag}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceId {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        ResourceId::parse(s)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Extract the scheme portion of an identifier string, if present.
fn scheme_str(input: &str) -> Option<&str> {
    let bytes = input.as_bytes();
    if !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    for (i, &b) in bytes.iter().enumerate().skip(1) {
        match b {
            b':' => return Some(&input[..i]),
            b if b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.') => continue,
            _ => return None,
        }
    }
    None
}

/// Resolve a relative path against a base identifier, appending to the
/// path (or the fragment for archive types).
fn resolve_path(base: &ResourceId, rel_path: &str) -> ResourceId {
    let mut merged = base.clone();
    if rel_path.is_empty() {
        return merged;
    }
    if !base.is_archive() {
        if rel_path.starts_with('/') {
            merged.path = normalize(rel_path);
        } else {
            merged.path = concat_paths(&merged.path, rel_path);
        }
    } else if rel_path.starts_with('/') {
        merged.fragment = Some(normalize(rel_path));
    } else {
        let frag = merged.fragment.clone().unwrap_or_default();
        merged.fragment = Some(concat_paths(&frag, rel_path));
    }
    merged
}

/// Merge `tail` onto `head` after dropping head's final segment
/// (RFC 3986 §5.3 merge), then normalize.
fn concat_paths(head: &str, tail: &str) -> String {
    let mut out = String::new();
    if let Some(idx) = head.rfind('/') {
        out.push_str(&head[..idx + 1]);
    }
    out.push_str(tail);
    normalize(&out)
}

/// Remove `.` and `..` segments per RFC 3986 §5.2.4, preserving any
/// leading `..` components that cannot be resolved.
fn normalize(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let absolute = path.starts_with('/');
    let trailing_slash = path.ends_with('/');
    let mut kept: Vec<&str> = Vec::new();
    let mut leading_dotdot = 0usize;
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if kept.pop().is_none() && !absolute {
                    leading_dotdot += 1;
                }
            }
            other => kept.push(other),
        }
    }
    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    for _ in 0..leading_dotdot {
        out.push_str("../");
    }
    out.push_str(&kept.join("/"));
    if trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    // "." and "./" inputs collapse to "./"
    if out.is_empty() && (path.starts_with('.') || trailing_slash) {
        out.push_str("./");
    }
    out
}

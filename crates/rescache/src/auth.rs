//! Credential routing for remote transports.
//!
//! Transports never hold credentials themselves. A [`CredentialRouter`]
//! maps resource identifiers to an ordered list of credential
//! candidates: identity-repository bindings first, authenticator
//! bindings second, and anonymous access as the final fallback. A
//! transport walks the candidates in order and moves to the next one
//! only when a candidate is rejected by the server; structural failures
//! stop the walk.
//!
//! Passwords are held encrypted at rest through the [`CredentialCipher`]
//! seam and decrypted only when a transport asks for them.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{FetchError, Result};
use crate::uri::ResourceId;

/// Decides whether a binding applies to a given identifier.
pub trait UriMatcher: Send + Sync {
    fn matches(&self, uri: &ResourceId) -> bool;
}

/// Matches a single host, optionally restricted to one scheme, a path
/// prefix and an exact fragment.
pub struct ExactMatcher {
    host: String,
    scheme: Option<crate::uri::Scheme>,
    path_prefix: Option<String>,
    fragment: Option<String>,
}

impl ExactMatcher {
    pub fn new(host: impl Into<String>) -> Self {
        ExactMatcher {
            host: host.into(),
            scheme: None,
            path_prefix: None,
            fragment: None,
        }
    }

    pub fn with_scheme(mut self, scheme: crate::uri::Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }
}

impl UriMatcher for ExactMatcher {
    fn matches(&self, uri: &ResourceId) -> bool {
        let base = uri.base_archive();
        if let Some(scheme) = self.scheme {
            if base.scheme() != Some(scheme) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !base.path().starts_with(prefix.as_str()) {
                return false;
            }
        }
        // the fragment lives on the full identifier, not the base
        if let Some(fragment) = &self.fragment {
            if uri.fragment() != Some(fragment.as_str()) {
                return false;
            }
        }
        base.host().map(|h| h.eq_ignore_ascii_case(&self.host)).unwrap_or(false)
    }
}

/// Matches the full identifier string against a glob pattern: `*`
/// spans within one path segment, `**` spans across segments and `?`
/// matches a single character.
pub struct GlobMatcher {
    pattern: Regex,
}

impl GlobMatcher {
    pub fn new(glob: &str) -> Result<Self> {
        let mut re = String::from("^");
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        re.push_str(".*");
                    } else {
                        re.push_str("[^/]*");
                    }
                }
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');
        let pattern = Regex::new(&re)
            .map_err(|e| FetchError::syntax(glob, format!("invalid glob pattern: {e}")))?;
        Ok(GlobMatcher { pattern })
    }
}

impl UriMatcher for GlobMatcher {
    fn matches(&self, uri: &ResourceId) -> bool {
        self.pattern.is_match(&uri.base_archive().to_string())
    }
}

/// Reversible password protection for credentials held in memory or on
/// disk. Implementations must round-trip exactly.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plain: &str) -> String;
    fn decrypt(&self, sealed: &str) -> Result<String>;
}

/// Identity cipher for configurations that accept plaintext storage.
pub struct PlaintextCipher;

impl CredentialCipher for PlaintextCipher {
    fn encrypt(&self, plain: &str) -> String {
        plain.to_string()
    }

    fn decrypt(&self, sealed: &str) -> Result<String> {
        Ok(sealed.to_string())
    }
}

/// A username plus a password sealed by a [`CredentialCipher`].
#[derive(Clone)]
pub struct Credentials {
    user: String,
    sealed: String,
    cipher: Arc<dyn CredentialCipher>,
}

impl Credentials {
    pub fn new(
        user: impl Into<String>,
        password: &str,
        cipher: Arc<dyn CredentialCipher>,
    ) -> Self {
        Credentials {
            user: user.into(),
            sealed: cipher.encrypt(password),
            cipher,
        }
    }

    /// Convenience constructor using [`PlaintextCipher`].
    pub fn plain(user: impl Into<String>, password: &str) -> Self {
        Credentials::new(user, password, Arc::new(PlaintextCipher))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Decrypt the password for immediate use by a transport.
    pub fn password(&self) -> Result<String> {
        self.cipher.decrypt(&self.sealed)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the secret, sealed or not
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// One credential candidate offered to a transport.
#[derive(Clone, Debug)]
pub enum Credential {
    Identity(Credentials),
    Anonymous,
}

impl Credential {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credential::Anonymous)
    }
}

/// Ordered set of stored identities bound to a matcher as a unit.
#[derive(Default)]
pub struct IdentityRepository {
    identities: Vec<Credentials>,
}

impl IdentityRepository {
    pub fn new() -> Self {
        IdentityRepository::default()
    }

    pub fn add(&mut self, credentials: Credentials) {
        self.identities.push(credentials);
    }

    pub fn identities(&self) -> &[Credentials] {
        &self.identities
    }
}

/// Produces credentials on demand, typically by prompting or by
/// consulting an external agent.
pub trait Authenticator: Send + Sync {
    fn credentials_for(&self, uri: &ResourceId) -> Option<Credentials>;
}

struct IdentityBinding {
    matcher: Box<dyn UriMatcher>,
    repository: Arc<IdentityRepository>,
}

struct AuthenticatorBinding {
    matcher: Box<dyn UriMatcher>,
    authenticator: Arc<dyn Authenticator>,
}

/// Routes identifiers to credential candidates.
///
/// Bindings are consulted in registration order within each tier, and
/// identity repositories always rank ahead of authenticators. The
/// returned candidate list ends with [`Credential::Anonymous`] so that
/// an exhausted walk degrades to anonymous access rather than an empty
/// iteration.
#[derive(Default)]
pub struct CredentialRouter {
    identity_bindings: Vec<IdentityBinding>,
    authenticator_bindings: Vec<AuthenticatorBinding>,
}

impl CredentialRouter {
    pub fn new() -> Self {
        CredentialRouter::default()
    }

    pub fn add_identity_repository(
        &mut self,
        matcher: Box<dyn UriMatcher>,
        repository: Arc<IdentityRepository>,
    ) {
        self.identity_bindings.push(IdentityBinding { matcher, repository });
    }

    pub fn add_authenticator(
        &mut self,
        matcher: Box<dyn UriMatcher>,
        authenticator: Arc<dyn Authenticator>,
    ) {
        self.authenticator_bindings
            .push(AuthenticatorBinding { matcher, authenticator });
    }

    /// All credential candidates for `uri`, in trial order.
    pub fn candidates(&self, uri: &ResourceId) -> Vec<Credential> {
        let mut out = Vec::new();
        for binding in &self.identity_bindings {
            if binding.matcher.matches(uri) {
                for creds in binding.repository.identities() {
                    out.push(Credential::Identity(creds.clone()));
                }
            }
        }
        for binding in &self.authenticator_bindings {
            if binding.matcher.matches(uri) {
                if let Some(creds) = binding.authenticator.credentials_for(uri) {
                    out.push(Credential::Identity(creds));
                }
            }
        }
        out.push(Credential::Anonymous);
        out
    }
}

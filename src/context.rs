//! Request-scoped context threaded explicitly through every resolver call.

use rand::Rng;
use std::fmt;

/// An authenticated principal resolved from an access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub access_key_id: String,
}

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Authenticated(Principal),
}

impl Caller {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated(p) => Some(p),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::Authenticated(_))
    }

    /// Tenant of the caller, `None` for anonymous or untenanted callers.
    pub fn tenant_id(&self) -> Option<&str> {
        self.principal().and_then(|p| p.tenant_id.as_deref())
    }
}

/// How the caller proved its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Anonymous,
    HeaderSigV4,
    PresignedV4,
    PresignedV2,
}

impl AuthMethod {
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::HeaderSigV4 => "sigv4",
            AuthMethod::PresignedV4 => "presigned-v4",
            AuthMethod::PresignedV2 => "presigned-v2",
        }
    }
}

/// Per-response identifiers (`X-Amz-Request-Id` / `X-Amz-Id-2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIds {
    pub request_id: String,
    pub host_id: String,
}

impl RequestIds {
    /// Fresh identifiers: 16 uppercase hex chars and 64 hex chars.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut request = [0u8; 8];
        let mut host = [0u8; 32];
        rng.fill(&mut request);
        rng.fill(&mut host);
        Self {
            request_id: hex::encode_upper(request),
            host_id: hex::encode(host),
        }
    }
}

/// Everything a resolver needs to know about the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub ids: RequestIds,
    pub caller: Caller,
    pub auth_method: AuthMethod,
}

impl RequestContext {
    pub fn new(ids: RequestIds, caller: Caller, auth_method: AuthMethod) -> Self {
        Self {
            ids,
            caller,
            auth_method,
        }
    }

    pub fn anonymous(ids: RequestIds) -> Self {
        Self::new(ids, Caller::Anonymous, AuthMethod::Anonymous)
    }

    /// True if the caller is authenticated and belongs to `tenant`.
    ///
    /// Untenanted callers share the untenanted namespace.
    pub fn is_same_tenant(&self, tenant: Option<&str>) -> bool {
        match self.caller.principal() {
            Some(p) => p.tenant_id.as_deref() == tenant,
            None => false,
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.caller.principal() {
            Some(p) => write!(
                f,
                "{} user={} tenant={} via {}",
                self.ids.request_id,
                p.user_id,
                p.tenant_id.as_deref().unwrap_or("-"),
                self.auth_method.label()
            ),
            None => write!(f, "{} anonymous", self.ids.request_id),
        }
    }
}

//! Caller identity carried by every client in a [`crate::context::PlatformContext`]
//! (spec §6.2: dev header profile vs. production bearer-JWT profile).

use reqwest::RequestBuilder;

/// The identity an agent process authenticates as. Fixed for the
/// lifetime of the clients built from it — a running agent instance acts
/// as one tenant/user pair, consistent with `TaskContext`/`PlanContext`
/// rows always carrying the same pair they were created under.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Scopes every call this identity makes (spec §3.1: "mandatory,
    /// scopes all downstream access").
    pub tenant_id: String,
    /// End-user or agent identity, present for every user-scoped memory
    /// kind.
    pub user_id: Option<String>,
    /// Bearer token for the production auth profile. `None` selects the
    /// development header profile.
    pub bearer_token: Option<String>,
}

impl Identity {
    /// Development profile: trusted `X-Tenant-ID`/`X-User-ID` headers, no
    /// token.
    pub fn dev(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { tenant_id: tenant_id.into(), user_id: Some(user_id.into()), bearer_token: None }
    }

    /// Production profile: a bearer JWT that embeds `(tenant_id,
    /// user_id|agent_id)`. `tenant_id`/`user_id` are still carried
    /// locally so the SDK can build request bodies without decoding the
    /// token.
    pub fn bearer(tenant_id: impl Into<String>, user_id: Option<String>, token: impl Into<String>) -> Self {
        Self { tenant_id: tenant_id.into(), user_id, bearer_token: Some(token.into()) }
    }

    pub(crate) fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        let builder = builder.header("x-tenant-id", &self.tenant_id);
        match &self.user_id {
            Some(user_id) => builder.header("x-user-id", user_id),
            None => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_profile_sends_tenant_and_user_headers_without_bearer() {
        let identity = Identity::dev("t1", "u1");
        let client = reqwest::Client::new();
        let request = identity.apply(client.get("http://localhost/x")).build().unwrap();
        assert_eq!(request.headers().get("x-tenant-id").unwrap(), "t1");
        assert_eq!(request.headers().get("x-user-id").unwrap(), "u1");
        assert!(request.headers().get("authorization").is_none());
    }

    #[test]
    fn bearer_profile_sends_authorization_header() {
        let identity = Identity::bearer("t1", None, "jwt-token");
        let client = reqwest::Client::new();
        let request = identity.apply(client.get("http://localhost/x")).build().unwrap();
        assert_eq!(request.headers().get("authorization").unwrap(), "Bearer jwt-token");
        assert!(request.headers().get("x-user-id").is_none());
    }
}

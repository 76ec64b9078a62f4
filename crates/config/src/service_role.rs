//! Service-role key validation.
//!
//! The Supabase service-role key is a JWT whose payload names the project
//! (`ref`) and the role. A key pasted from the wrong project silently
//! writes into the wrong tenant, so the `ref` claim must match the
//! subdomain of `SUPABASE_URL` before startup proceeds.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::ConfigError;

/// Claims of interest inside the service-role JWT payload.
#[derive(Debug, Deserialize)]
pub struct ServiceRoleClaims {
    #[serde(rename = "ref")]
    pub project_ref: Option<String>,
    pub role: Option<String>,
}

/// Decode the JWT payload (no signature verification — the key is trusted
/// input, this is a paste-check) and compare its claims to the URL.
pub fn validate_service_role(url: &str, key: &str) -> Result<ServiceRoleClaims, ConfigError> {
    let claims = decode_claims(key)?;

    let subdomain = project_subdomain(url).ok_or_else(|| {
        ConfigError::InvalidVar {
            var: "SUPABASE_URL",
            reason: format!("cannot extract project subdomain from {url}"),
        }
    })?;

    match claims.project_ref.as_deref() {
        Some(r) if r == subdomain => {}
        Some(r) => {
            return Err(ConfigError::ServiceRole(format!(
                "key belongs to project {r}, URL points at {subdomain}"
            )));
        }
        None => {
            return Err(ConfigError::ServiceRole(
                "key payload carries no ref claim".into(),
            ));
        }
    }

    if claims.role.as_deref() != Some("service_role") {
        tracing::warn!(
            role = claims.role.as_deref().unwrap_or("<none>"),
            "SUPABASE_SERVICE_ROLE is not a service_role key; writes may be rejected by RLS"
        );
    }

    Ok(claims)
}

fn decode_claims(key: &str) -> Result<ServiceRoleClaims, ConfigError> {
    let payload = key
        .split('.')
        .nth(1)
        .ok_or_else(|| ConfigError::ServiceRole("key is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.as_bytes())
        .map_err(|e| ConfigError::ServiceRole(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ConfigError::ServiceRole(format!("payload is not JSON: {e}")))
}

/// `https://abcdefgh.supabase.co` → `abcdefgh`.
fn project_subdomain(url: &str) -> Option<&str> {
    let host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = host.split('/').next()?;
    let sub = host.split('.').next()?;
    if sub.is_empty() {
        None
    } else {
        Some(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jwt(payload: &str) -> String {
        let body = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        format!("eyJhbGciOiJIUzI1NiJ9.{body}.sig")
    }

    #[test]
    fn accepts_matching_ref() {
        let key = fake_jwt(r#"{"ref":"abcdefgh","role":"service_role"}"#);
        let claims = validate_service_role("https://abcdefgh.supabase.co", &key).unwrap();
        assert_eq!(claims.project_ref.as_deref(), Some("abcdefgh"));
    }

    #[test]
    fn rejects_mismatched_ref() {
        let key = fake_jwt(r#"{"ref":"otherref","role":"service_role"}"#);
        let err = validate_service_role("https://abcdefgh.supabase.co", &key).unwrap_err();
        assert!(matches!(err, ConfigError::ServiceRole(_)));
    }

    #[test]
    fn rejects_non_jwt() {
        let err = validate_service_role("https://abcdefgh.supabase.co", "not-a-jwt").unwrap_err();
        assert!(matches!(err, ConfigError::ServiceRole(_)));
    }

    #[test]
    fn subdomain_extraction() {
        assert_eq!(
            project_subdomain("https://abcdefgh.supabase.co"),
            Some("abcdefgh")
        );
        assert_eq!(project_subdomain("ftp://x"), None);
    }
}

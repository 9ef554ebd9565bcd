//! Header codec: structured value ⇄ literal wire string, per family.

use crate::error::ConfigurationError;
use crate::headers::{
    ContentSecurityPolicy, HeaderKey, PermissionsPolicy, StrictTransportSecurity, WireFormat,
};

/// Structured value of any header family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOption {
    ContentSecurityPolicy(ContentSecurityPolicy),
    PermissionsPolicy(PermissionsPolicy),
    StrictTransportSecurity(StrictTransportSecurity),
    Scalar(HeaderKey, String),
}

impl HeaderOption {
    pub fn key(&self) -> HeaderKey {
        match self {
            HeaderOption::ContentSecurityPolicy(_) => HeaderKey::ContentSecurityPolicy,
            HeaderOption::PermissionsPolicy(_) => HeaderKey::PermissionsPolicy,
            HeaderOption::StrictTransportSecurity(_) => HeaderKey::StrictTransportSecurity,
            HeaderOption::Scalar(key, _) => *key,
        }
    }
}

/// Renders the literal header value.
pub fn to_wire_string(option: &HeaderOption) -> String {
    match option {
        HeaderOption::ContentSecurityPolicy(csp) => csp.to_wire(),
        HeaderOption::PermissionsPolicy(policy) => policy.to_wire(),
        HeaderOption::StrictTransportSecurity(hsts) => hsts.to_wire(),
        HeaderOption::Scalar(_, value) => value.to_wire(),
    }
}

/// Parses a literal header value (also the legacy single-string config form).
pub fn from_wire_string(key: HeaderKey, literal: &str) -> Result<HeaderOption, ConfigurationError> {
    Ok(match key {
        HeaderKey::ContentSecurityPolicy => {
            HeaderOption::ContentSecurityPolicy(ContentSecurityPolicy::from_wire(literal)?)
        }
        HeaderKey::PermissionsPolicy => {
            HeaderOption::PermissionsPolicy(PermissionsPolicy::from_wire(literal)?)
        }
        HeaderKey::StrictTransportSecurity => {
            HeaderOption::StrictTransportSecurity(StrictTransportSecurity::from_wire(literal)?)
        }
        scalar => HeaderOption::Scalar(scalar, String::from_wire(literal)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::defaults::default_security_rules;

    #[test]
    fn test_round_trip_for_every_default_family() {
        let rules = default_security_rules();
        let headers = rules.headers.as_ref().and_then(|h| h.enabled()).unwrap();
        for key in HeaderKey::ALL {
            let Some(option) = headers.get(key).and_then(|t| t.enabled().cloned()) else {
                continue;
            };
            let wire = to_wire_string(&option);
            let parsed = from_wire_string(key, &wire).unwrap();
            assert_eq!(parsed, option, "round trip failed for {}", key.header_name());
            assert_eq!(to_wire_string(&parsed), wire);
        }
    }

    #[test]
    fn test_scalar_values_are_trimmed() {
        assert_eq!(
            from_wire_string(HeaderKey::ReferrerPolicy, "  no-referrer ").unwrap(),
            HeaderOption::Scalar(HeaderKey::ReferrerPolicy, "no-referrer".into())
        );
    }
}

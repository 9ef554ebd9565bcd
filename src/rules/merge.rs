//! Deep merge with array replacement.
//!
//! Per-field policy:
//!
//! | value kind                          | higher layer `Some(..)` does        |
//! |-------------------------------------|-------------------------------------|
//! | scalar (`bool`, numbers, `String`)  | replace                             |
//! | `Vec<_>` (sources, methods, lists)  | replace, never concatenate          |
//! | CSP directives / Permissions map    | key-wise merge, new keys appended   |
//! | one CSP directive / one feature     | replace                             |
//! | HSTS                                | replace as a whole                  |
//! | `Toggle::Disabled`                  | disable                             |
//! | `Toggle::Enabled` over `Disabled`   | replace (re-enable)                 |
//! | `Toggle::Enabled` over `Enabled`    | merge the inner values              |
//! | option blocks (ssg, limiter, …)     | field-wise                          |
//! | route-rule header maps              | key-wise, values replace            |
//!
//! `None` on the higher layer always keeps the lower value.

use indexmap::IndexMap;

use crate::headers::{
    ContentSecurityPolicy, CspDirective, PermissionsPolicy, SecurityHeaders,
    StrictTransportSecurity, Toggle,
};
use crate::rules::{
    AllowedMethodsOptions, BasicAuthOptions, CorsOptions, DriverConfig, RateLimiterOptions,
    RequestSizeLimiterOptions, SecurityRules, SsgOptions, XssValidatorOptions,
};

/// Overlay of a higher-precedence layer onto `self`.
pub trait Merge {
    fn merge_from(&mut self, higher: &Self);
}

macro_rules! replace_on_merge {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Merge for $ty {
                fn merge_from(&mut self, higher: &Self) {
                    *self = higher.clone();
                }
            }
        )*
    };
}

replace_on_merge!(
    bool,
    u16,
    u64,
    String,
    CspDirective,
    StrictTransportSecurity,
    DriverConfig,
);

impl<T: Clone> Merge for Vec<T> {
    fn merge_from(&mut self, higher: &Self) {
        *self = higher.clone();
    }
}

impl<T: Merge + Clone> Merge for Option<T> {
    fn merge_from(&mut self, higher: &Self) {
        match (self.as_mut(), higher) {
            (_, None) => {}
            (None, Some(value)) => *self = Some(value.clone()),
            (Some(current), Some(value)) => current.merge_from(value),
        }
    }
}

impl<T: Merge + Clone> Merge for Toggle<T> {
    fn merge_from(&mut self, higher: &Self) {
        match (&mut *self, higher) {
            (_, Toggle::Disabled) => *self = Toggle::Disabled,
            (Toggle::Disabled, Toggle::Enabled(value)) => *self = Toggle::Enabled(value.clone()),
            (Toggle::Enabled(current), Toggle::Enabled(value)) => current.merge_from(value),
        }
    }
}

impl<V: Merge + Clone> Merge for IndexMap<String, V> {
    fn merge_from(&mut self, higher: &Self) {
        for (key, value) in higher {
            match self.get_mut(key) {
                Some(current) => current.merge_from(value),
                None => {
                    self.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

impl Merge for ContentSecurityPolicy {
    fn merge_from(&mut self, higher: &Self) {
        let directives = self.directives_mut();
        for (name, directive) in higher.iter() {
            directives.insert(name.clone(), directive.clone());
        }
    }
}

impl Merge for PermissionsPolicy {
    fn merge_from(&mut self, higher: &Self) {
        let features = self.features_mut();
        for (feature, allow_list) in higher.iter() {
            features.insert(feature.clone(), allow_list.clone());
        }
    }
}

/// Field-wise merge for option structs.
macro_rules! merge_fields {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl Merge for $ty {
            fn merge_from(&mut self, higher: &Self) {
                $( self.$field.merge_from(&higher.$field); )*
            }
        }
    };
}

merge_fields!(SecurityHeaders {
    content_security_policy,
    cross_origin_embedder_policy,
    cross_origin_opener_policy,
    cross_origin_resource_policy,
    origin_agent_cluster,
    permissions_policy,
    referrer_policy,
    strict_transport_security,
    x_content_type_options,
    x_dns_prefetch_control,
    x_download_options,
    x_frame_options,
    x_permitted_cross_domain_policies,
    x_xss_protection,
});

merge_fields!(SecurityRules {
    enabled,
    headers,
    sri,
    nonce,
    ssg,
    hide_powered_by,
    rate_limiter,
    request_size_limiter,
    allowed_methods_restricter,
    cors_handler,
    xss_validator,
    basic_auth,
});

merge_fields!(SsgOptions { meta, hash_scripts, hash_styles, export_to_presets });

merge_fields!(RateLimiterOptions {
    tokens_per_interval,
    interval_ms,
    headers,
    whitelist,
    throw_error,
    driver,
});

merge_fields!(RequestSizeLimiterOptions {
    max_request_size_in_bytes,
    max_upload_file_request_in_bytes,
    throw_error,
});

merge_fields!(AllowedMethodsOptions { methods, throw_error });

merge_fields!(CorsOptions {
    origin,
    methods,
    allow_headers,
    expose_headers,
    credentials,
    max_age,
    preflight_status_code,
});

merge_fields!(XssValidatorOptions { methods, throw_error });

merge_fields!(BasicAuthOptions { name, pass, message, include, exclude });

/// Folds layers from lowest to highest precedence into a fresh value.
pub fn merge_layers<'a, T, I>(layers: I) -> T
where
    T: Merge + Default + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut merged = T::default();
    for layer in layers {
        merged.merge_from(layer);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csp(directives: &[(&str, &[&str])]) -> ContentSecurityPolicy {
        directives.iter().fold(ContentSecurityPolicy::new(), |policy, (name, sources)| {
            policy.with(name, CspDirective::sources(sources.iter().copied()))
        })
    }

    fn headers_with_csp(policy: ContentSecurityPolicy) -> SecurityHeaders {
        SecurityHeaders {
            content_security_policy: Some(Toggle::Enabled(policy)),
            ..Default::default()
        }
    }

    #[test]
    fn test_scalar_takes_higher_when_set() {
        let lower = SecurityRules { sri: Some(true), nonce: Some(true), ..Default::default() };
        let higher = SecurityRules { sri: Some(false), ..Default::default() };
        let merged: SecurityRules = merge_layers([&lower, &higher]);
        assert_eq!(merged.sri, Some(false));
        assert_eq!(merged.nonce, Some(true));
    }

    #[test]
    fn test_arrays_replace() {
        let lower = RateLimiterOptions {
            whitelist: Some(vec!["10.0.0.1".into(), "10.0.0.2".into()]),
            ..Default::default()
        };
        let higher = RateLimiterOptions {
            whitelist: Some(vec!["127.0.0.1".into()]),
            ..Default::default()
        };
        let merged: RateLimiterOptions = merge_layers([&lower, &higher]);
        assert_eq!(merged.whitelist, Some(vec!["127.0.0.1".to_string()]));
    }

    #[test]
    fn test_csp_directives_merge_key_wise_and_sources_replace() {
        let mut lower = headers_with_csp(csp(&[
            ("script-src", &["'self'"]),
            ("img-src", &["'self'", "data:"]),
        ]));
        let higher = headers_with_csp(csp(&[("script-src", &["'self'", "admin.example.com"])]));
        lower.merge_from(&higher);

        let merged = lower.content_security_policy.unwrap();
        let merged = merged.enabled().unwrap();
        assert_eq!(
            merged.get("script-src"),
            Some(&CspDirective::sources(["'self'", "admin.example.com"]))
        );
        assert_eq!(merged.get("img-src"), Some(&CspDirective::sources(["'self'", "data:"])));
    }

    #[test]
    fn test_toggle_disable_and_reenable() {
        let global = SecurityHeaders {
            x_frame_options: Some(Toggle::Disabled),
            ..Default::default()
        };
        let route = SecurityHeaders {
            x_frame_options: Some(Toggle::Enabled("DENY".into())),
            ..Default::default()
        };
        let mut merged = global.clone();
        merged.merge_from(&route);
        assert_eq!(merged.x_frame_options, Some(Toggle::Enabled("DENY".into())));

        let mut disabled_again = merged.clone();
        disabled_again.merge_from(&global);
        assert_eq!(disabled_again.x_frame_options, Some(Toggle::Disabled));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let base = headers_with_csp(csp(&[("script-src", &["'self'"])]));
        let layer = headers_with_csp(csp(&[("style-src", &["'self'"])]));
        let once: SecurityHeaders = merge_layers([&base, &layer]);
        let twice: SecurityHeaders = merge_layers([&base, &layer, &layer]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_hsts_replaces_whole_value() {
        let mut lower = Some(StrictTransportSecurity { max_age: 10, include_subdomains: true, preload: true });
        lower.merge_from(&Some(StrictTransportSecurity { max_age: 20, include_subdomains: false, preload: false }));
        assert_eq!(lower.unwrap().max_age, 20);
    }
}

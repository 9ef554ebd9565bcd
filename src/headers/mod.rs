//! Security header families and their structured representation.
//!
//! # Data Flow
//! ```text
//! config value (false | "legacy string" | table)
//!     → HeaderInput<T> (tagged union at the config boundary)
//!     → codec (legacy strings parsed into structured form)
//!     → Toggle<T> (Disabled | Enabled(value))
//!     → rules merge engine
//!     → codec (structured → literal wire string on the response)
//! ```
//!
//! # Design Decisions
//! - Nothing downstream of deserialization ever sees a legacy string
//! - `false` disables a header family; a later layer may re-enable it
//! - Every structured family round-trips bit-exactly through the codec

pub mod codec;
pub mod csp;
pub mod hsts;
pub mod permissions;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::ConfigurationError;

pub use codec::{from_wire_string, to_wire_string, HeaderOption};
pub use csp::{ContentSecurityPolicy, CspDirective, NONCE_PLACEHOLDER};
pub use hsts::StrictTransportSecurity;
pub use permissions::PermissionsPolicy;

/// Identifies one header family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderKey {
    ContentSecurityPolicy,
    CrossOriginEmbedderPolicy,
    CrossOriginOpenerPolicy,
    CrossOriginResourcePolicy,
    OriginAgentCluster,
    PermissionsPolicy,
    ReferrerPolicy,
    StrictTransportSecurity,
    XContentTypeOptions,
    XDnsPrefetchControl,
    XDownloadOptions,
    XFrameOptions,
    XPermittedCrossDomainPolicies,
    XXssProtection,
}

impl HeaderKey {
    /// Emission order on responses.
    pub const ALL: [HeaderKey; 14] = [
        HeaderKey::ContentSecurityPolicy,
        HeaderKey::CrossOriginEmbedderPolicy,
        HeaderKey::CrossOriginOpenerPolicy,
        HeaderKey::CrossOriginResourcePolicy,
        HeaderKey::OriginAgentCluster,
        HeaderKey::PermissionsPolicy,
        HeaderKey::ReferrerPolicy,
        HeaderKey::StrictTransportSecurity,
        HeaderKey::XContentTypeOptions,
        HeaderKey::XDnsPrefetchControl,
        HeaderKey::XDownloadOptions,
        HeaderKey::XFrameOptions,
        HeaderKey::XPermittedCrossDomainPolicies,
        HeaderKey::XXssProtection,
    ];

    /// HTTP header name, in canonical casing.
    pub fn header_name(self) -> &'static str {
        match self {
            HeaderKey::ContentSecurityPolicy => "Content-Security-Policy",
            HeaderKey::CrossOriginEmbedderPolicy => "Cross-Origin-Embedder-Policy",
            HeaderKey::CrossOriginOpenerPolicy => "Cross-Origin-Opener-Policy",
            HeaderKey::CrossOriginResourcePolicy => "Cross-Origin-Resource-Policy",
            HeaderKey::OriginAgentCluster => "Origin-Agent-Cluster",
            HeaderKey::PermissionsPolicy => "Permissions-Policy",
            HeaderKey::ReferrerPolicy => "Referrer-Policy",
            HeaderKey::StrictTransportSecurity => "Strict-Transport-Security",
            HeaderKey::XContentTypeOptions => "X-Content-Type-Options",
            HeaderKey::XDnsPrefetchControl => "X-DNS-Prefetch-Control",
            HeaderKey::XDownloadOptions => "X-Download-Options",
            HeaderKey::XFrameOptions => "X-Frame-Options",
            HeaderKey::XPermittedCrossDomainPolicies => "X-Permitted-Cross-Domain-Policies",
            HeaderKey::XXssProtection => "X-XSS-Protection",
        }
    }

    /// Configuration key of this family inside a `headers` table.
    pub fn option_name(self) -> &'static str {
        match self {
            HeaderKey::ContentSecurityPolicy => "content_security_policy",
            HeaderKey::CrossOriginEmbedderPolicy => "cross_origin_embedder_policy",
            HeaderKey::CrossOriginOpenerPolicy => "cross_origin_opener_policy",
            HeaderKey::CrossOriginResourcePolicy => "cross_origin_resource_policy",
            HeaderKey::OriginAgentCluster => "origin_agent_cluster",
            HeaderKey::PermissionsPolicy => "permissions_policy",
            HeaderKey::ReferrerPolicy => "referrer_policy",
            HeaderKey::StrictTransportSecurity => "strict_transport_security",
            HeaderKey::XContentTypeOptions => "x_content_type_options",
            HeaderKey::XDnsPrefetchControl => "x_dns_prefetch_control",
            HeaderKey::XDownloadOptions => "x_download_options",
            HeaderKey::XFrameOptions => "x_frame_options",
            HeaderKey::XPermittedCrossDomainPolicies => "x_permitted_cross_domain_policies",
            HeaderKey::XXssProtection => "x_xss_protection",
        }
    }

    /// Looks up a family by HTTP header name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|key| key.header_name().eq_ignore_ascii_case(name))
    }
}

/// A header family that is either switched off or carries a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toggle<T> {
    Disabled,
    Enabled(T),
}

impl<T> Toggle<T> {
    pub fn enabled(&self) -> Option<&T> {
        match self {
            Toggle::Disabled => None,
            Toggle::Enabled(value) => Some(value),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Toggle::Disabled)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Toggle<U> {
        match self {
            Toggle::Disabled => Toggle::Disabled,
            Toggle::Enabled(value) => Toggle::Enabled(f(value)),
        }
    }

    pub fn as_ref(&self) -> Toggle<&T> {
        match self {
            Toggle::Disabled => Toggle::Disabled,
            Toggle::Enabled(value) => Toggle::Enabled(value),
        }
    }
}

impl<T: Serialize> Serialize for Toggle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Toggle::Disabled => serializer.serialize_bool(false),
            Toggle::Enabled(value) => value.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ToggleRepr<T> {
    Flag(bool),
    Value(T),
}

/// Option blocks accept `false` (off), `true` (on with defaults) or a table.
impl<'de, T> Deserialize<'de> for Toggle<T>
where
    T: Deserialize<'de> + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ToggleRepr::<T>::deserialize(deserializer)? {
            ToggleRepr::Flag(false) => Toggle::Disabled,
            ToggleRepr::Flag(true) => Toggle::Enabled(T::default()),
            ToggleRepr::Value(value) => Toggle::Enabled(value),
        })
    }
}

/// Literal wire form of a header family.
pub trait WireFormat: Sized {
    /// Name used in configuration error messages.
    const FAMILY: &'static str;

    fn to_wire(&self) -> String;
    fn from_wire(literal: &str) -> Result<Self, ConfigurationError>;
}

impl WireFormat for String {
    const FAMILY: &'static str = "header";

    fn to_wire(&self) -> String {
        self.clone()
    }

    fn from_wire(literal: &str) -> Result<Self, ConfigurationError> {
        Ok(literal.trim().to_string())
    }
}

/// Raw header value as it arrives from configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HeaderInput<T> {
    Flag(bool),
    Legacy(String),
    Structured(T),
}

impl<T: WireFormat> HeaderInput<T> {
    /// Normalizes to structured form. Empty legacy strings disable the header.
    pub fn normalize(self) -> Result<Toggle<T>, ConfigurationError> {
        match self {
            HeaderInput::Flag(false) => Ok(Toggle::Disabled),
            HeaderInput::Flag(true) => Err(ConfigurationError::InvalidHeader {
                header: T::FAMILY.to_string(),
                reason: "`true` is not a header value; use `false` to disable".to_string(),
            }),
            HeaderInput::Legacy(literal) if literal.trim().is_empty() => Ok(Toggle::Disabled),
            HeaderInput::Legacy(literal) => T::from_wire(&literal).map(Toggle::Enabled),
            HeaderInput::Structured(value) => Ok(Toggle::Enabled(value)),
        }
    }
}

fn deserialize_header<'de, D, T>(deserializer: D) -> Result<Option<Toggle<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + WireFormat,
{
    HeaderInput::<T>::deserialize(deserializer)?
        .normalize()
        .map(Some)
        .map_err(de::Error::custom)
}

/// Header options of one route. `None` means "inherit from a lower layer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityHeaders {
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub content_security_policy: Option<Toggle<ContentSecurityPolicy>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub cross_origin_embedder_policy: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub cross_origin_opener_policy: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub cross_origin_resource_policy: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub origin_agent_cluster: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub permissions_policy: Option<Toggle<PermissionsPolicy>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub referrer_policy: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub strict_transport_security: Option<Toggle<StrictTransportSecurity>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub x_content_type_options: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub x_dns_prefetch_control: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub x_download_options: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub x_frame_options: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub x_permitted_cross_domain_policies: Option<Toggle<String>>,
    #[serde(deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
    pub x_xss_protection: Option<Toggle<String>>,
}

impl SecurityHeaders {
    /// Returns the configured state of one family, lifted into [`HeaderOption`].
    pub fn get(&self, key: HeaderKey) -> Option<Toggle<HeaderOption>> {
        fn lift<T: Clone>(
            slot: &Option<Toggle<T>>,
            wrap: impl FnOnce(T) -> HeaderOption,
        ) -> Option<Toggle<HeaderOption>> {
            slot.as_ref().map(|toggle| toggle.clone().map(wrap))
        }

        match key {
            HeaderKey::ContentSecurityPolicy => {
                lift(&self.content_security_policy, HeaderOption::ContentSecurityPolicy)
            }
            HeaderKey::PermissionsPolicy => {
                lift(&self.permissions_policy, HeaderOption::PermissionsPolicy)
            }
            HeaderKey::StrictTransportSecurity => {
                lift(&self.strict_transport_security, HeaderOption::StrictTransportSecurity)
            }
            scalar => lift(self.scalar(scalar)?, |value| HeaderOption::Scalar(scalar, value)),
        }
    }

    /// Sets one family from its literal wire form. An empty literal disables it.
    pub fn set_wire(&mut self, key: HeaderKey, literal: &str) -> Result<(), ConfigurationError> {
        if literal.trim().is_empty() {
            return self.set(key, Toggle::Disabled);
        }
        let option = from_wire_string(key, literal)?;
        self.set(key, Toggle::Enabled(option))
    }

    /// Sets one family. The option must belong to `key`.
    pub fn set(&mut self, key: HeaderKey, value: Toggle<HeaderOption>) -> Result<(), ConfigurationError> {
        let mismatch = || ConfigurationError::InvalidHeader {
            header: key.header_name().to_string(),
            reason: "value belongs to a different header family".to_string(),
        };

        match (key, value) {
            (HeaderKey::ContentSecurityPolicy, Toggle::Disabled) => {
                self.content_security_policy = Some(Toggle::Disabled)
            }
            (HeaderKey::ContentSecurityPolicy, Toggle::Enabled(HeaderOption::ContentSecurityPolicy(v))) => {
                self.content_security_policy = Some(Toggle::Enabled(v))
            }
            (HeaderKey::PermissionsPolicy, Toggle::Disabled) => {
                self.permissions_policy = Some(Toggle::Disabled)
            }
            (HeaderKey::PermissionsPolicy, Toggle::Enabled(HeaderOption::PermissionsPolicy(v))) => {
                self.permissions_policy = Some(Toggle::Enabled(v))
            }
            (HeaderKey::StrictTransportSecurity, Toggle::Disabled) => {
                self.strict_transport_security = Some(Toggle::Disabled)
            }
            (HeaderKey::StrictTransportSecurity, Toggle::Enabled(HeaderOption::StrictTransportSecurity(v))) => {
                self.strict_transport_security = Some(Toggle::Enabled(v))
            }
            (scalar, value) => {
                let toggle = match value {
                    Toggle::Disabled => Toggle::Disabled,
                    Toggle::Enabled(HeaderOption::Scalar(k, v)) if k == scalar => Toggle::Enabled(v),
                    Toggle::Enabled(_) => return Err(mismatch()),
                };
                *self.scalar_mut(scalar).ok_or_else(mismatch)? = Some(toggle);
            }
        }
        Ok(())
    }

    /// True when no family is configured at all.
    pub fn is_empty(&self) -> bool {
        HeaderKey::ALL.into_iter().all(|key| self.get(key).is_none())
    }

    fn scalar(&self, key: HeaderKey) -> Option<&Option<Toggle<String>>> {
        Some(match key {
            HeaderKey::CrossOriginEmbedderPolicy => &self.cross_origin_embedder_policy,
            HeaderKey::CrossOriginOpenerPolicy => &self.cross_origin_opener_policy,
            HeaderKey::CrossOriginResourcePolicy => &self.cross_origin_resource_policy,
            HeaderKey::OriginAgentCluster => &self.origin_agent_cluster,
            HeaderKey::ReferrerPolicy => &self.referrer_policy,
            HeaderKey::XContentTypeOptions => &self.x_content_type_options,
            HeaderKey::XDnsPrefetchControl => &self.x_dns_prefetch_control,
            HeaderKey::XDownloadOptions => &self.x_download_options,
            HeaderKey::XFrameOptions => &self.x_frame_options,
            HeaderKey::XPermittedCrossDomainPolicies => &self.x_permitted_cross_domain_policies,
            HeaderKey::XXssProtection => &self.x_xss_protection,
            HeaderKey::ContentSecurityPolicy
            | HeaderKey::PermissionsPolicy
            | HeaderKey::StrictTransportSecurity => return None,
        })
    }

    fn scalar_mut(&mut self, key: HeaderKey) -> Option<&mut Option<Toggle<String>>> {
        Some(match key {
            HeaderKey::CrossOriginEmbedderPolicy => &mut self.cross_origin_embedder_policy,
            HeaderKey::CrossOriginOpenerPolicy => &mut self.cross_origin_opener_policy,
            HeaderKey::CrossOriginResourcePolicy => &mut self.cross_origin_resource_policy,
            HeaderKey::OriginAgentCluster => &mut self.origin_agent_cluster,
            HeaderKey::ReferrerPolicy => &mut self.referrer_policy,
            HeaderKey::XContentTypeOptions => &mut self.x_content_type_options,
            HeaderKey::XDnsPrefetchControl => &mut self.x_dns_prefetch_control,
            HeaderKey::XDownloadOptions => &mut self.x_download_options,
            HeaderKey::XFrameOptions => &mut self.x_frame_options,
            HeaderKey::XPermittedCrossDomainPolicies => &mut self.x_permitted_cross_domain_policies,
            HeaderKey::XXssProtection => &mut self.x_xss_protection,
            HeaderKey::ContentSecurityPolicy
            | HeaderKey::PermissionsPolicy
            | HeaderKey::StrictTransportSecurity => return None,
        })
    }
}

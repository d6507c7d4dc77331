//! Device fingerprinting: stable identity hashing, trust scoring, and drift
//! detection.
//!
//! A fingerprint is a SHA-256 digest over a curated *stable subset* of
//! request and client attributes. Volatile material (IP address, timestamps)
//! is deliberately excluded so the hash survives network moves; missing
//! fields default to `"Unknown"` and still hash deterministically, so
//! generation has no error path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::DeviceTrustConfig;
use crate::models::device::{DeviceAttributes, TrustedDevice};

/// Raw request-level material the HTTP handler hands to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    /// Full User-Agent header.
    pub user_agent: Option<String>,
    /// Accept-Language header.
    pub accept_language: Option<String>,
    /// Accept-Encoding header.
    pub accept_encoding: Option<String>,
    /// Client IP; carried for attempt records but excluded from the hash.
    pub ip: Option<String>,
}

/// Client-side attributes collected by the browser agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAttributes {
    /// Screen signature ("1920x1080x24").
    pub screen: Option<String>,
    /// IANA timezone reported by the client.
    pub timezone: Option<String>,
    /// Platform string (navigator.platform).
    pub platform: Option<String>,
    /// WebGL renderer signature.
    pub webgl: Option<String>,
    /// Canvas rendering signature.
    pub canvas: Option<String>,
    /// Installed font list.
    pub fonts: Vec<String>,
    /// navigator.hardwareConcurrency.
    pub hardware_concurrency: Option<u32>,
    /// navigator.deviceMemory, in GiB.
    pub device_memory: Option<u32>,
    /// Touch support flag.
    pub touch_support: Option<bool>,
}

/// A derived device fingerprint: the identity hash plus the parsed
/// attributes that fed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// SHA-256 hex digest; the device identity key.
    pub hash: String,
    /// Parsed, comparable attributes.
    pub attributes: DeviceAttributes,
}

/// Severity of drift between two fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
}

impl DriftSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            DriftSeverity::Low => "low",
            DriftSeverity::Medium => "medium",
            DriftSeverity::High => "high",
        }
    }
}

/// Result of comparing two fingerprints field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintDrift {
    pub has_changes: bool,
    /// Names of the fields that differ.
    pub changes: Vec<String>,
    pub severity: DriftSeverity,
}

const UNKNOWN: &str = "Unknown";

impl DeviceFingerprint {
    /// Derive a fingerprint from request metadata and client-supplied
    /// attributes.
    ///
    /// The digest covers browser name/version, OS, device type, platform,
    /// screen, timezone, WebGL and canvas signatures, the font list,
    /// hardware concurrency, device memory, touch support, and
    /// accept-language. Identical inputs always produce the identical hash.
    pub fn generate(request: &RequestContext, client: &ClientAttributes) -> Self {
        let attributes = parse_attributes(request, client);

        let mut hasher = Sha256::new();
        for component in [
            attributes.browser_name.as_str(),
            attributes.browser_version.as_str(),
            attributes.os_name.as_str(),
            attributes.device_type.as_str(),
            attributes.platform.as_str(),
            attributes.screen.as_deref().unwrap_or(UNKNOWN),
            attributes.timezone.as_deref().unwrap_or(UNKNOWN),
            client.webgl.as_deref().unwrap_or(UNKNOWN),
            client.canvas.as_deref().unwrap_or(UNKNOWN),
            request.accept_language.as_deref().unwrap_or(UNKNOWN),
        ] {
            hasher.update(component.as_bytes());
            hasher.update(b"|");
        }
        hasher.update(client.fonts.join(",").as_bytes());
        hasher.update(b"|");
        hasher.update(
            client
                .hardware_concurrency
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.into())
                .as_bytes(),
        );
        hasher.update(b"|");
        hasher.update(
            client
                .device_memory
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.into())
                .as_bytes(),
        );
        hasher.update(b"|");
        hasher.update(
            client
                .touch_support
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.into())
                .as_bytes(),
        );

        Self {
            hash: format!("{:x}", hasher.finalize()),
            attributes,
        }
    }
}

/// Parse request/client material into comparable device attributes.
fn parse_attributes(request: &RequestContext, client: &ClientAttributes) -> DeviceAttributes {
    let ua = request.user_agent.as_deref().unwrap_or("");
    let (browser_name, browser_version) = parse_browser(ua);
    DeviceAttributes {
        browser_name,
        browser_version,
        os_name: parse_os(ua),
        device_type: parse_device_type(ua, client),
        platform: client
            .platform
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string()),
        screen: client.screen.clone(),
        timezone: client.timezone.clone(),
    }
}

/// Classify browser family and major version from a User-Agent string.
///
/// Order matters: Edge and Opera embed "Chrome", Chrome embeds "Safari".
fn parse_browser(ua: &str) -> (String, String) {
    let candidates = [
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Firefox/", "Firefox"),
        ("Chrome/", "Chrome"),
        ("Version/", "Safari"),
    ];
    for (token, name) in candidates {
        if let Some(idx) = ua.find(token) {
            if name == "Safari" && !ua.contains("Safari") {
                continue;
            }
            let rest = &ua[idx + token.len()..];
            let version: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            let major = version.split('.').next().unwrap_or("").to_string();
            return (
                name.to_string(),
                if major.is_empty() {
                    UNKNOWN.to_string()
                } else {
                    major
                },
            );
        }
    }
    (UNKNOWN.to_string(), UNKNOWN.to_string())
}

/// Classify operating-system family from a User-Agent string.
fn parse_os(ua: &str) -> String {
    // Android UAs also contain "Linux"; check the specific tokens first.
    let candidates = [
        ("Android", "Android"),
        ("iPhone", "iOS"),
        ("iPad", "iOS"),
        ("Windows", "Windows"),
        ("Mac OS X", "macOS"),
        ("CrOS", "ChromeOS"),
        ("Linux", "Linux"),
    ];
    for (token, name) in candidates {
        if ua.contains(token) {
            return name.to_string();
        }
    }
    UNKNOWN.to_string()
}

/// Classify device type from UA tokens and client touch support.
fn parse_device_type(ua: &str, client: &ClientAttributes) -> String {
    if ua.contains("iPad") || ua.contains("Tablet") {
        "tablet".to_string()
    } else if ua.contains("Mobile") || ua.contains("iPhone") || ua.contains("Android") {
        "mobile".to_string()
    } else if ua.is_empty() && client.touch_support == Some(true) {
        "mobile".to_string()
    } else if ua.is_empty() {
        UNKNOWN.to_string()
    } else {
        "desktop".to_string()
    }
}

/// Compute the 0-100 trust score for a device against its current
/// fingerprint. Pure; persistence is the orchestrator's job.
///
/// Additive components: +40 verified, up to +20 scaled by days known
/// (capped), up to +20 scaled by login count (capped), -5 per consecutive
/// failed attempt, +20 when the current hash matches the stored one. The
/// result is clamped to [0, 100] even under adversarial counter values.
pub fn trust_score(
    device: &TrustedDevice,
    current_fingerprint: &str,
    config: &DeviceTrustConfig,
    now: DateTime<Utc>,
) -> u8 {
    let mut score: i64 = 0;

    if device.is_verified {
        score += 40;
    }

    let days = device.days_known(now).min(config.trusted_days_cap as i64);
    score += days * 20 / config.trusted_days_cap.max(1) as i64;

    let logins = device.login_count.min(config.login_count_cap) as i64;
    score += logins * 20 / config.login_count_cap.max(1) as i64;

    score -= device.failed_attempts as i64 * 5;

    if device.fingerprint == current_fingerprint {
        score += 20;
    }

    score.clamp(0, 100) as u8
}

/// Fields whose change marks a *major* drift.
const MAJOR_FIELDS: [&str; 4] = ["browser_name", "os_name", "device_type", "platform"];

/// Compare two fingerprints field by field.
///
/// Severity is `High` when more than `major_field_cutoff` major fields
/// changed, `Medium` when any major field changed, `Low` otherwise. High
/// severity gates the orchestrator's re-verification branch.
pub fn detect_drift(
    old: &DeviceAttributes,
    new: &DeviceAttributes,
    major_field_cutoff: usize,
) -> FingerprintDrift {
    let mut changes = Vec::new();

    let fields: [(&str, &str, &str); 7] = [
        ("browser_name", &old.browser_name, &new.browser_name),
        ("browser_version", &old.browser_version, &new.browser_version),
        ("os_name", &old.os_name, &new.os_name),
        ("device_type", &old.device_type, &new.device_type),
        ("platform", &old.platform, &new.platform),
        (
            "screen",
            old.screen.as_deref().unwrap_or(UNKNOWN),
            new.screen.as_deref().unwrap_or(UNKNOWN),
        ),
        (
            "timezone",
            old.timezone.as_deref().unwrap_or(UNKNOWN),
            new.timezone.as_deref().unwrap_or(UNKNOWN),
        ),
    ];

    for (name, old_value, new_value) in fields {
        if old_value != new_value {
            changes.push(name.to_string());
        }
    }

    let major_changed = changes
        .iter()
        .filter(|c| MAJOR_FIELDS.contains(&c.as_str()))
        .count();

    let severity = if major_changed > major_field_cutoff {
        DriftSeverity::High
    } else if major_changed > 0 {
        DriftSeverity::Medium
    } else {
        DriftSeverity::Low
    };

    FingerprintDrift {
        has_changes: !changes.is_empty(),
        changes,
        severity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chrome_request() -> RequestContext {
        RequestContext {
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .into(),
            ),
            accept_language: Some("en-US,en;q=0.9".into()),
            accept_encoding: Some("gzip, deflate, br".into()),
            ip: Some("203.0.113.7".into()),
        }
    }

    fn desktop_client() -> ClientAttributes {
        ClientAttributes {
            screen: Some("1920x1080x24".into()),
            timezone: Some("America/New_York".into()),
            platform: Some("Win32".into()),
            webgl: Some("ANGLE (NVIDIA)".into()),
            canvas: Some("c4nv4s".into()),
            fonts: vec!["Arial".into(), "Verdana".into()],
            hardware_concurrency: Some(8),
            device_memory: Some(16),
            touch_support: Some(false),
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = DeviceFingerprint::generate(&chrome_request(), &desktop_client());
        let b = DeviceFingerprint::generate(&chrome_request(), &desktop_client());
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn ip_does_not_affect_the_hash() {
        let mut moved = chrome_request();
        moved.ip = Some("198.51.100.44".into());
        let home = DeviceFingerprint::generate(&chrome_request(), &desktop_client());
        let roaming = DeviceFingerprint::generate(&moved, &desktop_client());
        assert_eq!(home.hash, roaming.hash);
    }

    #[test]
    fn missing_fields_still_hash() {
        let fp = DeviceFingerprint::generate(&RequestContext::default(), &ClientAttributes::default());
        assert_eq!(fp.hash.len(), 64);
        assert_eq!(fp.attributes.browser_name, "Unknown");
    }

    #[test]
    fn parses_chrome_on_windows() {
        let fp = DeviceFingerprint::generate(&chrome_request(), &desktop_client());
        assert_eq!(fp.attributes.browser_name, "Chrome");
        assert_eq!(fp.attributes.browser_version, "120");
        assert_eq!(fp.attributes.os_name, "Windows");
        assert_eq!(fp.attributes.device_type, "desktop");
    }

    #[test]
    fn parses_mobile_safari() {
        let request = RequestContext {
            user_agent: Some(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
                 AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"
                    .into(),
            ),
            ..Default::default()
        };
        let fp = DeviceFingerprint::generate(&request, &ClientAttributes::default());
        assert_eq!(fp.attributes.browser_name, "Safari");
        assert_eq!(fp.attributes.os_name, "iOS");
        assert_eq!(fp.attributes.device_type, "mobile");
    }

    fn device_with(login_count: u32, failed: u32, verified: bool) -> TrustedDevice {
        let mut device = TrustedDevice::new(Uuid::new_v4(), "fp_x", DeviceAttributes::default());
        device.login_count = login_count;
        device.failed_attempts = failed;
        device.is_verified = verified;
        device
    }

    #[test]
    fn trust_score_monotonic_in_login_count() {
        let config = DeviceTrustConfig::default();
        let now = Utc::now();
        let mut previous = 0;
        for logins in [0, 1, 5, 10, 20, 50] {
            let score = trust_score(&device_with(logins, 0, false), "fp_x", &config, now);
            assert!(score >= previous, "score regressed at {logins} logins");
            previous = score;
        }
    }

    #[test]
    fn trust_score_non_increasing_in_failures() {
        let config = DeviceTrustConfig::default();
        let now = Utc::now();
        let mut previous = 100;
        for failures in [0, 1, 3, 5, 10] {
            let score = trust_score(&device_with(20, failures, true), "fp_x", &config, now);
            assert!(score <= previous, "score rose at {failures} failures");
            previous = score;
        }
    }

    #[test]
    fn trust_score_clamped_under_adversarial_counts() {
        let config = DeviceTrustConfig::default();
        let now = Utc::now();
        let score = trust_score(&device_with(0, 1000, false), "other", &config, now);
        assert_eq!(score, 0);
        let score = trust_score(&device_with(u32::MAX, 0, true), "fp_x", &config, now);
        assert!(score <= 100);
    }

    #[test]
    fn identical_fingerprints_have_no_drift() {
        let attrs = DeviceAttributes {
            browser_name: "Chrome".into(),
            browser_version: "120".into(),
            os_name: "Windows".into(),
            device_type: "desktop".into(),
            platform: "Win32".into(),
            screen: Some("1920x1080".into()),
            timezone: Some("UTC".into()),
        };
        let drift = detect_drift(&attrs, &attrs, 2);
        assert!(!drift.has_changes);
        assert_eq!(drift.severity, DriftSeverity::Low);
    }

    #[test]
    fn version_only_change_is_never_high() {
        let old = DeviceAttributes {
            browser_name: "Chrome".into(),
            browser_version: "119".into(),
            ..Default::default()
        };
        let new = DeviceAttributes {
            browser_name: "Chrome".into(),
            browser_version: "120".into(),
            ..Default::default()
        };
        let drift = detect_drift(&old, &new, 2);
        assert!(drift.has_changes);
        assert!(drift.severity < DriftSeverity::High);
    }

    #[test]
    fn three_major_fields_changed_is_high() {
        let old = DeviceAttributes {
            browser_name: "Chrome".into(),
            os_name: "Windows".into(),
            device_type: "desktop".into(),
            platform: "Win32".into(),
            ..Default::default()
        };
        let new = DeviceAttributes {
            browser_name: "Chrome".into(),
            os_name: "Linux".into(),
            device_type: "mobile".into(),
            platform: "Linux armv8l".into(),
            ..Default::default()
        };
        let drift = detect_drift(&old, &new, 2);
        assert_eq!(drift.severity, DriftSeverity::High);
    }

    #[test]
    fn single_major_field_change_is_medium() {
        let old = DeviceAttributes {
            os_name: "Windows".into(),
            ..Default::default()
        };
        let new = DeviceAttributes {
            os_name: "Linux".into(),
            ..Default::default()
        };
        assert_eq!(detect_drift(&old, &new, 2).severity, DriftSeverity::Medium);
    }
}

//! Deterministic-first field mapping and value cleanup.
//!
//! Exact label/kind rules resolve against the profile without any external
//! call; only fields these rules cannot place are escalated to the AI
//! mapper. Values are cleaned (phone digits, URL canonicalization) before
//! they are written.

use crate::profile::Profile;
use crate::types::{FieldDescriptor, FieldKind, MappingMethod, MappingResult};
use url::Url;

struct Rule {
    needles: &'static [&'static str],
    keys: &'static [&'static str],
}

/// Ordered most-specific first; the first matching rule wins.
const RULES: &[Rule] = &[
    Rule {
        needles: &["first name", "given name"],
        keys: &["first_name", "given_name"],
    },
    Rule {
        needles: &["last name", "family name", "surname"],
        keys: &["last_name", "family_name"],
    },
    Rule {
        needles: &["full name", "your name", "legal name"],
        keys: &["full_name"],
    },
    Rule {
        needles: &["preferred name", "nickname"],
        keys: &["preferred_name"],
    },
    Rule {
        needles: &["email"],
        keys: &["email"],
    },
    Rule {
        needles: &["phone", "mobile"],
        keys: &["phone", "mobile"],
    },
    Rule {
        needles: &["linkedin"],
        keys: &["linkedin"],
    },
    Rule {
        needles: &["github"],
        keys: &["github"],
    },
    Rule {
        needles: &["portfolio", "website", "personal site"],
        keys: &["website", "portfolio"],
    },
    Rule {
        needles: &["street address", "address line", "address"],
        keys: &["address"],
    },
    Rule {
        needles: &["city"],
        keys: &["city"],
    },
    Rule {
        needles: &["state", "province"],
        keys: &["state"],
    },
    Rule {
        needles: &["zip", "postal"],
        keys: &["postal_code", "zip"],
    },
    Rule {
        needles: &["country"],
        keys: &["country"],
    },
    Rule {
        needles: &["current company", "current employer", "company"],
        keys: &["current_company"],
    },
    Rule {
        needles: &["current title", "job title", "title"],
        keys: &["current_title"],
    },
    Rule {
        needles: &["years of experience", "years experience"],
        keys: &["years_experience"],
    },
    Rule {
        needles: &["salary", "compensation"],
        keys: &["desired_salary"],
    },
    Rule {
        needles: &["notice period", "start date", "available to start"],
        keys: &["start_date", "notice_period"],
    },
    Rule {
        needles: &["how did you hear"],
        keys: &["referral_source"],
    },
    Rule {
        needles: &["gender"],
        keys: &["gender"],
    },
    Rule {
        needles: &["race", "ethnicity"],
        keys: &["race_ethnicity"],
    },
    Rule {
        needles: &["veteran"],
        keys: &["veteran_status"],
    },
    Rule {
        needles: &["disability"],
        keys: &["disability_status"],
    },
];

/// Yes/no questions answered from the profile when possible.
const YES_NO_PROFILE: &[(&str, &str)] = &[
    ("authorized to work", "work_authorization"),
    ("work authorization", "work_authorization"),
    ("legally authorized", "work_authorization"),
    ("sponsorship", "requires_sponsorship"),
    ("require visa", "requires_sponsorship"),
    ("relocat", "willing_to_relocate"),
];

/// Positively-framed interest questions default to "Yes".
const POSITIVE_INTEREST: &[&str] = &[
    "are you interested",
    "would you like to",
    "open to",
    "willing to",
];

/// Ambiguous yes/no where the safe default is "No".
const SAFE_NO: &[&str] = &[
    "sponsorship",
    "require visa",
    "convicted",
    "criminal",
    "felony",
    "non-compete",
    "previously employed",
    "related to anyone",
];

fn normalize(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_yes_no(field: &FieldDescriptor) -> bool {
    if field.options.is_empty() {
        return false;
    }
    let labels: Vec<String> = field
        .options
        .iter()
        .map(|o| o.label.to_lowercase())
        .collect();
    labels.iter().any(|l| l.starts_with("yes")) && labels.iter().any(|l| l.starts_with("no"))
}

/// Rule-based field -> value resolution. Returns None when no rule applies,
/// which escalates the field to the AI mapper.
pub fn map_deterministic(field: &FieldDescriptor, profile: &Profile) -> Option<MappingResult> {
    let label = normalize(&field.label);
    let label = if label.is_empty() {
        normalize(&field.placeholder)
    } else {
        label
    };

    // Kind-driven shortcuts: an email input is the email regardless of label.
    let kind_key = match field.kind {
        FieldKind::Email => Some("email"),
        FieldKind::Phone => Some("phone"),
        _ => None,
    };
    if let Some(key) = kind_key {
        if let Some(value) = profile.get(key) {
            return Some(MappingResult {
                value: clean_for_key(key, field.kind, value),
                confidence: 0.95,
                method: MappingMethod::Deterministic,
            });
        }
    }

    for rule in RULES {
        if rule.needles.iter().any(|n| label.contains(n)) {
            if let Some(value) = profile.get_any(rule.keys) {
                return Some(MappingResult {
                    value: clean_for_key(rule.keys[0], field.kind, value),
                    confidence: 0.9,
                    method: MappingMethod::Deterministic,
                });
            }
            // A matching rule with no profile value means we know what the
            // field is and have nothing to put there; do not guess.
            return None;
        }
    }

    // Yes/no policy answers, only for controls that actually offer yes/no.
    if is_yes_no(field) {
        for (needle, key) in YES_NO_PROFILE {
            if label.contains(needle) {
                if let Some(value) = profile.get(key) {
                    return Some(MappingResult {
                        value: value.to_string(),
                        confidence: 0.85,
                        method: MappingMethod::Pattern,
                    });
                }
            }
        }
        if POSITIVE_INTEREST.iter().any(|n| label.contains(n)) {
            return Some(MappingResult {
                value: "Yes".to_string(),
                confidence: 0.6,
                method: MappingMethod::Pattern,
            });
        }
        if SAFE_NO.iter().any(|n| label.contains(n)) {
            return Some(MappingResult {
                value: "No".to_string(),
                confidence: 0.6,
                method: MappingMethod::Pattern,
            });
        }
    }

    None
}

fn clean_for_key(key: &str, kind: FieldKind, value: &str) -> String {
    if key == "phone" {
        return clean_phone(value);
    }
    if matches!(key, "linkedin" | "github" | "website" | "portfolio") {
        return format_url(value);
    }
    clean_value(kind, value)
}

/// Kind-driven cleanup for values that did not come through a profile rule
/// (AI answers, checkpoint instructions). Every value passes through a
/// cleaner before it is written.
pub fn clean_value(kind: FieldKind, value: &str) -> String {
    match kind {
        FieldKind::Phone => clean_phone(value),
        FieldKind::Url => format_url(value),
        _ => value.trim().to_string(),
    }
}

/// Reduce a phone number to bare digits, keeping an `x<digits>` extension
/// suffix when one is present. Idempotent.
pub fn clean_phone(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let (main, ext) = match lower.find("ext") {
        Some(pos) => (&lower[..pos], Some(&lower[pos + 3..])),
        None => match lower.find(['x', '#']) {
            Some(pos) => (&lower[..pos], Some(&lower[pos + 1..])),
            None => (lower.as_str(), None),
        },
    };

    let mut digits: String = main.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits.remove(0);
    }

    let ext_digits: String = ext
        .map(|e| e.chars().filter(|c| c.is_ascii_digit()).collect())
        .unwrap_or_default();
    if ext_digits.is_empty() {
        digits
    } else {
        format!("{digits}x{ext_digits}")
    }
}

/// Canonicalize a URL: ensure a scheme, and normalize well-known hosts
/// (LinkedIn wants www, GitHub does not). Idempotent; already well-formed
/// input round-trips unchanged.
pub fn format_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let Ok(mut parsed) = Url::parse(&with_scheme) else {
        return with_scheme;
    };

    let replacement = match parsed.host_str() {
        Some("linkedin.com") => Some("www.linkedin.com"),
        Some("www.github.com") => Some("github.com"),
        _ => None,
    };
    if let Some(host) = replacement {
        if parsed.set_host(Some(host)).is_err() {
            return with_scheme;
        }
    }

    let out = parsed.to_string();
    // Url::parse appends a trailing slash to bare hosts; keep input stable
    // when the caller did not have one.
    if !with_scheme.ends_with('/') && out.ends_with('/') && parsed.path() == "/" {
        out.trim_end_matches('/').to_string()
    } else {
        out
    }
}

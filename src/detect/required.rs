//! Required/optional classification for form fields.
//!
//! Layered, priority-ordered evaluation; each layer can short-circuit once
//! it is confident enough. Demographic/EEO questions are treated as optional
//! by policy even when the markup says otherwise (some sites mark them
//! `required` to force disclosure; we do not comply).

use crate::types::{FieldDescriptor, RequiredDecision};

/// Below this confidence the default-safe fallback kicks in.
const CONFIDENCE_FLOOR: f32 = 0.6;

const EEO_PATTERNS: &[&str] = &[
    "gender",
    "race",
    "ethnicity",
    "hispanic",
    "latino",
    "veteran",
    "disability",
    "disabled",
    "sexual orientation",
    "lgbtq",
    "pronoun",
    "transgender",
];

const OPT_OUT_OPTIONS: &[&str] = &[
    "prefer not to answer",
    "prefer not to say",
    "decline to self identify",
    "decline to answer",
    "i don't wish to answer",
    "do not wish to answer",
];

const OPTIONAL_LABEL_MARKERS: &[&str] = &[
    "(optional)",
    "optional",
    "not required",
    "preferred name",
    "if applicable",
    "if any",
];

pub fn classify_required(field: &FieldDescriptor) -> RequiredDecision {
    let label = field.label.to_lowercase();

    // Policy layer: EEO/demographic questions are always optional, even if
    // the markup carries a required attribute.
    if EEO_PATTERNS.iter().any(|p| label.contains(p)) {
        return RequiredDecision {
            required: false,
            confidence: 0.95,
            method: "eeo_policy",
        };
    }

    // HTML-level markers.
    if field.html_required || field.aria_required || field.data_required {
        return RequiredDecision {
            required: true,
            confidence: 0.9,
            method: "html_attribute",
        };
    }

    // Opt-out option inside a radio/checkbox group.
    if field.options.iter().any(|o| {
        let l = o.label.to_lowercase();
        OPT_OUT_OPTIONS.iter().any(|p| l.contains(p))
    }) {
        return RequiredDecision {
            required: false,
            confidence: 0.85,
            method: "opt_out_option",
        };
    }

    // Visual/text markers on the label, then CSS class hints. A marker only
    // wins here because no HTML attribute was present above.
    let mut best: Option<RequiredDecision> = None;
    let mut consider = |candidate: RequiredDecision| {
        if best
            .as_ref()
            .map(|b| candidate.confidence > b.confidence)
            .unwrap_or(true)
        {
            best = Some(candidate);
        }
    };

    // Anchored: a bare "required" only counts at the end of the label, and
    // never when negated ("not required").
    let trimmed = label.trim_end();
    if label.contains('*')
        || label.contains("(required)")
        || (trimmed.ends_with("required") && !trimmed.ends_with("not required"))
    {
        consider(RequiredDecision {
            required: true,
            confidence: 0.85,
            method: "visual_marker",
        });
    }
    if OPTIONAL_LABEL_MARKERS.iter().any(|p| label.contains(p)) {
        consider(RequiredDecision {
            required: false,
            confidence: 0.75,
            method: "optional_label",
        });
    }
    if field
        .classes
        .iter()
        .any(|c| c.to_lowercase().contains("required"))
    {
        consider(RequiredDecision {
            required: true,
            confidence: 0.7,
            method: "css_class",
        });
    }

    match best {
        Some(d) if d.confidence >= CONFIDENCE_FLOOR => d,
        // Uncertain: defaulting to required is the safe choice, a skipped
        // mandatory field blocks submission.
        _ => RequiredDecision {
            required: true,
            confidence: 0.5,
            method: "default_safe",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldKind, GroupOption};

    fn field(label: &str) -> FieldDescriptor {
        FieldDescriptor {
            stable_id: "f".into(),
            label: label.into(),
            kind: FieldKind::Text,
            value: String::new(),
            placeholder: String::new(),
            aria_text: String::new(),
            html_required: false,
            aria_required: false,
            data_required: false,
            classes: vec![],
            options: vec![],
        }
    }

    #[test]
    fn html_required_short_circuits_with_high_confidence() {
        let mut f = field("Email");
        f.html_required = true;
        let d = classify_required(&f);
        assert!(d.required);
        assert!(d.confidence >= 0.9);
        assert_eq!(d.method, "html_attribute");
    }

    #[test]
    fn aria_required_counts_as_html_layer() {
        let mut f = field("Phone");
        f.aria_required = true;
        assert!(classify_required(&f).required);
    }

    #[test]
    fn eeo_labels_are_optional_even_when_marked_required() {
        for label in ["Gender", "Veteran Status", "Race/Ethnicity", "Disability"] {
            let mut f = field(label);
            f.html_required = true;
            let d = classify_required(&f);
            assert!(!d.required, "{label} should be optional by policy");
            assert_eq!(d.confidence, 0.95);
            assert_eq!(d.method, "eeo_policy");
        }
    }

    #[test]
    fn opt_out_option_makes_group_optional() {
        let mut f = field("How did you hear about us?");
        f.kind = FieldKind::RadioGroup;
        f.options = vec![
            GroupOption {
                label: "Referral".into(),
                selector: "[data-aaid=\"hear-referral\"]".into(),
            },
            GroupOption {
                label: "Prefer not to answer".into(),
                selector: "[data-aaid=\"hear-optout\"]".into(),
            },
        ];
        let d = classify_required(&f);
        assert!(!d.required);
        assert_eq!(d.confidence, 0.85);
    }

    #[test]
    fn asterisk_marks_required() {
        let d = classify_required(&field("First Name *"));
        assert!(d.required);
        assert_eq!(d.method, "visual_marker");
    }

    #[test]
    fn optional_marker_in_label() {
        let d = classify_required(&field("Cover Letter (optional)"));
        assert!(!d.required);
    }

    #[test]
    fn negated_required_marker_is_optional() {
        let d = classify_required(&field("Portfolio link (not required)"));
        assert!(!d.required);
        assert_eq!(d.method, "optional_label");
    }

    #[test]
    fn trailing_required_marker_still_counts() {
        let d = classify_required(&field("Last Name - required"));
        assert!(d.required);
        assert_eq!(d.method, "visual_marker");
    }

    #[test]
    fn uncertain_defaults_to_required_at_half_confidence() {
        let d = classify_required(&field("Favorite color"));
        assert!(d.required);
        assert_eq!(d.confidence, 0.5);
        assert_eq!(d.method, "default_safe");
    }
}

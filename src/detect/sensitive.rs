//! Sensitive-field detection: passwords and one-time codes must never be
//! auto-filled blindly. The exception is an account-creation page, where a
//! fresh password is ours to set and the run can proceed without a human.

use crate::types::{FieldDescriptor, FieldKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitiveKind {
    Password,
    OneTimeCode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensitiveVerdict {
    /// Credentials or codes we must not guess; hand off to a human.
    NeedsHuman(String),
    /// Account-creation page: password fields are safe to auto-fill.
    AutoFillCredentials,
    /// No sensitive fields in play.
    Clear,
}

const OTP_KEYWORDS: &[&str] = &[
    "verification code",
    "one-time",
    "one time code",
    "otp",
    "2fa",
    "two-factor",
    "security code",
    "authentication code",
    "code sent to",
];

const CREATION_VOCAB: &[&str] = &[
    "create account",
    "create your account",
    "create an account",
    "sign up",
    "register",
    "get started",
    "join",
];

const LOGIN_VOCAB: &[&str] = &[
    "sign in",
    "log in",
    "login",
    "welcome back",
    "forgot password",
    "forgot your password",
];

/// Fast direct hit for password inputs, then keyword matching across the
/// associated label/placeholder/aria text for OTP-like fields.
pub fn sensitive_kind(field: &FieldDescriptor) -> Option<SensitiveKind> {
    if field.kind == FieldKind::Password {
        return Some(SensitiveKind::Password);
    }
    let haystack = field.haystack();
    if OTP_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
        return Some(SensitiveKind::OneTimeCode);
    }
    None
}

/// Account-creation pages are detected by keyword density (creation
/// vocabulary outweighing login vocabulary) or by a confirm-password field.
pub fn is_account_creation_page(page_text: &str, fields: &[FieldDescriptor]) -> bool {
    let password_fields: Vec<_> = fields
        .iter()
        .filter(|f| f.kind == FieldKind::Password)
        .collect();
    if password_fields.len() >= 2 {
        return true;
    }
    if password_fields
        .iter()
        .any(|f| f.haystack().contains("confirm"))
    {
        return true;
    }

    let text = page_text.to_lowercase();
    let creation_hits = CREATION_VOCAB
        .iter()
        .filter(|kw| text.contains(*kw))
        .count();
    let login_hits = LOGIN_VOCAB.iter().filter(|kw| text.contains(*kw)).count();
    creation_hits > login_hits && creation_hits > 0
}

/// Gate a page's fields: decide whether the run can proceed automatically.
pub fn gate(fields: &[FieldDescriptor], page_text: &str) -> SensitiveVerdict {
    let mut password_label = None;
    for field in fields {
        match sensitive_kind(field) {
            Some(SensitiveKind::OneTimeCode) => {
                return SensitiveVerdict::NeedsHuman(format!(
                    "one-time code requested: {}",
                    field.label
                ));
            }
            Some(SensitiveKind::Password) => password_label = Some(field.label.clone()),
            None => {}
        }
    }

    match password_label {
        Some(label) => {
            if is_account_creation_page(page_text, fields) {
                SensitiveVerdict::AutoFillCredentials
            } else {
                SensitiveVerdict::NeedsHuman(format!("login password requested: {label}"))
            }
        }
        None => SensitiveVerdict::Clear,
    }
}

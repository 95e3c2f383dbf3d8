//! Input checks for the sign-up prompts.
//!
//! The backend validates too; these exist so a typo is caught before a
//! round trip.

/// Minimum password length
const MIN_PASSWORD_LENGTH: usize = 8;

/// bcrypt on the server ignores anything past 72 bytes, so it rejects them
const MAX_PASSWORD_BYTES: usize = 72;

/// Characters that satisfy the "special character" rule
const SPECIAL_CHARS: &str = r#"!@#$%^&*()_+-=[]{};':"\|,.<>/?"#;

/// Which password rules a candidate satisfies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordChecks {
    pub min_length: bool,
    pub max_bytes: bool,
    pub uppercase: bool,
    pub lowercase: bool,
    pub number: bool,
    pub special: bool,
}

impl PasswordChecks {
    pub fn evaluate(password: &str) -> Self {
        Self {
            min_length: password.chars().count() >= MIN_PASSWORD_LENGTH,
            max_bytes: password.len() <= MAX_PASSWORD_BYTES,
            uppercase: password.chars().any(|c| c.is_ascii_uppercase()),
            lowercase: password.chars().any(|c| c.is_ascii_lowercase()),
            number: password.chars().any(|c| c.is_ascii_digit()),
            special: password.chars().any(|c| SPECIAL_CHARS.contains(c)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.unmet().is_empty()
    }

    /// Human-readable list of the rules not yet met
    pub fn unmet(&self) -> Vec<&'static str> {
        let rules = [
            (self.min_length, "at least 8 characters"),
            (self.max_bytes, "at most 72 bytes"),
            (self.uppercase, "an uppercase letter"),
            (self.lowercase, "a lowercase letter"),
            (self.number, "a number"),
            (self.special, "a special character"),
        ];
        rules
            .into_iter()
            .filter(|(met, _)| !met)
            .map(|(_, rule)| rule)
            .collect()
    }
}

/// Loose shape check: something@something.something, no whitespace
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty() && !host.is_empty() && !tld.is_empty()
}

/// Recovery codes are six ASCII digits
pub fn is_valid_recovery_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

//! Input validation for ticket holders.

/// Validate an email address.
///
/// Accepts `local@domain.tld` where the local part uses letters, digits and
/// `._%+-`, the domain uses letters, digits, `.` and `-`, and the final label is
/// at least two ASCII letters.
///
/// # Examples
///
/// ```
/// use ticketing_core::validation::is_valid_email;
///
/// assert!(is_valid_email("alice@example.com"));
/// assert!(is_valid_email("a.b+tag@sub.example.co.uk"));
/// assert!(!is_valid_email("alice@example"));
/// assert!(!is_valid_email("@example.com"));
/// ```
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c));
    if !local_ok {
        return false;
    }

    // Domain part is `[a-zA-Z0-9.-]+` followed by `.` and a 2+ letter TLD.
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    let tld_ok = tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic());
    host_ok && tld_ok
}

/// Validate a ticket holder name: non-blank, no control characters.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("user.name@example.com"));
        assert!(is_valid_email("user+tag@example.com"));
        assert!(is_valid_email("user_name@subdomain.example.com"));
        assert!(is_valid_email("user-name@example.co.uk"));
        assert!(is_valid_email("100%@example.org"));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@example.c"));
        assert!(!is_valid_email("user@example.c0m"));
        assert!(!is_valid_email("user name@example.com"));
        assert!(!is_valid_email("user@exa mple.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_names() {
        assert!(is_valid_name("Alice"));
        assert!(is_valid_name("山田 太郎"));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("Bob\nDROP"));
    }
}

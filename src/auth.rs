use sha2::{Digest, Sha256};
use uuid::Uuid;

const HASH_SCHEME: &str = "sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Faculty,
    Student,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "faculty" => Some(Self::Faculty),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Faculty => "faculty",
            Self::Student => "student",
        }
    }

    /// Table holding the accounts for this role.
    pub fn table(self) -> &'static str {
        match self {
            Self::Admin => "admins",
            Self::Faculty => "faculty",
            Self::Student => "students",
        }
    }

    /// Column used as the login name. Students sign in with their enrollment number.
    pub fn login_column(self) -> &'static str {
        match self {
            Self::Admin | Self::Faculty => "email",
            Self::Student => "enrollment_number",
        }
    }
}

/// The signed-in user a token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub role: Role,
    pub user_id: String,
    pub name: String,
}

/// Salted SHA-256, stored as `sha256$<salt>$<hex digest>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = digest_hex(&salt, password);
    format!("{}${}${}", HASH_SCHEME, salt, digest)
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(scheme), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME || salt.is_empty() || digest.is_empty() {
        return false;
    }
    digest_hex(salt, password) == digest
}

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn new_session_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_matching_password() {
        let stored = hash_password("faculty123");
        assert!(stored.starts_with("sha256$"));
        assert!(verify_password(&stored, "faculty123"));
        assert!(!verify_password(&stored, "faculty124"));
        assert!(!verify_password(&stored, ""));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = hash_password("123456");
        let b = hash_password("123456");
        assert_ne!(a, b);
        assert!(verify_password(&a, "123456"));
        assert!(verify_password(&b, "123456"));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("", "x"));
        assert!(!verify_password("plaintext", "plaintext"));
        assert!(!verify_password("sha256$$", ""));
        assert!(!verify_password("md5$salt$abcdef", "x"));
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!(Role::parse("Faculty"), Some(Role::Faculty));
        assert_eq!(Role::parse(" student "), Some(Role::Student));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Student.login_column(), "enrollment_number");
    }

    #[test]
    fn session_tokens_are_unique_hex() {
        let a = new_session_token();
        let b = new_session_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

const PRIVILEGED_NAME: &str = "root";

fn account_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").unwrap())
}

/// The non-privileged account the image runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdentityRepr")]
pub struct ExecutionIdentity {
    pub name: String,
    /// Fixed uid; when absent the account tool picks the next free one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
}

/// Accepts `user: app` as well as `user: { name: app, uid: 1000 }`
#[derive(Deserialize)]
#[serde(untagged)]
enum IdentityRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        uid: Option<u32>,
    },
}

impl From<IdentityRepr> for ExecutionIdentity {
    fn from(repr: IdentityRepr) -> Self {
        match repr {
            IdentityRepr::Name(name) => Self { name, uid: None },
            IdentityRepr::Full { name, uid } => Self { name, uid },
        }
    }
}

impl ExecutionIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Portable POSIX account name accepted by both busybox `adduser` and `useradd`
    pub fn has_valid_name(&self) -> bool {
        account_name_regex().is_match(&self.name)
    }

    pub fn is_privileged(&self) -> bool {
        self.name == PRIVILEGED_NAME || self.uid == Some(0)
    }
}

impl fmt::Display for ExecutionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.uid {
            Some(uid) => write!(f, "{} (uid {})", self.name, uid),
            None => write!(f, "{}", self.name),
        }
    }
}

/// True when an image's configured user means the privileged account
pub fn is_privileged_user(user: &str) -> bool {
    let principal = user.split(':').next().unwrap_or("").trim();
    principal.is_empty() || principal == PRIVILEGED_NAME || principal == "0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_short_form() {
        let identity: ExecutionIdentity = serde_yaml::from_str("user").unwrap();
        assert_eq!(identity, ExecutionIdentity::new("user"));
    }

    #[test]
    fn test_deserialize_full_form() {
        let identity: ExecutionIdentity = serde_yaml::from_str("name: app\nuid: 1001\n").unwrap();
        assert_eq!(identity, ExecutionIdentity::new("app").with_uid(1001));
    }

    #[test]
    fn test_name_validation() {
        assert!(ExecutionIdentity::new("user").has_valid_name());
        assert!(ExecutionIdentity::new("_svc-1").has_valid_name());
        assert!(!ExecutionIdentity::new("User").has_valid_name());
        assert!(!ExecutionIdentity::new("1user").has_valid_name());
        assert!(!ExecutionIdentity::new("").has_valid_name());
        assert!(!ExecutionIdentity::new("a".repeat(33)).has_valid_name());
    }

    #[test]
    fn test_privileged_identity() {
        assert!(ExecutionIdentity::new("root").is_privileged());
        assert!(ExecutionIdentity::new("app").with_uid(0).is_privileged());
        assert!(!ExecutionIdentity::new("app").with_uid(1000).is_privileged());
    }

    #[test]
    fn test_privileged_user_strings() {
        assert!(is_privileged_user(""));
        assert!(is_privileged_user("root"));
        assert!(is_privileged_user("0:0"));
        assert!(is_privileged_user("root:wheel"));
        assert!(!is_privileged_user("user"));
        assert!(!is_privileged_user("1000:1000"));
    }
}

//! `/etc/passwd` parsing and account collision checks

use crate::recipe::ExecutionIdentity;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PASSWD_PATH: &str = "/etc/passwd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountConflict {
    #[error("account '{name}' already exists in the base image (uid {uid})")]
    NameTaken { name: String, uid: u32 },

    #[error("uid {uid} is already used by '{owner}' in the base image")]
    UidTaken { uid: u32, owner: String },
}

/// Accounts defined in an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswdDb {
    entries: Vec<PasswdEntry>,
}

impl PasswdDb {
    /// Lenient parse; lines that are not `name:x:uid:gid:gecos:home:shell` are skipped
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let fields: Vec<&str> = line.split(':').collect();
                if fields.len() < 7 || fields[0].is_empty() {
                    return None;
                }
                Some(PasswdEntry {
                    name: fields[0].to_string(),
                    uid: fields[2].parse().ok()?,
                    gid: fields[3].parse().ok()?,
                    home: fields[5].to_string(),
                    shell: fields[6].to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[PasswdEntry] {
        &self.entries
    }

    pub fn find(&self, name: &str) -> Option<&PasswdEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn find_uid(&self, uid: u32) -> Option<&PasswdEntry> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails when the identity's name or fixed uid is already taken
    pub fn check_available(&self, identity: &ExecutionIdentity) -> Result<(), AccountConflict> {
        if let Some(existing) = self.find(&identity.name) {
            return Err(AccountConflict::NameTaken {
                name: existing.name.clone(),
                uid: existing.uid,
            });
        }
        if let Some(uid) = identity.uid {
            if let Some(owner) = self.find_uid(uid) {
                return Err(AccountConflict::UidTaken {
                    uid,
                    owner: owner.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Line appended by account creation tools for a new unprivileged user
    pub fn entry_line(name: &str, uid: u32) -> String {
        format!("{name}:x:{uid}:{uid}:Linux User,,,:/home/{name}:/sbin/nologin")
    }

    /// Next uid an account tool would assign, starting at 1000
    pub fn next_free_uid(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| e.uid)
            .filter(|uid| (1000..60000).contains(uid))
            .max()
            .map(|uid| uid + 1)
            .unwrap_or(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALPINE_PASSWD: &str = "root:x:0:0:root:/root:/bin/ash\n\
bin:x:1:1:bin:/bin:/sbin/nologin\n\
daemon:x:2:2:daemon:/sbin:/sbin/nologin\n\
nobody:x:65534:65534:nobody:/:/sbin/nologin\n";

    #[test]
    fn test_parse_alpine_passwd() {
        let db = PasswdDb::parse(ALPINE_PASSWD);
        assert_eq!(db.len(), 4);
        assert_eq!(db.find("root").unwrap().uid, 0);
        assert_eq!(db.find("nobody").unwrap().home, "/");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let db = PasswdDb::parse("broken\nuser:x:abc:1:::/bin/sh\n# comment\napp:x:1000:1000::/app:/bin/sh\n");
        assert_eq!(db.len(), 1);
        assert_eq!(db.entries()[0].name, "app");
    }

    #[test]
    fn test_name_collision() {
        let db = PasswdDb::parse(ALPINE_PASSWD);
        let err = db
            .check_available(&ExecutionIdentity::new("daemon"))
            .unwrap_err();
        assert_eq!(
            err,
            AccountConflict::NameTaken {
                name: "daemon".to_string(),
                uid: 2
            }
        );
        assert!(db.check_available(&ExecutionIdentity::new("user")).is_ok());
    }

    #[test]
    fn test_uid_collision() {
        let db = PasswdDb::parse(ALPINE_PASSWD);
        let err = db
            .check_available(&ExecutionIdentity::new("svc").with_uid(65534))
            .unwrap_err();
        assert!(matches!(err, AccountConflict::UidTaken { uid: 65534, .. }));
    }

    #[test]
    fn test_next_free_uid() {
        let mut db = PasswdDb::parse(ALPINE_PASSWD);
        assert_eq!(db.next_free_uid(), 1000);
        db = PasswdDb::parse(&format!("{}{}\n", ALPINE_PASSWD, PasswdDb::entry_line("app", 1000)));
        assert_eq!(db.next_free_uid(), 1001);
    }
}

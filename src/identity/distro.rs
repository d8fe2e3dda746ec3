//! Base distribution detection
//!
//! The distribution decides which account tool exists in the image: busybox
//! `adduser` on Alpine and Wolfi, shadow-utils `useradd` on glibc distributions.

use crate::recipe::{ExecutionIdentity, ImageRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

/// Parsed `/etc/os-release`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: HashMap<String, String>,
}

impl OsRelease {
    pub fn parse(content: &str) -> Self {
        let fields = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                (key.trim().to_string(), value.to_string())
            })
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get("ID")
    }

    pub fn id_like(&self) -> Vec<&str> {
        self.get("ID_LIKE")
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn version_id(&self) -> Option<&str> {
        self.get("VERSION_ID")
    }

    pub fn pretty_name(&self) -> Option<&str> {
        self.get("PRETTY_NAME")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distro {
    Alpine,
    Wolfi,
    Debian,
    Ubuntu,
    Rhel,
    Unknown,
}

impl Distro {
    pub fn detect(os_release: &OsRelease) -> Self {
        let mut candidates = Vec::new();
        candidates.extend(os_release.id());
        candidates.extend(os_release.id_like());

        for id in candidates {
            let distro = match id.to_ascii_lowercase().as_str() {
                "alpine" => Distro::Alpine,
                "wolfi" | "chainguard" => Distro::Wolfi,
                "debian" => Distro::Debian,
                "ubuntu" => Distro::Ubuntu,
                "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" => Distro::Rhel,
                _ => continue,
            };
            return distro;
        }
        Distro::Unknown
    }

    /// Best guess from the reference alone, for planning without an engine
    pub fn guess_from_reference(reference: &ImageRef) -> Self {
        let haystack = format!("{}:{}", reference.repository(), reference.tag_or_default());
        let haystack = haystack.to_ascii_lowercase();
        if haystack.contains("alpine") {
            Distro::Alpine
        } else if haystack.contains("wolfi") || haystack.contains("chainguard") {
            Distro::Wolfi
        } else if haystack.contains("ubuntu") {
            Distro::Ubuntu
        } else if ["debian", "slim", "bookworm", "bullseye", "buster", "trixie"]
            .iter()
            .any(|hint| haystack.contains(hint))
        {
            Distro::Debian
        } else if ["fedora", "centos", "rocky", "ubi", "almalinux", "amazonlinux"]
            .iter()
            .any(|hint| haystack.contains(hint))
        {
            Distro::Rhel
        } else {
            Distro::Unknown
        }
    }

    pub fn account_tool(self) -> AccountTool {
        match self {
            Distro::Alpine | Distro::Wolfi => AccountTool::Busybox,
            Distro::Debian | Distro::Ubuntu | Distro::Rhel => AccountTool::Shadow,
            Distro::Unknown => AccountTool::Either,
        }
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distro::Alpine => "alpine",
            Distro::Wolfi => "wolfi",
            Distro::Debian => "debian",
            Distro::Ubuntu => "ubuntu",
            Distro::Rhel => "rhel",
            Distro::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTool {
    /// busybox `adduser`
    Busybox,
    /// shadow-utils `useradd`
    Shadow,
    /// Try busybox first, then shadow-utils
    Either,
}

impl AccountTool {
    /// Shell command creating a home-less, password-less account
    pub fn create_command(self, identity: &ExecutionIdentity) -> String {
        let busybox = match identity.uid {
            Some(uid) => format!("adduser -D -H -u {} {}", uid, identity.name),
            None => format!("adduser -D -H {}", identity.name),
        };
        let shadow = match identity.uid {
            Some(uid) => format!("useradd --no-create-home --uid {} {}", uid, identity.name),
            None => format!("useradd --no-create-home {}", identity.name),
        };
        match self {
            AccountTool::Busybox => busybox,
            AccountTool::Shadow => shadow,
            AccountTool::Either => format!("{} 2>/dev/null || {}", busybox, shadow),
        }
    }
}

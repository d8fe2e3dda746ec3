//! Execution identity inside the image
//!
//! The base image's account database and distribution are inspected before
//! anything is built, so a colliding account name fails the build early.

pub mod distro;
pub mod passwd;

pub use distro::{AccountTool, Distro, OsRelease, OS_RELEASE_PATHS};
pub use passwd::{AccountConflict, PasswdDb, PasswdEntry, PASSWD_PATH};

/// What the base image tells us about accounts before any step runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseIdentityInfo {
    pub distro: Distro,
    pub passwd: PasswdDb,
}

impl BaseIdentityInfo {
    pub fn new(os_release: Option<&str>, passwd: Option<&str>) -> Self {
        Self {
            distro: os_release
                .map(|content| Distro::detect(&OsRelease::parse(content)))
                .unwrap_or(Distro::Unknown),
            passwd: passwd.map(PasswdDb::parse).unwrap_or_default(),
        }
    }
}

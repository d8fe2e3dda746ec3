//! Build state machine
//!
//! `Pending → BaseSelected → DependenciesInstalled → AppPlaced →
//! PrivilegeDropped → Ready`. Transitions only move one state forward. A
//! failure is terminal and the build is discarded.

use crate::error::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    BaseSelected,
    DependenciesInstalled,
    AppPlaced,
    PrivilegeDropped,
    Ready,
}

impl BuildState {
    pub fn next(self) -> Option<Self> {
        match self {
            BuildState::Pending => Some(BuildState::BaseSelected),
            BuildState::BaseSelected => Some(BuildState::DependenciesInstalled),
            BuildState::DependenciesInstalled => Some(BuildState::AppPlaced),
            BuildState::AppPlaced => Some(BuildState::PrivilegeDropped),
            BuildState::PrivilegeDropped => Some(BuildState::Ready),
            BuildState::Ready => None,
        }
    }

    /// Moves to `to`, which must be the immediate successor
    pub fn advance(&mut self, to: BuildState) -> Result<(), BuildError> {
        if self.next() != Some(to) {
            return Err(BuildError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_ready(self) -> bool {
        self == BuildState::Ready
    }

    /// The step that moves the build out of this state
    pub fn pending_stage(self) -> Option<BuildStage> {
        let next = self.next()?;
        BuildStage::ALL.into_iter().find(|s| s.completes() == next)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Pending => "Pending",
            BuildState::BaseSelected => "BaseSelected",
            BuildState::DependenciesInstalled => "DependenciesInstalled",
            BuildState::AppPlaced => "AppPlaced",
            BuildState::PrivilegeDropped => "PrivilegeDropped",
            BuildState::Ready => "Ready",
        };
        write!(f, "{}", name)
    }
}

/// One step of the build, named after what it does to the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Base,
    Dependencies,
    Placement,
    Privilege,
    Finalize,
}

impl BuildStage {
    pub const LAYERED: [BuildStage; 4] = [
        BuildStage::Base,
        BuildStage::Dependencies,
        BuildStage::Placement,
        BuildStage::Privilege,
    ];

    pub const ALL: [BuildStage; 5] = [
        BuildStage::Base,
        BuildStage::Dependencies,
        BuildStage::Placement,
        BuildStage::Privilege,
        BuildStage::Finalize,
    ];

    /// State the build is in once this step succeeds
    pub fn completes(self) -> BuildState {
        match self {
            BuildStage::Base => BuildState::BaseSelected,
            BuildStage::Dependencies => BuildState::DependenciesInstalled,
            BuildStage::Placement => BuildState::AppPlaced,
            BuildStage::Privilege => BuildState::PrivilegeDropped,
            BuildStage::Finalize => BuildState::Ready,
        }
    }

    /// 1-based position shown in step listings
    pub fn number(self) -> usize {
        match self {
            BuildStage::Base => 1,
            BuildStage::Dependencies => 2,
            BuildStage::Placement => 3,
            BuildStage::Privilege => 4,
            BuildStage::Finalize => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStage::Base => "base",
            BuildStage::Dependencies => "dependencies",
            BuildStage::Placement => "placement",
            BuildStage::Privilege => "privilege",
            BuildStage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Base => "base environment selection",
            BuildStage::Dependencies => "dependency installation",
            BuildStage::Placement => "application placement",
            BuildStage::Privilege => "privilege de-escalation",
            BuildStage::Finalize => "finalization",
        };
        write!(f, "{}", name)
    }
}

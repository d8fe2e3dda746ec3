//! Build planning
//!
//! A plan is the four layered steps with their Dockerfile instructions and
//! cache keys. Keys chain: each step's key covers its parent's key, its own
//! instructions and the digests of the inputs it copies in. The dependency
//! step never sees the application tree, so editing application code leaves
//! its key untouched.

pub mod instruction;

pub use instruction::{Instruction, InstructionError};

use crate::digest::Digest;
use crate::identity::AccountTool;
use crate::pipeline::BuildStage;
use crate::recipe::BuildRecipe;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Bumped whenever the shape of generated steps changes
pub const CACHE_KEY_VERSION: &str = "boxwright/v1";

/// Files a step needs in its build context besides the Dockerfile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepContext {
    Empty,
    Manifest { path: String },
    Tree { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInput {
    pub name: String,
    pub digest: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub stage: BuildStage,
    pub instructions: Vec<Instruction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepInput>,
    pub context: StepContext,
    pub cache_key: Digest,
}

impl PlanStep {
    fn new(
        stage: BuildStage,
        parent_key: &str,
        instructions: Vec<Instruction>,
        inputs: Vec<StepInput>,
        context: StepContext,
    ) -> Self {
        let described = serde_json::to_string(&instructions).unwrap_or_default();
        let mut parts = vec![
            parent_key.to_string(),
            stage.as_str().to_string(),
            described,
        ];
        for input in &inputs {
            parts.push(format!("{}={}", input.name, input.digest));
        }

        Self {
            stage,
            cache_key: Digest::chain(&parts),
            instructions,
            inputs,
            context,
        }
    }

    /// Single-step Dockerfile layered on top of `parent`
    pub fn dockerfile(&self, parent: &str) -> String {
        let mut lines = vec![Instruction::From {
            image: parent.to_string(),
        }
        .to_string()];
        lines.extend(self.instructions.iter().map(|i| i.to_string()));
        lines.join("\n") + "\n"
    }
}

/// `/`-separated path inside the build context; `./` prefixes are dropped
pub fn context_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn dir_path(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

pub fn base_step(recipe: &BuildRecipe, base_id: &str) -> PlanStep {
    let env = recipe.runtime_env();
    let instructions = if env.is_empty() {
        Vec::new()
    } else {
        vec![Instruction::Env {
            vars: env.into_iter().collect(),
        }]
    };
    let seed = Digest::chain([CACHE_KEY_VERSION, base_id]).to_string();
    PlanStep::new(
        BuildStage::Base,
        &seed,
        instructions,
        Vec::new(),
        StepContext::Empty,
    )
}

pub fn dependencies_step(recipe: &BuildRecipe, parent: &PlanStep, manifest: &Digest) -> PlanStep {
    let path = context_path(&recipe.manifest);
    PlanStep::new(
        BuildStage::Dependencies,
        &parent.cache_key.to_string(),
        vec![
            Instruction::Copy {
                src: path.clone(),
                dest: recipe.manifest_dest.clone(),
            },
            Instruction::Run {
                command: recipe.install_command(),
            },
        ],
        vec![StepInput {
            name: "manifest".to_string(),
            digest: manifest.clone(),
        }],
        StepContext::Manifest { path },
    )
}

pub fn placement_step(recipe: &BuildRecipe, parent: &PlanStep, tree: &Digest) -> PlanStep {
    let path = context_path(&recipe.source);
    PlanStep::new(
        BuildStage::Placement,
        &parent.cache_key.to_string(),
        vec![
            Instruction::Run {
                command: format!("mkdir -p {}", recipe.app_dir),
            },
            Instruction::Workdir {
                path: recipe.app_dir.clone(),
            },
            Instruction::Copy {
                src: dir_path(&path),
                dest: dir_path(&recipe.app_dir),
            },
        ],
        vec![StepInput {
            name: "source".to_string(),
            digest: tree.clone(),
        }],
        StepContext::Tree { path },
    )
}

pub fn privilege_step(recipe: &BuildRecipe, parent: &PlanStep, tool: AccountTool) -> PlanStep {
    PlanStep::new(
        BuildStage::Privilege,
        &parent.cache_key.to_string(),
        vec![
            Instruction::Run {
                command: tool.create_command(&recipe.user),
            },
            Instruction::User {
                name: recipe.user.name.clone(),
            },
        ],
        Vec::new(),
        StepContext::Empty,
    )
}

/// All four layered steps, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub base: String,
    pub steps: Vec<PlanStep>,
}

impl BuildPlan {
    pub fn new(
        recipe: &BuildRecipe,
        base_id: &str,
        manifest: &Digest,
        tree: &Digest,
        tool: AccountTool,
    ) -> Self {
        let base = base_step(recipe, base_id);
        let dependencies = dependencies_step(recipe, &base, manifest);
        let placement = placement_step(recipe, &dependencies, tree);
        let privilege = privilege_step(recipe, &placement, tool);
        Self {
            base: base_id.to_string(),
            steps: vec![base, dependencies, placement, privilege],
        }
    }

    pub fn step(&self, stage: BuildStage) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.stage == stage)
    }

    /// One Dockerfile equivalent to running every step in sequence
    pub fn render_dockerfile(&self) -> String {
        let mut out = format!("FROM {}\n", self.base);
        for step in &self.steps {
            if step.instructions.is_empty() {
                continue;
            }
            out.push_str(&format!("\n# {}. {}\n", step.stage.number(), step.stage));
            for instruction in &step.instructions {
                out.push_str(&instruction.to_string());
                out.push('\n');
            }
        }
        out
    }
}

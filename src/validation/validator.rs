use crate::recipe::BuildRecipe;
use crate::validation::rules::{
    ContextPathsRule, ExecutionIdentityRule, ImagePathsRule, PinnedBaseRule, RequiredFieldsRule,
    RuntimeEnvRule, ValidTagRule, ValidationRule,
};
use anyhow::Result;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, recipe: &BuildRecipe) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(recipe) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(PinnedBaseRule),
                Box::new(ExecutionIdentityRule),
                Box::new(ContextPathsRule),
                Box::new(ImagePathsRule),
                Box::new(RuntimeEnvRule),
                Box::new(ValidTagRule),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{ExecutionIdentity, RecipeFormat};

    fn create_minimal_valid_recipe() -> BuildRecipe {
        BuildRecipe::parse(
            "base: python:3.9-alpine\nmanifest: requirements.txt\nsource: app\nuser: user\n",
            RecipeFormat::Yaml,
        )
        .unwrap()
    }

    #[test]
    fn test_validator_valid_recipe() {
        let recipe = create_minimal_valid_recipe();
        let validator = Validator::new();
        assert!(validator.validate(&recipe).is_ok());
    }

    #[test]
    fn test_validator_unpinned_base() {
        let mut recipe = create_minimal_valid_recipe();
        recipe.base = "python".to_string();
        let result = Validator::new().validate(&recipe);
        assert!(result.unwrap_err().to_string().contains("PinnedBase"));
    }

    #[test]
    fn test_validator_root_user() {
        let mut recipe = create_minimal_valid_recipe();
        recipe.user = ExecutionIdentity::new("root");
        let result = Validator::new().validate(&recipe);
        assert!(result.unwrap_err().to_string().contains("ExecutionIdentity"));
    }

    #[test]
    fn test_validator_custom_rules() {
        let mut recipe = create_minimal_valid_recipe();
        recipe.base = "python".to_string();
        let validator = Validator::with_rules(vec![Box::new(RequiredFieldsRule)]);
        assert!(validator.validate(&recipe).is_ok());
    }
}

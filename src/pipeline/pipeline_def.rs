//! Pipeline definition and builder
//!
//! A pipeline is an ordered list of stages. Order is part of the contract:
//! conditions may only refer to stages declared before them.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use crate::pipeline::context::EnvironmentMode;
use crate::pipeline::errors::ValidationError;
use crate::pipeline::parameters::ParameterFlag;
use crate::pipeline::stage::{Stage, StageBuilder, WhenCondition};
use crate::pipeline::steps::{
    BuildImage, Checkout, CleanWorkspace, Deploy, Lint, PushToRegistry, SecurityScan, TestImage,
    UnitTest,
};
use crate::pipeline::types::Validate;
use std::collections::HashSet;
use std::fmt;

/// `clean-workspace` stage
pub const CLEAN_WORKSPACE: &str = "clean-workspace";
/// `checkout` stage
pub const CHECKOUT: &str = "checkout";
/// `lint` stage
pub const LINT: &str = "lint";
/// `test` stage
pub const TEST: &str = "test";
/// `build-image` stage
pub const BUILD_IMAGE: &str = "build-image";
/// `test-image` stage
pub const TEST_IMAGE: &str = "test-image";
/// `security-scan` stage
pub const SECURITY_SCAN: &str = "security-scan";
/// `push-to-registry` stage
pub const PUSH_TO_REGISTRY: &str = "push-to-registry";
/// `deploy` stage
pub const DEPLOY: &str = "deploy";

/// Main pipeline structure
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    /// Pipeline name
    pub name: Option<String>,

    /// Stages in pipeline
    pub stages: Vec<Stage>,
}

impl Validate for Pipeline {
    type Error = ValidationError;

    fn validate(&self) -> Result<(), Self::Error> {
        if self.stages.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }

        let mut declared: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;

            for reference in stage.when.referenced_stages() {
                if !declared.contains(reference) {
                    return Err(ValidationError::UnknownStageReference {
                        stage: stage.name.clone(),
                        depends_on: reference.to_string(),
                    });
                }
            }

            if !declared.insert(stage.name.as_str()) {
                return Err(ValidationError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
        }

        Ok(())
    }
}

impl Pipeline {
    /// Creates a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// The clean/checkout/lint/test/build/test-image/scan/push/deploy pipeline
    pub fn standard() -> Self {
        let image_built = || WhenCondition::stage_succeeded(BUILD_IMAGE);
        let flag = WhenCondition::flag;

        PipelineBuilder::new()
            .name("standard")
            .stage(
                StageBuilder::new(CLEAN_WORKSPACE, CleanWorkspace)
                    .when(flag(ParameterFlag::CleanWorkspace))
                    .build_unchecked(),
            )
            .stage(StageBuilder::new(CHECKOUT, Checkout).fatal().build_unchecked())
            .stage(
                StageBuilder::new(LINT, Lint)
                    .when(flag(ParameterFlag::RunLinting))
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new(TEST, UnitTest)
                    .when(flag(ParameterFlag::RunTests))
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new(BUILD_IMAGE, BuildImage)
                    .when(flag(ParameterFlag::BuildImage))
                    .fatal()
                    .mode(EnvironmentMode::Production)
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new(TEST_IMAGE, TestImage)
                    .when(WhenCondition::all_of(vec![
                        flag(ParameterFlag::BuildImage),
                        flag(ParameterFlag::RunTests),
                        image_built(),
                    ]))
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new(SECURITY_SCAN, SecurityScan)
                    .when(WhenCondition::all_of(vec![
                        flag(ParameterFlag::BuildImage),
                        image_built(),
                    ]))
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new(PUSH_TO_REGISTRY, PushToRegistry)
                    .when(WhenCondition::all_of(vec![
                        flag(ParameterFlag::PushToRegistry),
                        image_built(),
                    ]))
                    .fatal()
                    .mode(EnvironmentMode::Production)
                    .build_unchecked(),
            )
            .stage(
                StageBuilder::new(DEPLOY, Deploy)
                    .when(WhenCondition::all_of(vec![
                        flag(ParameterFlag::DeployLocally),
                        image_built(),
                    ]))
                    .fatal()
                    .mode(EnvironmentMode::Production)
                    .build_unchecked(),
            )
            .build_unchecked()
    }

    /// Returns pipeline name
    pub fn name(&self) -> Option<&String> {
        self.name.as_ref()
    }

    /// Returns number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stages in declaration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Looks up a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline({}): {} stages",
            self.name.as_deref().unwrap_or("unnamed"),
            self.stages.len()
        )
    }
}

/// Builder for creating pipelines
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets pipeline name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.pipeline.name = Some(name.into());
        self
    }

    /// Adds a stage to pipeline
    pub fn stage(mut self, stage: Stage) -> Self {
        self.pipeline.stages.push(stage);
        self
    }

    /// Adds multiple stages to pipeline
    pub fn stages(mut self, mut stages: Vec<Stage>) -> Self {
        self.pipeline.stages.append(&mut stages);
        self
    }

    /// Builds the pipeline
    #[allow(clippy::missing_errors_doc)]
    pub fn build(self) -> Result<Pipeline, ValidationError> {
        self.pipeline.validate()?;
        Ok(self.pipeline)
    }

    /// Builds the pipeline without validation (for internal use)
    #[must_use]
    pub fn build_unchecked(self) -> Pipeline {
        self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::steps::Noop;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standard_pipeline_is_valid() {
        let pipeline = Pipeline::standard();
        assert!(pipeline.validate().is_ok());
        assert_eq!(pipeline.stage_count(), 9);
    }

    #[test]
    fn test_standard_stage_order_and_policy() {
        let pipeline = Pipeline::standard();
        let table: Vec<(&str, bool)> = pipeline
            .stages()
            .iter()
            .map(|s| (s.name.as_str(), s.fatal))
            .collect();

        assert_eq!(
            table,
            vec![
                (CLEAN_WORKSPACE, false),
                (CHECKOUT, true),
                (LINT, false),
                (TEST, false),
                (BUILD_IMAGE, true),
                (TEST_IMAGE, false),
                (SECURITY_SCAN, false),
                (PUSH_TO_REGISTRY, true),
                (DEPLOY, true),
            ]
        );
    }

    #[test]
    fn test_image_stages_depend_on_build() {
        let pipeline = Pipeline::standard();
        for name in [TEST_IMAGE, SECURITY_SCAN, PUSH_TO_REGISTRY, DEPLOY] {
            let stage = pipeline.stage(name).unwrap();
            assert!(
                stage.when.referenced_stages().contains(&BUILD_IMAGE),
                "{name} must require a successful image build"
            );
        }
    }

    #[test]
    fn test_production_mode_stages() {
        let pipeline = Pipeline::standard();
        assert_eq!(pipeline.stage(BUILD_IMAGE).unwrap().mode, EnvironmentMode::Production);
        assert_eq!(pipeline.stage(DEPLOY).unwrap().mode, EnvironmentMode::Production);
        assert_eq!(pipeline.stage(TEST).unwrap().mode, EnvironmentMode::Test);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let result = PipelineBuilder::new().build();
        assert!(matches!(result, Err(ValidationError::EmptyPipeline)));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = PipelineBuilder::new()
            .stage(Stage::new("build", Noop))
            .stage(Stage::new("build", Noop))
            .build();
        assert!(matches!(result, Err(ValidationError::DuplicateStage { .. })));
    }

    #[test]
    fn test_forward_reference_rejected() {
        let result = PipelineBuilder::new()
            .stage(
                Stage::new("deploy", Noop).with_when(WhenCondition::stage_succeeded("build")),
            )
            .stage(Stage::new("build", Noop))
            .build();

        assert_eq!(
            result.unwrap_err(),
            ValidationError::UnknownStageReference {
                stage: "deploy".to_string(),
                depends_on: "build".to_string(),
            }
        );
    }

    #[test]
    fn test_pipeline_display() {
        assert_eq!(
            Pipeline::standard().to_string(),
            "Pipeline(standard): 9 stages"
        );
    }
}

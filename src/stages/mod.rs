//! Transaction processing stages
//!
//! Each stage is a [`BeltProcess`](crate::pipeline::BeltProcess) with a
//! `ConveyorBelt` alias, so callers can attach plugins to any single step.

pub mod build;
pub mod fee_bump;
pub mod finality;
pub mod sign;
pub mod sign_requirements;
pub mod simulate;
pub mod submit;

pub use build::{BuildInput, BuildPipeline, BuildStage};
pub use fee_bump::{wrap_fee_bump, FeeBumpInput, FeeBumpPipeline, FeeBumpPlugin, FeeBumpStage};
pub use finality::{FinalityInput, FinalityPipeline, FinalityStage};
pub use sign::{SignInput, SignPipeline, SignStage};
pub use sign_requirements::{
    signature_requirements, SignRequirementsPipeline, SignRequirementsStage,
    SignatureRequirement,
};
pub use simulate::{assemble, SimulatePipeline, SimulateStage, SimulatedTransaction};
pub use submit::{SubmitInput, SubmitOutput, SubmitPipeline, SubmitStage, SubmitTransport};

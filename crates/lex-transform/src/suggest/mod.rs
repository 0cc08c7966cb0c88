//! Step suggestions computed from a dataset's profile.
//!
//! Both analyzers read every row and return their proposals as ready-made
//! [`StepConfig`](crate::steps::StepConfig) lists that can be submitted as a
//! run unchanged.

pub mod features;
pub mod preprocessing;

pub use features::{
    ColumnInsight, DatasetAnalysis, StepRecommendation, analyze_column, analyze_features,
};
pub use preprocessing::{
    MissingStat, PreprocessingSuggestions, QualitySummary, Suggestion, suggest_preprocessing,
};

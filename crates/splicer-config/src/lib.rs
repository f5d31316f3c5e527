// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared configuration services for splicer tools.
//! Keeps storage adapters thin; documents convert into `splicer-core` types.

pub mod concretizer;
pub mod config;
pub mod repository;

pub use concretizer::{
    ConcretizerConfig, ExternalConfig, MatchVariants, PackageConfig, SpliceConfig, CONCRETIZER_KEY,
};
pub use config::{ConfigError, ConfigService, ConfigStore};
pub use repository::{
    DependencyDocument, PackageDocument, RepositoryDocument, SpliceRuleDocument, VariantDefault,
    VariantDocument, REPOSITORY_KEY,
};

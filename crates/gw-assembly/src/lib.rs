//! Model registry and variant-config assembly (spec §4.3): snapshot, plan,
//! diff, apply, and rollback, with routing-state persistence.

mod error;
mod model;
mod service;
mod variants;

pub use error::{AssemblyError, AssemblyResult};
pub use model::{
    diff_channels, sanitize_plan_name, ChannelDiff, Diff, ModelChannels, Plan, PlanBackup,
    PlanInclude, RegistryEntry, VariantConfig,
};
pub use service::AssemblyService;
pub use variants::{generate_variants, generate_variants_for_channel};

// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Brewlog Shared Library
//!
//! Domain types, recipe model and persistence shared by the API server,
//! the billing engine and the background worker.

pub mod convert;
pub mod db;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod recipe;
pub mod store;
pub mod types;

pub use convert::{
    convert_recipe, ConversionError, ConversionTarget, ConvertedRecipe, ConvertedStep,
    MAX_CONVERTED_WATER_ML,
};
pub use db::{create_pool, run_migrations};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use recipe::{
    generate_access_token, NewRecipe, Recipe, RecipeDraft, RecipeId, RecipeStep,
    RecipeValidationError, DEFAULT_SHARE_EXPIRY_DAYS, MAX_MEMO_CHARS, MAX_NAME_CHARS, MAX_STEPS,
};
pub use store::{
    AccountStore, QuotaUsage, RecipeStore, Store, WebhookClaim, WebhookEventStore,
    WEBHOOK_PROCESSING_TIMEOUT_MINUTES,
};
pub use types::{Account, PlanTier, SortOrder, UnknownTier, UserId, Visibility};

//! Recipe model
//!
//! A recipe is a sequence of pour steps. Each step records the elapsed time at
//! which it starts and the **cumulative** water poured up to and including it,
//! so the final step's total is always the recipe's total water.
//!
//! Presets and shares share this one shape; they differ only by [`Visibility`]
//! and by the share-only `access_token` / `expires_at` fields.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::types::{UserId, Visibility};

/// Monotonic row id; higher means created later.
pub type RecipeId = i64;

pub const MAX_NAME_CHARS: usize = 30;
pub const MAX_MEMO_CHARS: usize = 300;
pub const MAX_STEPS: usize = 20;

/// Random bytes in a share access token (hex encoded to 32 chars)
const ACCESS_TOKEN_BYTES: usize = 16;

/// Shares never expire in practice unless a shorter window is requested
pub const DEFAULT_SHARE_EXPIRY_DAYS: i64 = 365 * 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub step_number: i32,
    pub minute: i32,
    pub seconds: i32,
    /// Cumulative water (ml) after this step
    pub total_water_ml: f64,
}

impl RecipeStep {
    pub fn new(step_number: i32, minute: i32, seconds: i32, total_water_ml: f64) -> Self {
        Self {
            step_number,
            minute,
            seconds,
            total_water_ml,
        }
    }

    pub fn elapsed_seconds(&self) -> i32 {
        self.minute * 60 + self.seconds
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecipeValidationError {
    #[error("Recipe name is required")]
    EmptyName,
    #[error("Recipe name must be at most {MAX_NAME_CHARS} characters")]
    NameTooLong,
    #[error("Memo must be at most {MAX_MEMO_CHARS} characters")]
    MemoTooLong,
    #[error("Bean amount must be greater than zero")]
    InvalidBeanAmount,
    #[error("A recipe needs between 1 and {MAX_STEPS} steps")]
    InvalidStepCount,
    #[error("Step {0} is out of order")]
    StepOutOfOrder(i32),
    #[error("Step {0} has an invalid time")]
    InvalidStepTime(i32),
    #[error("Step {0} starts before the previous step")]
    TimeGoesBackwards(i32),
    #[error("Step {0} has an invalid cumulative water amount")]
    InvalidWaterAmount(i32),
    #[error("Step {0} pours less total water than the previous step")]
    WaterGoesBackwards(i32),
    #[error("Ice amount is required for iced recipes")]
    MissingIce,
}

/// User-supplied recipe body, validated before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeDraft {
    pub name: String,
    #[serde(default)]
    pub is_ice: bool,
    #[serde(default)]
    pub ice_g: Option<f64>,
    pub bean_g: f64,
    #[serde(default)]
    pub memo: Option<String>,
    pub steps: Vec<RecipeStep>,
}

impl RecipeDraft {
    pub fn validate(&self) -> Result<(), RecipeValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(RecipeValidationError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(RecipeValidationError::NameTooLong);
        }
        if let Some(memo) = &self.memo {
            if memo.chars().count() > MAX_MEMO_CHARS {
                return Err(RecipeValidationError::MemoTooLong);
            }
        }
        if !(self.bean_g.is_finite() && self.bean_g > 0.0) {
            return Err(RecipeValidationError::InvalidBeanAmount);
        }
        if self.is_ice {
            match self.ice_g {
                Some(ice) if ice.is_finite() && ice >= 0.0 => {}
                _ => return Err(RecipeValidationError::MissingIce),
            }
        }
        if self.steps.is_empty() || self.steps.len() > MAX_STEPS {
            return Err(RecipeValidationError::InvalidStepCount);
        }

        let mut prev: Option<&RecipeStep> = None;
        for (idx, step) in self.steps.iter().enumerate() {
            let n = step.step_number;
            if n != idx as i32 + 1 {
                return Err(RecipeValidationError::StepOutOfOrder(n));
            }
            if !(0..60).contains(&step.minute) || !(0..60).contains(&step.seconds) {
                return Err(RecipeValidationError::InvalidStepTime(n));
            }
            if !(step.total_water_ml.is_finite() && step.total_water_ml > 0.0) {
                return Err(RecipeValidationError::InvalidWaterAmount(n));
            }
            if let Some(p) = prev {
                if step.elapsed_seconds() < p.elapsed_seconds() {
                    return Err(RecipeValidationError::TimeGoesBackwards(n));
                }
                if step.total_water_ml < p.total_water_ml {
                    return Err(RecipeValidationError::WaterGoesBackwards(n));
                }
            }
            prev = Some(step);
        }
        Ok(())
    }

    /// Validate and turn the draft into an insertable record
    pub fn into_new_recipe(
        self,
        owner_id: UserId,
        visibility: Visibility,
    ) -> Result<NewRecipe, RecipeValidationError> {
        self.validate()?;
        let water_ml = self.steps.last().map(|s| s.total_water_ml).unwrap_or_default();
        let (access_token, expires_at) = match visibility {
            Visibility::Private => (None, None),
            Visibility::Shared => (
                Some(generate_access_token()),
                Some(OffsetDateTime::now_utc() + Duration::days(DEFAULT_SHARE_EXPIRY_DAYS)),
            ),
        };
        Ok(NewRecipe {
            owner_id,
            visibility,
            name: self.name.trim().to_string(),
            is_ice: self.is_ice,
            ice_g: if self.is_ice { self.ice_g } else { None },
            bean_g: self.bean_g,
            water_ml,
            memo: self.memo.filter(|m| !m.is_empty()),
            access_token,
            expires_at,
            steps: self.steps,
        })
    }
}

/// Record ready to be inserted; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecipe {
    pub owner_id: UserId,
    pub visibility: Visibility,
    pub name: String,
    pub is_ice: bool,
    pub ice_g: Option<f64>,
    pub bean_g: f64,
    pub water_ml: f64,
    pub memo: Option<String>,
    pub access_token: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub steps: Vec<RecipeStep>,
}

impl NewRecipe {
    /// Override the share expiry window
    pub fn with_expiry_days(mut self, days: i64) -> Self {
        if self.visibility == Visibility::Shared {
            self.expires_at = Some(OffsetDateTime::now_utc() + Duration::days(days));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub owner_id: UserId,
    pub visibility: Visibility,
    pub name: String,
    pub is_ice: bool,
    pub ice_g: Option<f64>,
    pub bean_g: f64,
    pub water_ml: f64,
    pub memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub steps: Vec<RecipeStep>,
}

impl Recipe {
    pub fn len_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    /// Water poured during each step (difference of consecutive cumulative totals)
    pub fn pour_volumes(&self) -> Vec<f64> {
        let mut previous = 0.0;
        self.steps
            .iter()
            .map(|s| {
                let pour = s.total_water_ml - previous;
                previous = s.total_water_ml;
                pour
            })
            .collect()
    }

    /// Water to bean ratio rounded to one decimal (e.g. 15.0 for 1:15)
    pub fn brew_ratio(&self) -> Option<f64> {
        if self.bean_g <= 0.0 {
            return None;
        }
        Some((self.water_ml / self.bean_g * 10.0).round() / 10.0)
    }

    /// Body of this recipe as a draft, used to copy between collections
    pub fn to_draft(&self) -> RecipeDraft {
        RecipeDraft {
            name: self.name.clone(),
            is_ice: self.is_ice,
            ice_g: self.ice_g,
            bean_g: self.bean_g,
            memo: self.memo.clone(),
            steps: self.steps.clone(),
        }
    }
}

/// Generate a 32-character hex share token
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; ACCESS_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn draft() -> RecipeDraft {
        RecipeDraft {
            name: "Morning V60".to_string(),
            is_ice: false,
            ice_g: None,
            bean_g: 15.0,
            memo: None,
            steps: vec![
                RecipeStep::new(1, 0, 0, 40.0),
                RecipeStep::new(2, 0, 45, 120.0),
                RecipeStep::new(3, 1, 30, 225.0),
            ],
        }
    }

    #[test]
    fn test_valid_draft_takes_water_from_last_step() {
        let new = draft()
            .into_new_recipe(Uuid::new_v4(), Visibility::Private)
            .unwrap();
        assert_eq!(new.water_ml, 225.0);
        assert!(new.access_token.is_none());
        assert!(new.expires_at.is_none());
    }

    #[test]
    fn test_shared_draft_gets_token_and_expiry() {
        let new = draft()
            .into_new_recipe(Uuid::new_v4(), Visibility::Shared)
            .unwrap();
        let token = new.access_token.unwrap();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(new.expires_at.unwrap() > OffsetDateTime::now_utc() + Duration::days(365));
    }

    #[test]
    fn test_name_limits() {
        let mut d = draft();
        d.name = "   ".to_string();
        assert_eq!(d.validate(), Err(RecipeValidationError::EmptyName));

        d.name = "a".repeat(MAX_NAME_CHARS);
        assert!(d.validate().is_ok());
        d.name = "a".repeat(MAX_NAME_CHARS + 1);
        assert_eq!(d.validate(), Err(RecipeValidationError::NameTooLong));
    }

    #[test]
    fn test_memo_limit_counts_chars_not_bytes() {
        let mut d = draft();
        d.memo = Some("豆".repeat(MAX_MEMO_CHARS));
        assert!(d.validate().is_ok());
        d.memo = Some("豆".repeat(MAX_MEMO_CHARS + 1));
        assert_eq!(d.validate(), Err(RecipeValidationError::MemoTooLong));
    }

    #[test]
    fn test_step_rules() {
        let mut d = draft();
        d.steps[1].step_number = 5;
        assert_eq!(d.validate(), Err(RecipeValidationError::StepOutOfOrder(5)));

        let mut d = draft();
        d.steps[2].seconds = 60;
        assert_eq!(d.validate(), Err(RecipeValidationError::InvalidStepTime(3)));

        let mut d = draft();
        d.steps[2].minute = 0;
        d.steps[2].seconds = 10;
        assert_eq!(d.validate(), Err(RecipeValidationError::TimeGoesBackwards(3)));

        let mut d = draft();
        d.steps[2].total_water_ml = 100.0;
        assert_eq!(d.validate(), Err(RecipeValidationError::WaterGoesBackwards(3)));

        let mut d = draft();
        d.steps.clear();
        assert_eq!(d.validate(), Err(RecipeValidationError::InvalidStepCount));
    }

    #[test]
    fn test_ice_required_only_for_iced_recipes() {
        let mut d = draft();
        d.is_ice = true;
        assert_eq!(d.validate(), Err(RecipeValidationError::MissingIce));
        d.ice_g = Some(80.0);
        assert!(d.validate().is_ok());

        let mut d = draft();
        d.ice_g = Some(80.0);
        let new = d.into_new_recipe(Uuid::new_v4(), Visibility::Private).unwrap();
        assert_eq!(new.ice_g, None);
    }

    #[test]
    fn test_pour_volumes_and_ratio() {
        let new = draft()
            .into_new_recipe(Uuid::new_v4(), Visibility::Private)
            .unwrap();
        let recipe = Recipe {
            id: 1,
            owner_id: new.owner_id,
            visibility: new.visibility,
            name: new.name,
            is_ice: false,
            ice_g: None,
            bean_g: new.bean_g,
            water_ml: new.water_ml,
            memo: None,
            access_token: None,
            expires_at: None,
            created_at: OffsetDateTime::now_utc(),
            steps: new.steps,
        };
        assert_eq!(recipe.pour_volumes(), vec![40.0, 80.0, 105.0]);
        assert_eq!(recipe.brew_ratio(), Some(15.0));
        assert!(!recipe.is_expired_at(OffsetDateTime::now_utc()));
    }
}

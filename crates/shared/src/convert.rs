//! Recipe scaling
//!
//! Scales a recipe to a new amount of water (or by a fixed magnification),
//! keeping pour timing and the relative shape of the pours. All converted
//! water amounts are truncated to whole millilitres on the cumulative totals
//! first, and per-step pours are then derived from those truncated totals so
//! they always add up to the final total.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recipe::RecipeDraft;

/// Largest amount of water or ice a converted recipe may call for
pub const MAX_CONVERTED_WATER_ML: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConversionTarget {
    /// Multiply every amount by `rate`
    Magnification { rate: f64 },
    /// Aim for a total brew water (ice included) and a bean amount
    Totals { bean_g: f64, water_ml: f64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("Recipe has no steps")]
    NoSteps,
    #[error("Recipe pours no water")]
    NoWater,
    #[error("Conversion rate must be a positive number")]
    InvalidRate,
    #[error("Target amounts must be positive numbers")]
    InvalidTarget,
    #[error("Converted recipe would exceed {MAX_CONVERTED_WATER_ML} ml")]
    TooLarge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedStep {
    pub step_number: i32,
    pub minute: i32,
    pub seconds: i32,
    pub pour_ml: i64,
    pub total_water_ml: i64,
    /// Share of the final total reached after this step, truncated
    pub percentage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertedRecipe {
    pub rate: f64,
    pub bean_g: f64,
    pub water_ml: f64,
    pub ice_g: Option<i64>,
    pub brew_ratio: Option<f64>,
    pub steps: Vec<ConvertedStep>,
}

fn trunc_tenth(v: f64) -> f64 {
    (v * 10.0).trunc() / 10.0
}

pub fn convert_recipe(
    source: &RecipeDraft,
    target: ConversionTarget,
) -> Result<ConvertedRecipe, ConversionError> {
    let last = source.steps.last().ok_or(ConversionError::NoSteps)?;
    let origin_water = last.total_water_ml;
    if !(origin_water.is_finite() && origin_water > 0.0) {
        return Err(ConversionError::NoWater);
    }
    let ice = if source.is_ice {
        source.ice_g.unwrap_or(0.0).max(0.0)
    } else {
        0.0
    };

    let (rate, bean_g) = match target {
        ConversionTarget::Magnification { rate } => (rate, source.bean_g * rate),
        ConversionTarget::Totals { bean_g, water_ml } => {
            if !(bean_g.is_finite() && bean_g > 0.0 && water_ml.is_finite() && water_ml > 0.0) {
                return Err(ConversionError::InvalidTarget);
            }
            (water_ml / (origin_water + ice), bean_g)
        }
    };
    if !(rate.is_finite() && rate > 0.0) {
        return Err(ConversionError::InvalidRate);
    }
    let largest = source
        .steps
        .iter()
        .map(|s| s.total_water_ml.abs())
        .fold(ice, f64::max);
    if !(largest * rate <= MAX_CONVERTED_WATER_ML) {
        return Err(ConversionError::TooLarge);
    }

    let totals: Vec<i64> = source
        .steps
        .iter()
        .map(|s| (s.total_water_ml * rate).trunc() as i64)
        .collect();
    let final_total = totals.last().copied().unwrap_or(0);

    let mut previous = 0;
    let steps = source
        .steps
        .iter()
        .zip(&totals)
        .map(|(s, &total)| {
            let pour_ml = total - previous;
            previous = total;
            let percentage = if final_total > 0 {
                total * 100 / final_total
            } else {
                0
            };
            ConvertedStep {
                step_number: s.step_number,
                minute: s.minute,
                seconds: s.seconds,
                pour_ml,
                total_water_ml: total,
                percentage,
            }
        })
        .collect();

    let bean_g = trunc_tenth(bean_g);
    let water_ml = trunc_tenth(origin_water * rate);
    let brew_ratio = (bean_g > 0.0).then(|| (water_ml / bean_g * 10.0).round() / 10.0);

    Ok(ConvertedRecipe {
        rate,
        bean_g,
        water_ml,
        ice_g: source
            .is_ice
            .then(|| (ice * rate).trunc() as i64),
        brew_ratio,
        steps,
    })
}

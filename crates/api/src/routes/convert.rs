//! Recipe scaling

use axum::Json;
use brewlog_shared::{convert_recipe, ConversionTarget, ConvertedRecipe, RecipeDraft};
use serde::Deserialize;

use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub recipe: RecipeDraft,
    pub target: ConversionTarget,
}

pub async fn convert(Json(req): Json<ConvertRequest>) -> ApiResult<Json<ConvertedRecipe>> {
    req.recipe.validate()?;
    Ok(Json(convert_recipe(&req.recipe, req.target)?))
}

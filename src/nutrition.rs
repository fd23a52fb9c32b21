//! Nutrition lookup client and a local meal log.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::ApiClient;
use crate::error::{ApiError, ConfigError};

/// Nutrition facts for one food, per serving. Missing numbers are zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoodNutrition {
    pub name: String,
    pub category: String,
    pub serving_size: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    /// Where the data came from (`edamam`, `nutritionix`, `local`, `estimated`).
    pub source: String,
}

/// Summed macronutrients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NutrientTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
}

impl NutrientTotals {
    pub fn add(&mut self, food: &FoodNutrition) {
        self.calories += food.calories;
        self.protein += food.protein;
        self.carbs += food.carbs;
        self.fat += food.fat;
        self.fiber += food.fiber;
        self.sugar += food.sugar;
    }
}

/// Server-side analysis of several foods.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MealAnalysis {
    pub food_count: usize,
    pub total_nutrition: MealTotal,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MealTotal {
    #[serde(flatten)]
    pub totals: NutrientTotals,
    pub foods: Vec<FoodNutrition>,
}

/// Body of `GET /nutrition/status`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NutritionStatus {
    pub status: String,
    pub message: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    nutrition: FoodNutrition,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    food_items: &'a [String],
}

/// Client for the nutrition lookup service.
pub struct NutritionClient {
    api: ApiClient,
}

impl NutritionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiClient::new("nutrition", base_url, timeout)?,
        })
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            api: ApiClient::with_client("nutrition", base_url, client),
        }
    }

    pub async fn status(&self) -> Result<NutritionStatus, ApiError> {
        self.api.get_json("/nutrition/status").await
    }

    /// Look up one food by name.
    pub async fn search(&self, query: &str) -> Result<FoodNutrition, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation("Food query is required".to_string()));
        }
        let resp: SearchResponse = self
            .api
            .post_json("/nutrition/search", &SearchRequest { query })
            .await?;
        debug!(query, source = %resp.nutrition.source, "Nutrition found");
        Ok(resp.nutrition)
    }

    pub async fn analyze_meal(&self, food_items: &[String]) -> Result<MealAnalysis, ApiError> {
        if food_items.is_empty() {
            return Err(ApiError::Validation(
                "Food items list is required".to_string(),
            ));
        }
        self.api
            .post_json("/nutrition/analyze-meal", &AnalyzeRequest { food_items })
            .await
    }
}

// ── Meal log ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealEntry {
    pub id: u64,
    pub food: FoodNutrition,
}

/// Foods the user has added to the current meal.
#[derive(Debug, Default)]
pub struct MealLog {
    entries: Vec<MealEntry>,
    next_id: u64,
}

impl MealLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a food and return the id it was given.
    pub fn add(&mut self, food: FoodNutrition) -> u64 {
        self.next_id += 1;
        self.entries.push(MealEntry {
            id: self.next_id,
            food,
        });
        self.next_id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[MealEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn totals(&self) -> NutrientTotals {
        let mut totals = NutrientTotals::default();
        for entry in &self.entries {
            totals.add(&entry.food);
        }
        totals
    }
}

// ── Levels ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nutrient {
    Calories,
    Protein,
    Carbs,
    Fat,
    Fiber,
    Sugar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NutrientLevel {
    Low,
    Moderate,
    High,
}

impl NutrientLevel {
    /// Band a per-serving value. Only calories and the three macros have bands.
    pub fn classify(nutrient: Nutrient, value: f64) -> Option<Self> {
        let (low, high) = match nutrient {
            Nutrient::Calories => (100.0, 400.0),
            Nutrient::Protein => (5.0, 20.0),
            Nutrient::Carbs => (10.0, 40.0),
            Nutrient::Fat => (3.0, 15.0),
            Nutrient::Fiber | Nutrient::Sugar => return None,
        };
        Some(if value < low {
            Self::Low
        } else if value > high {
            Self::High
        } else {
            Self::Moderate
        })
    }
}

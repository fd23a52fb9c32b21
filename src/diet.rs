//! Diet recommendation client and the conversation kept around it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::{ApiError, ConfigError};

/// Canned prompts offered next to the chat box.
pub const QUICK_SUGGESTIONS: [&str; 6] = [
    "I want to lose weight",
    "High protein meals for muscle gain",
    "Quick and easy breakfast ideas",
    "Low carb dinner options",
    "Healthy vegetarian meals",
    "Meals under 400 calories",
];

/// How the service should rank meals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendMethod {
    Content,
    Ingredients,
    #[default]
    Hybrid,
}

/// A recommended meal. Fields the service omits default to empty/zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meal {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub prep_time: f64,
    pub cuisine: String,
    pub ingredients: String,
    pub similarity_score: f64,
}

/// Body of `GET /diet/status`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DietStatus {
    pub status: String,
    pub meals_count: u64,
    pub endpoints: Vec<String>,
}

#[derive(Serialize)]
struct RecommendRequest<'a> {
    query: &'a str,
    ingredients: &'a [String],
    method: RecommendMethod,
}

#[derive(Serialize)]
struct IngredientsRequest<'a> {
    ingredients: &'a [String],
}

#[derive(Deserialize)]
struct RecommendResponse {
    #[serde(default)]
    recommendations: Vec<Meal>,
}

/// Client for the diet recommendation service.
pub struct DietClient {
    api: ApiClient,
}

impl DietClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            api: ApiClient::new("diet", base_url, timeout)?,
        })
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            api: ApiClient::with_client("diet", base_url, client),
        }
    }

    pub async fn status(&self) -> Result<DietStatus, ApiError> {
        self.api.get_json("/diet/status").await
    }

    /// Recommend meals for a free-text query, optionally biased by ingredients on hand.
    pub async fn recommend(
        &self,
        query: &str,
        ingredients: &[String],
        method: RecommendMethod,
    ) -> Result<Vec<Meal>, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation("Query is required".to_string()));
        }
        let resp: RecommendResponse = self
            .api
            .post_json(
                "/diet/recommend",
                &RecommendRequest {
                    query,
                    ingredients,
                    method,
                },
            )
            .await?;
        debug!(query, count = resp.recommendations.len(), "Diet recommendations received");
        Ok(resp.recommendations)
    }

    /// Recipes that use the given ingredients.
    pub async fn by_ingredients(&self, ingredients: &[String]) -> Result<Vec<Meal>, ApiError> {
        if ingredients.is_empty() {
            return Err(ApiError::Validation(
                "Ingredients list is required".to_string(),
            ));
        }
        let resp: RecommendResponse = self
            .api
            .post_json("/diet/ingredients", &IngredientsRequest { ingredients })
            .await?;
        Ok(resp.recommendations)
    }
}

/// Meals shown when the service cannot be reached.
pub fn fallback_meals() -> Vec<Meal> {
    vec![
        Meal {
            id: 1,
            name: "Greek Yogurt Protein Bowl".to_string(),
            description: "High-protein breakfast with Greek yogurt, berries, and almonds".to_string(),
            calories: 320.0,
            protein: 25.0,
            carbs: 30.0,
            fat: 10.0,
            prep_time: 5.0,
            cuisine: "mediterranean".to_string(),
            similarity_score: 0.9,
            ..Meal::default()
        },
        Meal {
            id: 2,
            name: "Grilled Chicken Salad".to_string(),
            description: "Lean protein with fresh vegetables and light dressing".to_string(),
            calories: 450.0,
            protein: 40.0,
            carbs: 25.0,
            fat: 22.0,
            prep_time: 15.0,
            cuisine: "international".to_string(),
            similarity_score: 0.8,
            ..Meal::default()
        },
    ]
}

// ── Conversation ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub content: String,
    pub recommendations: Vec<Meal>,
    /// Recommendations came from `fallback_meals` because the service failed.
    pub fallback: bool,
    pub at: DateTime<Utc>,
}

impl Turn {
    fn user(content: &str) -> Self {
        Self {
            speaker: Speaker::User,
            content: content.to_string(),
            recommendations: Vec::new(),
            fallback: false,
            at: Utc::now(),
        }
    }
}

/// Chat-style recommendation session: a log of turns plus the ingredients on hand.
pub struct DietConversation {
    client: DietClient,
    turns: Vec<Turn>,
    ingredients: Vec<String>,
}

impl DietConversation {
    pub fn new(client: DietClient) -> Self {
        Self {
            client,
            turns: Vec::new(),
            ingredients: Vec::new(),
        }
    }

    pub fn client(&self) -> &DietClient {
        &self.client
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn ingredients(&self) -> &[String] {
        &self.ingredients
    }

    /// Add an ingredient (trimmed, lowercased). Returns false for blanks and duplicates.
    pub fn add_ingredient(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() || self.ingredients.contains(&name) {
            return false;
        }
        self.ingredients.push(name);
        true
    }

    pub fn remove_ingredient(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        let before = self.ingredients.len();
        self.ingredients.retain(|i| *i != name);
        self.ingredients.len() != before
    }

    /// Ask for recommendations. A service failure still produces an answer,
    /// built from the fallback meals.
    pub async fn ask(&mut self, query: &str) -> Result<&Turn, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ApiError::Validation("Query is required".to_string()));
        }
        self.turns.push(Turn::user(query));

        let (recommendations, fallback) = match self
            .client
            .recommend(query, &self.ingredients, RecommendMethod::Hybrid)
            .await
        {
            Ok(recs) => (recs, false),
            Err(e) => {
                warn!("Error getting recommendations, using fallback meals: {e}");
                (fallback_meals(), true)
            }
        };

        self.turns.push(Turn {
            speaker: Speaker::Assistant,
            content: format!(
                "I found {} meal recommendations based on your query: \"{query}\"",
                recommendations.len()
            ),
            recommendations,
            fallback,
            at: Utc::now(),
        });
        Ok(&self.turns[self.turns.len() - 1])
    }
}

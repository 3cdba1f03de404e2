use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::resource::{Resource, SortOrder, WritePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityLevel::Low => write!(f, "low"),
            ActivityLevel::Medium => write!(f, "medium"),
            ActivityLevel::High => write!(f, "high"),
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(ActivityLevel::Low),
            "medium" => Ok(ActivityLevel::Medium),
            "high" => Ok(ActivityLevel::High),
            _ => Err(format!(
                "Invalid activity level '{}'. Valid options: low, medium, high",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthData {
    pub weight: f64,
    pub age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(default)]
    pub activity_level: ActivityLevel,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
}

impl HealthData {
    /// Parse a comma separated restriction list, dropping blanks.
    pub fn parse_restrictions(input: &str) -> Vec<String> {
        input
            .split(',')
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub pet_id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub health_data: HealthData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Pet {
    pub fn new(
        pet_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            pet_id: pet_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            health_data: HealthData::default(),
            created_at: None,
        }
    }
}

impl Resource for Pet {
    const TABLE: &'static str = "pets";
    const ID_COLUMN: &'static str = "pet_id";
    const ORDER: SortOrder = SortOrder::asc("name");
    const POLICY: WritePolicy = WritePolicy::EchoOnly;

    fn id(&self) -> &str {
        &self.pet_id
    }

    fn order(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.name.to_lowercase().cmp(&b.name.to_lowercase())
    }
}

impl fmt::Display for Pet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.health_data;
        write!(
            f,
            "{} - {}kg, {}y, {} activity",
            self.name, h.weight, h.age, h.activity_level
        )?;
        if let Some(breed) = &h.breed {
            write!(f, ", {}", breed)?;
        }
        if !h.dietary_restrictions.is_empty() {
            write!(f, " (avoid: {})", h.dietary_restrictions.join(", "))?;
        }
        Ok(())
    }
}

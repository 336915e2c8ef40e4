use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Subscription plan. Decides the monthly credit allowance and project cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    pub fn credits_per_month(self) -> u32 {
        match self {
            Plan::Free => 10,
            Plan::Pro => 100,
            Plan::Enterprise => 1000,
        }
    }

    /// `None` means unlimited.
    pub fn max_projects(self) -> Option<usize> {
        match self {
            Plan::Free => Some(3),
            Plan::Pro => Some(10),
            Plan::Enterprise => None,
        }
    }

    pub fn features(self) -> &'static [&'static str] {
        match self {
            Plan::Free => &["image_generation"],
            Plan::Pro => &["image_generation", "gif_generation"],
            Plan::Enterprise => &["image_generation", "gif_generation", "priority_support"],
        }
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(format!("unknown plan '{other}' (expected free, pro or enterprise)")),
        }
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A named record with a target calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueItem {
    pub id: u64,

    pub name: String,

    #[serde(rename = "due")]
    pub due_date: NaiveDate,
}

/// Insert payload; the gateway assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDueItem {
    pub name: String,
    pub due_date: NaiveDate,
}

impl NewDueItem {
    pub fn new(name: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            due_date,
        }
    }

    pub fn with_id(self, id: u64) -> DueItem {
        DueItem {
            id,
            name: self.name,
            due_date: self.due_date,
        }
    }
}

/// The full table ordered by due date, ties broken by id.
pub type Snapshot = Vec<DueItem>;

pub fn sort_snapshot(items: &mut [DueItem]) {
    items.sort_by_key(|item| (item.due_date, item.id));
}

pub fn is_blank(name: &str) -> bool {
    name.trim().is_empty()
}

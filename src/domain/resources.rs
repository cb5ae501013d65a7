//! Catalog of the dashboard's server resources.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::ResourceKey;

use super::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Accounts,
    Classes,
    Exams,
    Questions,
    Rooms,
    Schedules,
    Roles,
    Students,
}

impl Resource {
    pub const ALL: [Resource; 8] = [
        Resource::Accounts,
        Resource::Classes,
        Resource::Exams,
        Resource::Questions,
        Resource::Rooms,
        Resource::Schedules,
        Resource::Roles,
        Resource::Students,
    ];

    /// Cache key, also used as the CLI name.
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Accounts => "accounts",
            Resource::Classes => "classes",
            Resource::Exams => "exams",
            Resource::Questions => "questions",
            Resource::Rooms => "rooms",
            Resource::Schedules => "schedules",
            Resource::Roles => "roles",
            Resource::Students => "students",
        }
    }

    pub fn key(self) -> ResourceKey {
        ResourceKey::new(self.as_str())
    }

    /// Collection path relative to the API base URL.
    pub fn path(self) -> &'static str {
        match self {
            Resource::Accounts => "accounts",
            Resource::Classes => "classes",
            Resource::Exams => "exams",
            Resource::Questions => "questions",
            Resource::Rooms => "rooms",
            Resource::Schedules => "exam-schedules",
            Resource::Roles => "roles",
            Resource::Students => "students",
        }
    }

    /// Freshness window override. `None` uses the configured default.
    ///
    /// Reference data changes rarely; exam schedules change often during a
    /// session.
    pub fn stale_after(self) -> Option<Duration> {
        match self {
            Resource::Roles | Resource::Rooms => Some(Duration::from_secs(10 * 60)),
            Resource::Questions => Some(Duration::from_secs(5 * 60)),
            Resource::Schedules => Some(Duration::from_secs(30)),
            _ => None,
        }
    }

    /// Fields the dashboard searches by default.
    pub fn search_fields(self) -> &'static [&'static str] {
        match self {
            Resource::Accounts => &["username", "displayName"],
            Resource::Classes => &["code", "name"],
            Resource::Exams => &["title", "status"],
            Resource::Questions => &["content", "subject"],
            Resource::Rooms => &["name", "location"],
            Resource::Schedules => &["examId", "roomId", "startsAt"],
            Resource::Roles => &["name"],
            Resource::Students => &["studentCode", "fullName", "email"],
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Resource::ALL
            .into_iter()
            .find(|resource| resource.as_str() == normalized)
            .ok_or_else(|| DomainError::unknown_resource(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Students".parse::<Resource>().ok(), Some(Resource::Students));
        assert_eq!(" rooms ".parse::<Resource>().ok(), Some(Resource::Rooms));
        assert!(matches!(
            "grades".parse::<Resource>(),
            Err(DomainError::UnknownResource { name }) if name == "grades"
        ));
    }

    #[test]
    fn keys_are_unique() {
        let mut keys: Vec<ResourceKey> = Resource::ALL.iter().map(|r| r.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), Resource::ALL.len());
    }
}

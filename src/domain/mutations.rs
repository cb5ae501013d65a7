//! The dashboard's writes and the cached resources each one affects.
//!
//! Invalidation sets are listed explicitly per write; nothing is inferred
//! from resource relationships at runtime.

use std::fmt;

use super::resources::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create(Resource),
    Update(Resource),
    Delete(Resource),
    ImportStudents,
}

impl MutationKind {
    /// Resource the write is addressed to.
    pub fn target(self) -> Resource {
        match self {
            MutationKind::Create(resource)
            | MutationKind::Update(resource)
            | MutationKind::Delete(resource) => resource,
            MutationKind::ImportStudents => Resource::Students,
        }
    }

    /// Cached resources that are stale once this write succeeds.
    pub fn invalidates(self) -> &'static [Resource] {
        use Resource::*;

        match self {
            MutationKind::ImportStudents => &[Students, Classes],
            MutationKind::Delete(Classes) => &[Classes, Students, Schedules],
            MutationKind::Delete(Exams) => &[Exams, Schedules],
            MutationKind::Delete(Rooms) => &[Rooms, Schedules],
            MutationKind::Delete(Roles) => &[Roles, Accounts],
            MutationKind::Update(Roles) => &[Roles, Accounts],
            MutationKind::Create(Students) | MutationKind::Update(Students) => {
                &[Students, Classes]
            }
            MutationKind::Create(Schedules)
            | MutationKind::Update(Schedules)
            | MutationKind::Delete(Schedules) => &[Schedules, Exams],
            MutationKind::Create(Questions)
            | MutationKind::Update(Questions)
            | MutationKind::Delete(Questions) => &[Questions, Exams],
            MutationKind::Create(resource)
            | MutationKind::Update(resource)
            | MutationKind::Delete(resource) => single(resource),
        }
    }

    /// Operator-facing text for a successful write.
    pub fn success_message(self) -> String {
        match self {
            MutationKind::Create(resource) => format!("Created {}", singular(resource)),
            MutationKind::Update(resource) => format!("Updated {}", singular(resource)),
            MutationKind::Delete(resource) => format!("Deleted {}", singular(resource)),
            MutationKind::ImportStudents => "Imported students".to_string(),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create(resource) => write!(f, "create_{}", singular(*resource)),
            MutationKind::Update(resource) => write!(f, "update_{}", singular(*resource)),
            MutationKind::Delete(resource) => write!(f, "delete_{}", singular(*resource)),
            MutationKind::ImportStudents => f.write_str("import_students"),
        }
    }
}

fn single(resource: Resource) -> &'static [Resource] {
    match resource {
        Resource::Accounts => &[Resource::Accounts],
        Resource::Classes => &[Resource::Classes],
        Resource::Exams => &[Resource::Exams],
        Resource::Questions => &[Resource::Questions],
        Resource::Rooms => &[Resource::Rooms],
        Resource::Schedules => &[Resource::Schedules],
        Resource::Roles => &[Resource::Roles],
        Resource::Students => &[Resource::Students],
    }
}

fn singular(resource: Resource) -> &'static str {
    match resource {
        Resource::Accounts => "account",
        Resource::Classes => "class",
        Resource::Exams => "exam",
        Resource::Questions => "question",
        Resource::Rooms => "room",
        Resource::Schedules => "schedule",
        Resource::Roles => "role",
        Resource::Students => "student",
    }
}

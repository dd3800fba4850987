//! Mapping from logical Workspace services to the OAuth scopes they need.
//!
//! The registry is an explicit value rather than a global table so that
//! callers (and tests) can build their own. [`ScopeRegistry::google_workspace`]
//! returns the table used by the CLI.

use thiserror::Error;

/// Identity scopes requested on every login so the account email can be read.
pub const BASE_SCOPES: &[&str] = &[
    "openid",
    "https://www.googleapis.com/auth/userinfo.email",
];

const GMAIL: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.settings.basic",
];
const CALENDAR: &[&str] = &["https://www.googleapis.com/auth/calendar"];
const DRIVE: &[&str] = &["https://www.googleapis.com/auth/drive"];
const DOCS: &[&str] = &[
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/drive.file",
];
const SHEETS: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.file",
];
const SLIDES: &[&str] = &[
    "https://www.googleapis.com/auth/presentations",
    "https://www.googleapis.com/auth/drive.file",
];
const TASKS: &[&str] = &["https://www.googleapis.com/auth/tasks"];
const PEOPLE: &[&str] = &[
    "https://www.googleapis.com/auth/contacts",
    "https://www.googleapis.com/auth/directory.readonly",
];
const FORMS: &[&str] = &[
    "https://www.googleapis.com/auth/forms.body",
    "https://www.googleapis.com/auth/forms.responses.readonly",
];
const CHAT: &[&str] = &[
    "https://www.googleapis.com/auth/chat.messages",
    "https://www.googleapis.com/auth/chat.spaces",
];

/// Errors from registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The service name is not in the registry.
    #[error("unknown service '{name}' (known services: {known})")]
    UnknownService { name: String, known: String },
}

/// A single registry row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceScopes {
    name: String,
    scopes: Vec<String>,
}

/// Service name → scope list table.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    services: Vec<ServiceScopes>,
}

impl ScopeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registry of Google Workspace services known to the CLI.
    pub fn google_workspace() -> Self {
        Self::new()
            .with_service("gmail", GMAIL)
            .with_service("calendar", CALENDAR)
            .with_service("drive", DRIVE)
            .with_service("docs", DOCS)
            .with_service("sheets", SHEETS)
            .with_service("slides", SLIDES)
            .with_service("tasks", TASKS)
            .with_service("people", PEOPLE)
            .with_service("forms", FORMS)
            .with_service("chat", CHAT)
    }

    /// Adds (or replaces) a service entry.
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, scopes: &[&str]) -> Self {
        let name = name.into();
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        match self.services.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.scopes = scopes,
            None => self.services.push(ServiceScopes { name, scopes }),
        }
        self
    }

    /// Returns the service names in registration order.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }

    /// Returns true if the service is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }

    /// Returns the scopes of a single service.
    pub fn scopes_for(&self, name: &str) -> Option<&[String]> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.scopes.as_slice())
    }

    /// Unions the scopes of the named services, de-duplicated, first-seen order.
    pub fn scopes_for_services<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, ScopeError> {
        let mut out: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref();
            let scopes = self.scopes_for(name).ok_or_else(|| ScopeError::UnknownService {
                name: name.to_string(),
                known: self.services().collect::<Vec<_>>().join(", "),
            })?;
            push_unique(&mut out, scopes);
        }
        Ok(out)
    }

    /// The superset of every registered scope, used for a full login.
    pub fn all_scopes(&self) -> Vec<String> {
        let mut out = Vec::new();
        for service in &self.services {
            push_unique(&mut out, &service.scopes);
        }
        out
    }

    /// Inverse lookup: the first service that requires `scope`.
    pub fn service_for_scope(&self, scope: &str) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.scopes.iter().any(|candidate| candidate == scope))
            .map(|s| s.name.as_str())
    }

    /// Scopes to request at login: the identity scopes followed by the
    /// services' scopes (or every scope when `services` is empty).
    pub fn login_scopes<S: AsRef<str>>(&self, services: &[S]) -> Result<Vec<String>, ScopeError> {
        let service_scopes = if services.is_empty() {
            self.all_scopes()
        } else {
            self.scopes_for_services(services)?
        };
        let mut out: Vec<String> = BASE_SCOPES.iter().map(|s| s.to_string()).collect();
        push_unique(&mut out, &service_scopes);
        Ok(out)
    }
}

fn push_unique(out: &mut Vec<String>, scopes: &[String]) {
    for scope in scopes {
        if !out.contains(scope) {
            out.push(scope.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_deduplicated_and_ordered() {
        let registry = ScopeRegistry::google_workspace();
        let scopes = registry.scopes_for_services(&["docs", "sheets"]).unwrap();
        assert_eq!(
            scopes,
            vec![
                "https://www.googleapis.com/auth/documents",
                "https://www.googleapis.com/auth/drive.file",
                "https://www.googleapis.com/auth/spreadsheets",
            ]
        );
    }

    #[test]
    fn unknown_service_is_rejected() {
        let registry = ScopeRegistry::google_workspace();
        let err = registry.scopes_for_services(&["gmail", "fax"]).unwrap_err();
        let ScopeError::UnknownService { name, known } = err;
        assert_eq!(name, "fax");
        assert!(known.contains("gmail"));
    }

    #[test]
    fn all_scopes_covers_every_service_once() {
        let registry = ScopeRegistry::google_workspace();
        let all = registry.all_scopes();
        for service in registry.services() {
            for scope in registry.scopes_for(service).unwrap() {
                assert!(all.contains(scope), "{scope} missing");
            }
        }
        let drive_file = all
            .iter()
            .filter(|s| s.ends_with("/drive.file"))
            .count();
        assert_eq!(drive_file, 1);
    }

    #[test]
    fn inverse_lookup() {
        let registry = ScopeRegistry::google_workspace();
        assert_eq!(
            registry.service_for_scope("https://www.googleapis.com/auth/calendar"),
            Some("calendar")
        );
        // drive.file is shared; the first registered owner wins
        assert_eq!(
            registry.service_for_scope("https://www.googleapis.com/auth/drive.file"),
            Some("docs")
        );
        assert_eq!(registry.service_for_scope("openid"), None);
    }

    #[test]
    fn login_scopes_prepend_identity() {
        let registry = ScopeRegistry::google_workspace();
        let scopes = registry.login_scopes(&["calendar"]).unwrap();
        assert_eq!(scopes[..2], ["openid", BASE_SCOPES[1]]);
        assert_eq!(scopes[2], "https://www.googleapis.com/auth/calendar");
        assert_eq!(scopes.len(), 3);

        let full = registry.login_scopes::<&str>(&[]).unwrap();
        assert_eq!(full.len(), BASE_SCOPES.len() + registry.all_scopes().len());
    }

    #[test]
    fn with_service_replaces_existing() {
        let registry = ScopeRegistry::new()
            .with_service("gmail", &["a"])
            .with_service("gmail", &["b"]);
        assert_eq!(registry.services().count(), 1);
        assert_eq!(registry.scopes_for("gmail").unwrap(), ["b".to_string()]);
    }

    #[test]
    fn service_names_snapshot() {
        let registry = ScopeRegistry::google_workspace();
        let names = registry.services().collect::<Vec<_>>().join(",");
        insta::assert_snapshot!(names, @"gmail,calendar,drive,docs,sheets,slides,tasks,people,forms,chat");
    }
}

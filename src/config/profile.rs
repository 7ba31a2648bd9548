// Profile model
//
// A profile is a named, inheritable set of typed properties describing how
// to invoke restic. Property keys, their value types and where they are
// emitted (command-line flag or environment variable) are driven by one
// declarative table instead of ad-hoc key matching.

use crate::schedule;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use thiserror::Error;

/// Value type a property accepts in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Str,
    List,
    Bool,
}

/// Where a resolved property is emitted when building an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// Consumed by resticmate itself, never passed through.
    None,
    /// `--<name>` (with value for strings, repeated for lists, bare for
    /// booleans that are true).
    Flag(&'static str),
    /// Environment variable for the launched process.
    Env(&'static str),
}

/// One row of the property table.
#[derive(Debug, Clone, Copy)]
pub struct PropertySpec {
    pub key: &'static str,
    pub kind: PropertyKind,
    pub emission: Emission,
}

const fn prop(key: &'static str, kind: PropertyKind, emission: Emission) -> PropertySpec {
    PropertySpec {
        key,
        kind,
        emission,
    }
}

use Emission::{Env, Flag};
use PropertyKind::{Bool, List, Str};

/// Every property key resticmate understands. Keys absent from this table
/// are rejected at load time.
pub const PROPERTIES: &[PropertySpec] = &[
    prop("description", Str, Emission::None),
    prop("restic-path", Str, Emission::None),
    prop("command", List, Emission::None),
    prop("args", List, Emission::None),
    prop("flags", List, Emission::None),
    prop("global-flags", List, Emission::None),
    prop("schedule", Str, Emission::None),
    prop("cpu-priority", Str, Emission::None),
    prop("io-priority", Str, Emission::None),
    // Read but currently without effect (reserved)
    prop("wait-for-lock", Str, Emission::None),
    prop("password-keyring", Str, Emission::None),
    prop("repository", Str, Flag("repo")),
    prop("limit-download", Str, Flag("limit-download")),
    prop("limit-upload", Str, Flag("limit-upload")),
    prop("verbose", Str, Flag("verbose")),
    prop("no-cache", Bool, Flag("no-cache")),
    prop("no-lock", Bool, Flag("no-lock")),
    prop("quiet", Bool, Flag("quiet")),
    prop("json", Bool, Flag("json")),
    prop("option", List, Flag("option")),
    prop("repository-file", Str, Env("RESTIC_REPOSITORY_FILE")),
    prop("password", Str, Env("RESTIC_PASSWORD")),
    prop("password-command", Str, Env("RESTIC_PASSWORD_COMMAND")),
    prop("password-file", Str, Env("RESTIC_PASSWORD_FILE")),
    prop("cache-dir", Str, Env("RESTIC_CACHE_DIR")),
    prop("key-hint", Str, Env("RESTIC_KEY_HINT")),
    prop("progress-fps", Str, Env("RESTIC_PROGRESS_FPS")),
    prop("aws-access-key-id", Str, Env("AWS_ACCESS_KEY_ID")),
    prop("aws-secret-access-key", Str, Env("AWS_SECRET_ACCESS_KEY")),
    prop("aws-default-region", Str, Env("AWS_DEFAULT_REGION")),
    prop("st-auth", Str, Env("ST_AUTH")),
    prop("st-user", Str, Env("ST_USER")),
    prop("st-key", Str, Env("ST_KEY")),
    prop("os-auth-url", Str, Env("OS_AUTH_URL")),
    prop("os-region-name", Str, Env("OS_REGION_NAME")),
    prop("os-username", Str, Env("OS_USERNAME")),
    prop("os-password", Str, Env("OS_PASSWORD")),
    prop("os-tenant-id", Str, Env("OS_TENANT_ID")),
    prop("os-tenant-name", Str, Env("OS_TENANT_NAME")),
    prop("os-user-domain-name", Str, Env("OS_USER_DOMAIN_NAME")),
    prop("os-project-name", Str, Env("OS_PROJECT_NAME")),
    prop("os-project-domain-name", Str, Env("OS_PROJECT_DOMAIN_NAME")),
    prop(
        "os-application-credential-id",
        Str,
        Env("OS_APPLICATION_CREDENTIAL_ID"),
    ),
    prop(
        "os-application-credential-name",
        Str,
        Env("OS_APPLICATION_CREDENTIAL_NAME"),
    ),
    prop(
        "os-application-credential-secret",
        Str,
        Env("OS_APPLICATION_CREDENTIAL_SECRET"),
    ),
    prop("os-storage-url", Str, Env("OS_STORAGE_URL")),
    prop("os-auth-token", Str, Env("OS_AUTH_TOKEN")),
    prop("b2-account-id", Str, Env("B2_ACCOUNT_ID")),
    prop("b2-account-key", Str, Env("B2_ACCOUNT_KEY")),
    prop("azure-account-name", Str, Env("AZURE_ACCOUNT_NAME")),
    prop("azure-account-key", Str, Env("AZURE_ACCOUNT_KEY")),
    prop("google-project-id", Str, Env("GOOGLE_PROJECT_ID")),
    prop(
        "google-application-credentials",
        Str,
        Env("GOOGLE_APPLICATION_CREDENTIALS"),
    ),
    prop("rclone-bwlimit", Str, Env("RCLONE_BWLIMIT")),
];

/// Look up a property table row by config key.
pub fn property(key: &str) -> Option<&'static PropertySpec> {
    PROPERTIES.iter().find(|p| p.key == key)
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Bool(bool),
}

#[derive(Debug, Error, PartialEq)]
pub enum PropertyError {
    #[error("unknown property key '{0}'")]
    UnknownKey(String),
    #[error("property '{key}' expects a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}

/// A named profile. Properties explicitly present in the configuration are
/// stored here; everything else falls back to accessor defaults. Presence in
/// `values` is the "explicitly set" marker that drives inheritance
/// precedence: a child value always shadows its parent's, even when it
/// equals the default.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    inherit: Option<String>,
    values: BTreeMap<&'static str, Value>,
    pub last_run: Option<NaiveDateTime>,
    pub next_run: Option<NaiveDateTime>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inherit: None,
            values: BTreeMap::new(),
            last_run: None,
            next_run: None,
        }
    }

    /// Set a property from a raw configuration value, coercing it to the
    /// table kind the way the config format allows: a string stands in for
    /// a list (whitespace-split) or a bool ("true"/"1").
    pub fn set(&mut self, key: &str, raw: Value) -> Result<(), PropertyError> {
        let spec = property(key).ok_or_else(|| PropertyError::UnknownKey(key.to_string()))?;
        let value = match (spec.kind, raw) {
            (PropertyKind::Str, Value::Str(s)) => Value::Str(s),
            (PropertyKind::Str, Value::Bool(b)) => Value::Str(b.to_string()),
            (PropertyKind::List, Value::List(l)) => Value::List(l),
            (PropertyKind::List, Value::Str(s)) => {
                Value::List(s.split_whitespace().map(str::to_string).collect())
            }
            (PropertyKind::Bool, Value::Bool(b)) => Value::Bool(b),
            (PropertyKind::Bool, Value::Str(s)) => Value::Bool(s == "true" || s == "1"),
            (kind, _) => {
                return Err(PropertyError::TypeMismatch {
                    key: key.to_string(),
                    expected: match kind {
                        PropertyKind::Str => "string",
                        PropertyKind::List => "list",
                        PropertyKind::Bool => "boolean",
                    },
                })
            }
        };
        self.values.insert(spec.key, value);
        Ok(())
    }

    /// Whether the key was explicitly set (directly or via inheritance).
    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn str_value(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn list_value(&self, key: &str) -> &[String] {
        match self.values.get(key) {
            Some(Value::List(l)) => l.as_slice(),
            _ => &[],
        }
    }

    // Accessors for the logical properties the engine itself consumes.

    pub fn description(&self) -> &str {
        self.str_value("description").unwrap_or("no description")
    }

    pub fn restic_path(&self) -> &str {
        self.str_value("restic-path").unwrap_or("restic")
    }

    pub fn command(&self) -> &[String] {
        self.list_value("command")
    }

    pub fn args(&self) -> &[String] {
        self.list_value("args")
    }

    pub fn flags(&self) -> &[String] {
        self.list_value("flags")
    }

    pub fn global_flags(&self) -> &[String] {
        self.list_value("global-flags")
    }

    pub fn schedule(&self) -> Option<&str> {
        self.str_value("schedule")
    }

    pub fn repository(&self) -> Option<&str> {
        self.str_value("repository")
    }

    pub fn repository_file(&self) -> Option<&str> {
        self.str_value("repository-file")
    }

    pub fn password_keyring(&self) -> Option<&str> {
        self.str_value("password-keyring")
    }

    pub fn cpu_priority(&self) -> Option<&str> {
        self.str_value("cpu-priority")
    }

    /// Reserved: parsed and inherited, no runtime effect.
    pub fn wait_for_lock(&self) -> Option<&str> {
        self.str_value("wait-for-lock")
    }

    // Inheritance plumbing, driven by the resolver.

    pub fn pending_parent(&self) -> Option<&str> {
        self.inherit.as_deref()
    }

    pub fn set_parent(&mut self, parent: impl Into<String>) {
        self.inherit = Some(parent.into());
    }

    pub fn clear_parent(&mut self) {
        self.inherit = None;
    }

    /// Copy every parent property not explicitly set on this profile.
    pub fn inherit_from(&mut self, parent: &Profile) {
        for (key, value) in &parent.values {
            self.values.entry(*key).or_insert_with(|| value.clone());
        }
    }

    /// A profile is promoted to a schedulable task iff it has a command and
    /// a repository target.
    pub fn is_runnable(&self) -> bool {
        !self.command().is_empty()
            && (self.repository().is_some() || self.repository_file().is_some())
    }

    /// Record a completed (or starting) run and reschedule from it.
    pub fn set_last_run(&mut self, time: NaiveDateTime) {
        self.last_run = Some(time);
        self.next_run = self
            .schedule()
            .and_then(|spec| schedule::next_run(spec, time));
    }

    /// Compute the next run from an arbitrary reference time without
    /// touching `last_run`.
    pub fn find_next_run(&self, from_time: NaiveDateTime) -> Option<NaiveDateTime> {
        self.schedule()
            .and_then(|spec| schedule::next_run(spec, from_time))
    }

    /// Due now?
    pub fn is_pending(&self, now: NaiveDateTime) -> bool {
        matches!(self.next_run, Some(next) if next <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_defaults_without_explicit_values() {
        let p = Profile::new("empty");
        assert_eq!(p.description(), "no description");
        assert_eq!(p.restic_path(), "restic");
        assert!(p.command().is_empty());
        assert!(p.schedule().is_none());
        assert!(!p.is_runnable());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut p = Profile::new("x");
        let err = p.set("no-such-key", Value::Str("v".into())).unwrap_err();
        assert_eq!(err, PropertyError::UnknownKey("no-such-key".into()));
    }

    #[test]
    fn test_string_coerces_to_list_and_bool() {
        let mut p = Profile::new("x");
        p.set("command", Value::Str("backup /home".into())).unwrap();
        assert_eq!(p.command(), ["backup", "/home"]);
        p.set("no-cache", Value::Str("1".into())).unwrap();
        assert_eq!(p.value("no-cache"), Some(&Value::Bool(true)));
        p.set("quiet", Value::Str("yes".into())).unwrap();
        assert_eq!(p.value("quiet"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_list_for_string_key_is_type_mismatch() {
        let mut p = Profile::new("x");
        let err = p
            .set("repository", Value::List(vec!["a".into()]))
            .unwrap_err();
        assert!(matches!(err, PropertyError::TypeMismatch { .. }));
    }

    #[test]
    fn test_runnable_requires_command_and_repository() {
        let mut p = Profile::new("x");
        p.set("command", Value::List(vec!["backup".into()])).unwrap();
        assert!(!p.is_runnable());
        p.set("repository", Value::Str("/srv/repo".into())).unwrap();
        assert!(p.is_runnable());

        let mut q = Profile::new("y");
        q.set("repository-file", Value::Str("/etc/repo".into()))
            .unwrap();
        assert!(!q.is_runnable());
        q.set("command", Value::List(vec!["check".into()])).unwrap();
        assert!(q.is_runnable());
    }

    #[test]
    fn test_child_value_shadows_parent() {
        let mut parent = Profile::new("base");
        parent
            .set("repository", Value::Str("/srv/base".into()))
            .unwrap();
        parent.set("quiet", Value::Bool(true)).unwrap();

        let mut child = Profile::new("child");
        child
            .set("repository", Value::Str("/srv/child".into()))
            .unwrap();
        child.inherit_from(&parent);

        assert_eq!(child.repository(), Some("/srv/child"));
        assert_eq!(child.value("quiet"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_explicit_default_still_shadows() {
        // Child sets restic-path to the default string; the marker must
        // still prevent the parent's value from leaking in.
        let mut parent = Profile::new("base");
        parent
            .set("restic-path", Value::Str("/opt/restic".into()))
            .unwrap();

        let mut child = Profile::new("child");
        child
            .set("restic-path", Value::Str("restic".into()))
            .unwrap();
        child.inherit_from(&parent);

        assert_eq!(child.restic_path(), "restic");
    }

    #[test]
    fn test_set_last_run_reschedules_from_completion() {
        let mut p = Profile::new("x");
        p.set("schedule", Value::Str("14:30".into())).unwrap();
        p.set_last_run(noon());
        assert_eq!(p.last_run, Some(noon()));
        let next = p.next_run.unwrap();
        assert_eq!(
            next,
            NaiveDate::from_ymd_opt(2024, 3, 10)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_no_schedule_never_pending() {
        let mut p = Profile::new("x");
        p.set_last_run(noon());
        assert!(p.next_run.is_none());
        assert!(!p.is_pending(noon()));
    }

    #[test]
    fn test_property_table_has_no_duplicate_keys() {
        for (i, a) in PROPERTIES.iter().enumerate() {
            for b in &PROPERTIES[i + 1..] {
                assert_ne!(a.key, b.key, "duplicate property key {}", a.key);
            }
        }
    }
}

//! Explicit catalogue of check types.
//!
//! Nothing registers itself: [Registry::builtin] lists the probes shipped with this crate and
//! callers add their own with [Registry::register].

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};

use crate::{
    check::{Check, CheckDefinition, ScheduledCheck},
    error::CheckError,
    probe::{http, imap, tcp, winrm},
};

/// Builds an empty, not yet initialised check
pub type Constructor = fn() -> Box<dyn Check>;

fn construct<T: Check + Default + 'static>() -> Box<dyn Check> {
    Box::<T>::default()
}

/// Definitions sorted into admitted checks and the errors of those that were turned away
#[derive(Debug, Default)]
pub struct Admission {
    pub checks: Vec<ScheduledCheck>,
    pub rejected: Vec<CheckError>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    /// A registry knowing no check type
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every probe of this crate
    pub fn builtin() -> Self {
        let builtin: [(&str, Constructor); 4] = [
            (http::CHECK_TYPE, construct::<http::Definition>),
            (imap::CHECK_TYPE, construct::<imap::Definition>),
            (tcp::CHECK_TYPE, construct::<tcp::Definition>),
            (winrm::CHECK_TYPE, construct::<winrm::Definition>),
        ];

        Self {
            constructors: builtin
                .into_iter()
                .map(|(name, constructor)| (name.to_string(), constructor))
                .collect(),
        }
    }

    pub fn register<S: Into<String>>(
        &mut self,
        check_type: S,
        constructor: Constructor,
    ) -> Result<(), CheckError> {
        let check_type = check_type.into();
        if self.constructors.contains_key(&check_type) {
            return Err(CheckError::DuplicateCheckType(check_type));
        }
        debug!("Registering check type {}", check_type);
        self.constructors.insert(check_type, constructor);
        Ok(())
    }

    /// Register a check type built with its [Default] impl
    pub fn register_default<T: Check + Default + 'static, S: Into<String>>(
        &mut self,
        check_type: S,
    ) -> Result<(), CheckError> {
        self.register(check_type, construct::<T>)
    }

    /// Registered type names in sorted order
    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, check_type: &str) -> bool {
        self.constructors.contains_key(check_type)
    }

    /// A new uninitialised check of `check_type`
    pub fn create(&self, check_type: &str) -> Result<Box<dyn Check>, CheckError> {
        self.constructors
            .get(check_type)
            .map(|constructor| constructor())
            .ok_or_else(|| CheckError::UnknownCheckType(check_type.to_string()))
    }

    /// Create and initialise the check described by `definition`
    pub fn load(&self, definition: &CheckDefinition) -> Result<ScheduledCheck, CheckError> {
        let mut check = self.create(&definition.check_type)?;
        let raw = definition
            .raw_definition()
            .map_err(|source| CheckError::Definition {
                id: definition.id.clone(),
                check_type: definition.check_type.clone(),
                source,
            })?;
        check.init(definition.config(), &raw)?;

        debug!(
            "Loaded {} check {}",
            definition.check_type, definition.id
        );
        Ok(ScheduledCheck::new(check).with_timeout(definition.timeout))
    }

    /// Load every definition, failing on the first bad one or the first repeated id
    pub fn load_all<'a, I>(&self, definitions: I) -> Result<Vec<ScheduledCheck>, CheckError>
    where
        I: IntoIterator<Item = &'a CheckDefinition>,
    {
        let mut seen = HashSet::new();
        definitions
            .into_iter()
            .map(|definition| {
                if !seen.insert(definition.id.as_str()) {
                    return Err(CheckError::DuplicateCheckId(definition.id.clone()));
                }
                self.load(definition)
            })
            .collect()
    }

    /// Load every definition, keeping the good ones and collecting the errors of the rest.
    /// A repeated id rejects the later definition only.
    pub fn admit<'a, I>(&self, definitions: I) -> Admission
    where
        I: IntoIterator<Item = &'a CheckDefinition>,
    {
        let mut seen = HashSet::new();
        let mut admission = Admission::default();

        for definition in definitions {
            let loaded = if seen.insert(definition.id.as_str()) {
                self.load(definition)
            } else {
                Err(CheckError::DuplicateCheckId(definition.id.clone()))
            };
            match loaded {
                Ok(check) => admission.checks.push(check),
                Err(err) => admission.rejected.push(err),
            }
        }

        info!(
            "Admitted {} checks, rejected {}",
            admission.checks.len(),
            admission.rejected.len()
        );
        admission
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::check::Problem;

    fn definition(json: &str) -> CheckDefinition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builtin_types_sorted() {
        assert_eq!(
            Registry::builtin().types(),
            vec!["http", "imap", "tcp", "winrm"]
        );
        assert!(Registry::new().types().is_empty());
    }

    #[test]
    fn create_by_name() {
        let registry = Registry::builtin();

        let check = registry.create("imap").unwrap();
        assert_eq!(check.check_type(), "imap");

        assert!(matches!(
            registry.create("ftp"),
            Err(CheckError::UnknownCheckType(name)) if name == "ftp"
        ));
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = Registry::new();
        registry.register_default::<tcp::Definition, _>("port").unwrap();

        assert!(registry.contains("port"));
        assert!(matches!(
            registry.register("port", construct::<http::Definition>),
            Err(CheckError::DuplicateCheckType(name)) if name == "port"
        ));
    }

    #[test]
    fn load_applies_default_port() {
        let registry = Registry::builtin();
        let scheduled = registry
            .load(&definition(
                r#"{"id": "mail-1", "name": "Mail", "type": "imap", "timeout": 2.5,
                    "definition": {"Host": "mail.team1", "Username": "alice", "Password": "secret"}}"#,
            ))
            .unwrap();

        assert_eq!(scheduled.id(), "mail-1");
        assert_eq!(scheduled.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(scheduled.check().check_type(), "imap");
        assert_eq!(scheduled.check().config().score_weight, 1.0);
        assert!(format!("{:?}", scheduled.check()).contains("port: 143"));
    }

    #[test]
    fn load_reports_missing_field() {
        let err = Registry::builtin()
            .load(&definition(
                r#"{"id": "win-1", "name": "Win", "type": "winrm",
                    "definition": {"Host": "win", "Username": "u", "Password": "p"}}"#,
            ))
            .unwrap_err();

        match err {
            CheckError::Validation(err) => {
                assert_eq!(err.field, "Cmd");
                assert_eq!(err.problem, Problem::Missing);
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn load_all_rejects_repeated_ids() {
        let definitions = vec![
            definition(r#"{"id": "a", "name": "A", "type": "tcp", "definition": {"Host": "h"}}"#),
            definition(r#"{"id": "a", "name": "A2", "type": "tcp", "definition": {"Host": "h"}}"#),
        ];

        assert!(matches!(
            Registry::builtin().load_all(&definitions),
            Err(CheckError::DuplicateCheckId(id)) if id == "a"
        ));
    }

    #[test]
    fn admit_keeps_good_checks() {
        let definitions = vec![
            definition(r#"{"id": "a", "name": "A", "type": "tcp", "definition": {"Host": "h"}}"#),
            definition(r#"{"id": "b", "name": "B", "type": "smtp"}"#),
            definition(r#"{"id": "c", "name": "C", "type": "http"}"#),
            definition(r#"{"id": "a", "name": "A2", "type": "tcp", "definition": {"Host": "h"}}"#),
            definition(r#"{"id": "d", "name": "D", "type": "http", "definition": {"Host": "web"}}"#),
        ];

        let admission = Registry::builtin().admit(&definitions);

        let admitted: Vec<_> = admission.checks.iter().map(ScheduledCheck::id).collect();
        assert_eq!(admitted, vec!["a", "d"]);

        let rejected: Vec<_> = admission
            .rejected
            .iter()
            .map(|err| err.to_string())
            .collect();
        assert_eq!(
            rejected,
            vec![
                "Unknown check type `smtp`".to_string(),
                "http check c is missing required field Host".to_string(),
                "Check id `a` is used by more than one definition".to_string(),
            ]
        );
    }
}

//! # Validation Engine
//!
//! Declarative validators run against a model instance before save, built
//! on `regex`/`once_cell` for the format/email validators, and on
//! `model.rs`'s `to_map()` for reading attribute values without per-field
//! static typing.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::model::Model;

/// The save context a validator runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationContext {
    Create,
    Update,
    Save,
}

/// A single `{field, message}` validation failure.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// The rich error collection `valid?` populates.
#[derive(Debug, Clone, Default)]
pub struct Errors {
    items: Vec<FieldError>,
}

impl Errors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.items.push(FieldError { field: field.into(), message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn full_messages(&self) -> Vec<String> {
        self.items.iter().map(|e| format!("{} {}", e.field, e.message)).collect()
    }

    /// All errors attached to `field`.
    pub fn where_field(&self, field: &str) -> Vec<&FieldError> {
        self.items.iter().filter(|e| e.field == field).collect()
    }

    /// All errors on `field` whose message equals `message` exactly.
    pub fn of_type(&self, field: &str, message: &str) -> Vec<&FieldError> {
        self.items.iter().filter(|e| e.field == field && e.message == message).collect()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.items.iter().map(|e| e.field.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn group_by_attribute(&self) -> HashMap<String, Vec<FieldError>> {
        let mut grouped: HashMap<String, Vec<FieldError>> = HashMap::new();
        for e in &self.items {
            grouped.entry(e.field.clone()).or_default().push(e.clone());
        }
        grouped
    }

    pub fn merge(&mut self, other: Errors) {
        self.items.extend(other.items);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.items).unwrap_or(serde_json::Value::Array(vec![]))
    }
}

/// A condition gating whether a validator runs, evaluated against the
/// model's attribute map.
pub type Condition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// One declared validation rule.
pub struct ValidationRule<T> {
    pub field: &'static str,
    pub context: ValidationContext,
    pub if_cond: Option<Condition<T>>,
    pub unless_cond: Option<Condition<T>>,
    validate: Arc<dyn Fn(&T, &str) -> Option<String> + Send + Sync>,
}

impl<T> ValidationRule<T> {
    fn applies(&self, context: ValidationContext, instance: &T) -> bool {
        let context_matches = self.context == ValidationContext::Save || self.context == context;
        if !context_matches {
            return false;
        }
        if let Some(cond) = &self.if_cond {
            if !cond(instance) {
                return false;
            }
        }
        if let Some(cond) = &self.unless_cond {
            if cond(instance) {
                return false;
            }
        }
        true
    }
}

/// Value-read helper: attribute values flow through `Model::to_map()`'s
/// `HashMap<String, String>` snapshot, consistent with dirty tracking.
fn attr<'a>(map: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    map.get(field).map(|s| s.as_str())
}

fn is_blank(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(s) => s.trim().is_empty(),
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email regex is valid"));
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s]+$").expect("static url regex is valid"));

/// Numeric comparison kinds for the `numericality` validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericCheck {
    GreaterThan(i64),
    GreaterThanOrEqual(i64),
    LessThan(i64),
    LessThanOrEqual(i64),
    EqualTo(i64),
    OtherThan(i64),
    Odd,
    Even,
}

/// Registers and runs built-in and custom validators for a single model
/// type. Holds no instance state itself — `validate`
/// reads the instance's `to_map()` each call.
pub struct Validator<T: Model> {
    rules: Vec<ValidationRule<T>>,
}

impl<T: Model> Validator<T> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    fn push(
        &mut self,
        field: &'static str,
        context: ValidationContext,
        check: impl Fn(&T, &str) -> Option<String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.rules.push(ValidationRule {
            field,
            context,
            if_cond: None,
            unless_cond: None,
            validate: Arc::new(check),
        });
        self
    }

    /// Field must be present (non-blank) unless `allow_nil`/`allow_blank`
    /// would have skipped it — presence is the one validator for which
    /// those options are meaningless, since presence *is* the check.
    pub fn validates_presence(&mut self, field: &'static str, context: ValidationContext) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            if is_blank(attr(&map, f)) {
                Some("can't be blank".to_string())
            } else {
                None
            }
        })
    }

    /// Field's trimmed length is within `[min, max]` (either bound optional).
    pub fn validates_length(
        &mut self,
        field: &'static str,
        context: ValidationContext,
        min: Option<usize>,
        max: Option<usize>,
    ) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            let len = value.chars().count();
            if let Some(min) = min {
                if len < min {
                    return Some(format!("is too short (minimum is {} characters)", min));
                }
            }
            if let Some(max) = max {
                if len > max {
                    return Some(format!("is too long (maximum is {} characters)", max));
                }
            }
            None
        })
    }

    /// Field's trimmed length is exactly `exact` characters.
    pub fn validates_length_is(&mut self, field: &'static str, context: ValidationContext, exact: usize) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            if value.chars().count() != exact {
                Some(format!("is the wrong length (should be {} characters)", exact))
            } else {
                None
            }
        })
    }

    /// Field must match `pattern` (or, if `negate`, must not match).
    pub fn validates_format(
        &mut self,
        field: &'static str,
        context: ValidationContext,
        pattern: Regex,
        negate: bool,
    ) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            let matches = pattern.is_match(value);
            if matches == negate {
                Some("is invalid".to_string())
            } else {
                None
            }
        })
    }

    pub fn validates_email(&mut self, field: &'static str, context: ValidationContext) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            if EMAIL_RE.is_match(value) {
                None
            } else {
                Some("is not a valid email address".to_string())
            }
        })
    }

    pub fn validates_url(&mut self, field: &'static str, context: ValidationContext) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            if URL_RE.is_match(value) {
                None
            } else {
                Some("is not a valid URL".to_string())
            }
        })
    }

    pub fn validates_numericality(
        &mut self,
        field: &'static str,
        context: ValidationContext,
        checks: Vec<NumericCheck>,
    ) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let raw = attr(&map, f).unwrap_or("");
            let Ok(value) = raw.parse::<i64>() else {
                return Some("is not a number".to_string());
            };
            for check in &checks {
                let failed = match check {
                    NumericCheck::GreaterThan(n) => value <= *n,
                    NumericCheck::GreaterThanOrEqual(n) => value < *n,
                    NumericCheck::LessThan(n) => value >= *n,
                    NumericCheck::LessThanOrEqual(n) => value > *n,
                    NumericCheck::EqualTo(n) => value != *n,
                    NumericCheck::OtherThan(n) => value == *n,
                    NumericCheck::Odd => value % 2 == 0,
                    NumericCheck::Even => value % 2 != 0,
                };
                if failed {
                    return Some("is not a valid number".to_string());
                }
            }
            None
        })
    }

    /// Field's value must be one of `allowed`.
    pub fn validates_inclusion(
        &mut self,
        field: &'static str,
        context: ValidationContext,
        allowed: Vec<String>,
    ) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            if allowed.iter().any(|a| a == value) {
                None
            } else {
                Some("is not included in the list".to_string())
            }
        })
    }

    /// Field's value must not be any of `disallowed`.
    pub fn validates_exclusion(
        &mut self,
        field: &'static str,
        context: ValidationContext,
        disallowed: Vec<String>,
    ) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            if disallowed.iter().any(|d| d == value) {
                Some("is reserved".to_string())
            } else {
                None
            }
        })
    }

    /// `field` must equal `field_confirmation`, a virtual attribute the
    /// model carries solely for this check.
    pub fn validates_confirmation(&mut self, field: &'static str, context: ValidationContext) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            let confirmation_key = format!("{}_confirmation", f);
            let confirmation = map.get(&confirmation_key).map(|s| s.as_str()).unwrap_or("");
            if value == confirmation {
                None
            } else {
                Some("doesn't match confirmation".to_string())
            }
        })
    }

    /// Field must be truthy (`"true"` or `"1"`) — terms-of-service style
    /// checkboxes.
    pub fn validates_acceptance(&mut self, field: &'static str, context: ValidationContext) -> &mut Self {
        self.push(field, context, move |instance, f| {
            let map = instance.to_map();
            let value = attr(&map, f).unwrap_or("");
            if value == "true" || value == "1" {
                None
            } else {
                Some("must be accepted".to_string())
            }
        })
    }

    /// Adds `if:`/`unless:` conditions to the most recently declared rule.
    pub fn if_cond(&mut self, cond: impl Fn(&T) -> bool + Send + Sync + 'static) -> &mut Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.if_cond = Some(Arc::new(cond));
        }
        self
    }

    pub fn unless_cond(&mut self, cond: impl Fn(&T) -> bool + Send + Sync + 'static) -> &mut Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.unless_cond = Some(Arc::new(cond));
        }
        self
    }

    /// Runs every rule whose context matches, collecting failures into an
    /// `Errors`. Callers wrap this with
    /// `before_validation`/`after_validation` callbacks; this function only
    /// runs the validators themselves.
    pub fn run(&self, instance: &T, context: ValidationContext) -> Errors {
        let mut errors = Errors::new();
        for rule in &self.rules {
            if !rule.applies(context, instance) {
                continue;
            }
            if let Some(message) = (rule.validate)(instance, rule.field) {
                errors.add(rule.field, message);
            }
        }
        errors
    }
}

impl<T: Model> Default for Validator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped uniqueness check: queries whether any *other* row shares `field`'s
/// value, excluding the instance's own primary key on update. Kept separate
/// from `Validator` since it needs database access, unlike every other
/// built-in validator.
pub async fn validate_uniqueness<T>(
    adapter: &crate::adapter::Adapter,
    instance: &T,
    field: &str,
    case_sensitive: bool,
) -> Result<Option<FieldError>, crate::error::Error>
where
    T: Model + for<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> + Send + Unpin,
{
    use crate::model::ColumnValue;
    use crate::query::predicate::Predicate;

    let map = instance.to_map();
    let value = attr(&map, field).unwrap_or("").to_string();

    let predicate = if case_sensitive {
        Predicate::eq(field.to_string(), ColumnValue::Text(value.clone()))
    } else {
        Predicate::ilike(field.to_string(), value.clone())
    };

    let mut query = adapter.model::<T>().filter(predicate);
    let pk_columns = T::primary_key_columns();
    let pk_values = instance.primary_key_values();
    let columns = T::columns();
    for (col, val) in pk_columns.iter().zip(pk_values.iter()) {
        let sql_type = columns.iter().find(|c| &c.name == col).map(|c| c.sql_type).unwrap_or("TEXT");
        query = query.filter(Predicate::not_eq(*col, ColumnValue::from_sql_str(val, sql_type)));
    }

    let exists = query.exists().await?;
    if exists {
        Ok(Some(FieldError { field: field.to_string(), message: "has already been taken".to_string() }))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct User;

    impl Model for User {
        fn table_name() -> &'static str {
            "user"
        }

        fn columns() -> Vec<crate::model::ColumnInfo> {
            vec![]
        }

        fn active_columns() -> Vec<&'static str> {
            vec!["email", "age"]
        }

        fn to_map(&self) -> StdHashMap<String, String> {
            let mut m = StdHashMap::new();
            m.insert("email".to_string(), "not-an-email".to_string());
            m.insert("age".to_string(), "15".to_string());
            m
        }
    }

    #[test]
    fn presence_fails_on_blank() {
        let mut v = Validator::<User>::new();
        v.validates_presence("missing_field", ValidationContext::Save);
        let errors = v.run(&User, ValidationContext::Save);
        assert!(!errors.is_empty());
    }

    #[test]
    fn email_validator_rejects_malformed_address() {
        let mut v = Validator::<User>::new();
        v.validates_email("email", ValidationContext::Save);
        let errors = v.run(&User, ValidationContext::Save);
        assert_eq!(errors.where_field("email").len(), 1);
    }

    #[test]
    fn numericality_enforces_minimum_age() {
        let mut v = Validator::<User>::new();
        v.validates_numericality("age", ValidationContext::Save, vec![NumericCheck::GreaterThanOrEqual(18)]);
        let errors = v.run(&User, ValidationContext::Save);
        assert_eq!(errors.where_field("age").len(), 1);
    }

    #[test]
    fn context_mismatch_skips_rule() {
        let mut v = Validator::<User>::new();
        v.validates_presence("missing_field", ValidationContext::Create);
        let errors = v.run(&User, ValidationContext::Update);
        assert!(errors.is_empty());
    }

    #[test]
    fn errors_group_by_attribute() {
        let mut errors = Errors::new();
        errors.add("email", "is invalid");
        errors.add("email", "has already been taken");
        errors.add("age", "must be 18 or over");
        let grouped = errors.group_by_attribute();
        assert_eq!(grouped.get("email").unwrap().len(), 2);
        assert_eq!(errors.attribute_names(), vec!["age".to_string(), "email".to_string()]);
    }
}

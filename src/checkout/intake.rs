// Buyer-identifying fields collected in the first checkout step.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Email,
    Name,
    Document,
    #[serde(alias = "linkPerfil")]
    Link,
    Phone,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Email, Field::Name, Field::Document, Field::Link, Field::Phone];

    fn required_message(&self) -> &'static str {
        match self {
            Field::Email => "Email é obrigatório",
            Field::Name => "Nome é obrigatório",
            Field::Document => "CPF é obrigatório",
            Field::Link => "Link do perfil é obrigatório",
            Field::Phone => "Celular é obrigatório",
        }
    }
}

const INVALID_EMAIL: &str = "Email inválido";

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^\S+@\S+\.\S+$").expect("static regex"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: BTreeMap<Field, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerIntake {
    pub email: String,
    pub name: String,
    /// Tax id (CPF), free text.
    pub document: String,
    /// Profile or post the package is delivered to.
    pub link: String,
    pub phone: String,
    /// Errors from the last failed step transition, shown next to each field.
    #[serde(skip_deserializing)]
    pub errors: BTreeMap<Field, String>,
}

impl CustomerIntake {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Email => &self.email,
            Field::Name => &self.name,
            Field::Document => &self.document,
            Field::Link => &self.link,
            Field::Phone => &self.phone,
        }
    }

    pub fn update_field(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match field {
            Field::Email => self.email = value,
            Field::Name => self.name = value,
            Field::Document => self.document = value,
            Field::Link => self.link = value,
            Field::Phone => self.phone = value,
        }
        self.errors.remove(&field);
    }

    pub fn validate(&self) -> ValidationReport {
        let mut errors = BTreeMap::new();
        for field in Field::ALL {
            if self.get(field).trim().is_empty() {
                errors.insert(field, field.required_message().to_string());
            }
        }
        if !errors.contains_key(&Field::Email) && !email_pattern().is_match(&self.email) {
            errors.insert(Field::Email, INVALID_EMAIL.to_string());
        }
        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// `(first_name, last_name)` split on the first whitespace run.
    pub fn split_name(&self) -> (String, String) {
        let trimmed = self.name.trim();
        match trimmed.split_once(char::is_whitespace) {
            Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
            None => (trimmed.to_string(), String::new()),
        }
    }
}

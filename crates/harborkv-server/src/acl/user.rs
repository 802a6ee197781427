use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordKind {
    Plaintext,
    Sha256,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Password {
    pub kind: PasswordKind,
    pub value: String,
}

impl Password {
    pub fn plaintext(value: impl Into<String>) -> Self {
        Self {
            kind: PasswordKind::Plaintext,
            value: value.into(),
        }
    }

    pub fn sha256(digest: impl Into<String>) -> Self {
        Self {
            kind: PasswordKind::Sha256,
            value: digest.into().to_ascii_lowercase(),
        }
    }
}

/// A registry user and its permissions. Directive parsing appends to the
/// raw lists; `normalize` establishes the documented invariants afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub username: String,
    pub enabled: bool,
    pub no_password: bool,
    pub no_keys: bool,
    pub passwords: Vec<Password>,
    pub included_categories: Vec<String>,
    pub excluded_categories: Vec<String>,
    pub included_commands: Vec<String>,
    pub excluded_commands: Vec<String>,
    pub included_read_keys: Vec<String>,
    pub included_write_keys: Vec<String>,
    pub included_pubsub_channels: Vec<String>,
    pub excluded_pubsub_channels: Vec<String>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            username: String::new(),
            enabled: true,
            no_password: false,
            no_keys: false,
            passwords: Vec::new(),
            included_categories: Vec::new(),
            excluded_categories: Vec::new(),
            included_commands: Vec::new(),
            excluded_commands: Vec::new(),
            included_read_keys: Vec::new(),
            included_write_keys: Vec::new(),
            included_pubsub_channels: Vec::new(),
            excluded_pubsub_channels: Vec::new(),
        }
    }
}

fn dedupe(list: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    list.retain(|item| seen.insert(item.clone()));
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// Apply one `ACL SETUSER` directive.
    pub fn apply_directive(&mut self, directive: &str) -> Result<(), ServerError> {
        match directive {
            "on" => self.enabled = true,
            "off" => self.enabled = false,
            "nopass" => {
                self.passwords.clear();
                self.no_password = true;
            }
            "resetpass" => {
                self.passwords.clear();
                self.no_password = false;
            }
            "allcommands" => {
                self.included_commands = vec!["*".to_string()];
                self.excluded_commands.clear();
            }
            "nocommands" => {
                self.included_commands.clear();
                self.excluded_commands = vec!["*".to_string()];
            }
            "allcategories" => {
                self.included_categories = vec!["*".to_string()];
                self.excluded_categories.clear();
            }
            "allchannels" => {
                self.included_pubsub_channels = vec!["*".to_string()];
                self.excluded_pubsub_channels.clear();
            }
            "resetchannels" => {
                self.included_pubsub_channels.clear();
                self.excluded_pubsub_channels = vec!["*".to_string()];
            }
            "resetkeys" => {
                self.no_keys = true;
                self.included_read_keys.clear();
                self.included_write_keys.clear();
            }
            d if d.starts_with('>') => {
                self.passwords.push(Password::plaintext(&d[1..]));
                self.no_password = false;
            }
            d if d.starts_with('#') => {
                let digest = &d[1..];
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ServerError::Value(format!(
                        "{digest} is not a valid sha256 digest"
                    )));
                }
                self.passwords.push(Password::sha256(digest));
                self.no_password = false;
            }
            d if d.starts_with('<') => {
                let pwd = &d[1..];
                self.passwords
                    .retain(|p| !(p.kind == PasswordKind::Plaintext && p.value == pwd));
            }
            d if d.starts_with('!') => {
                let digest = d[1..].to_ascii_lowercase();
                self.passwords
                    .retain(|p| !(p.kind == PasswordKind::Sha256 && p.value == digest));
            }
            d if d.starts_with("+@") => self.included_categories.push(d[2..].to_string()),
            d if d.starts_with("-@") => self.excluded_categories.push(d[2..].to_string()),
            d if d.starts_with("+&") => self.included_pubsub_channels.push(d[2..].to_string()),
            d if d.starts_with("-&") => self.excluded_pubsub_channels.push(d[2..].to_string()),
            d if d.starts_with('+') => self.included_commands.push(d[1..].to_lowercase()),
            d if d.starts_with('-') => self.excluded_commands.push(d[1..].to_lowercase()),
            d if d.starts_with('~') => {
                self.no_keys = false;
                self.included_read_keys.push(d[1..].to_string());
                self.included_write_keys.push(d[1..].to_string());
            }
            d if d.starts_with("%RW~") => {
                self.no_keys = false;
                self.included_read_keys.push(d[4..].to_string());
                self.included_write_keys.push(d[4..].to_string());
            }
            d if d.starts_with("%R~") => {
                self.no_keys = false;
                self.included_read_keys.push(d[3..].to_string());
            }
            d if d.starts_with("%W~") => {
                self.no_keys = false;
                self.included_write_keys.push(d[3..].to_string());
            }
            other => {
                return Err(ServerError::Value(format!(
                    "unknown ACL directive {other}"
                )))
            }
        }
        Ok(())
    }

    /// Establish the permission-list invariants:
    /// - a `"*"` in an excluded list wins: the included list is emptied;
    /// - an empty included list (commands/categories/channels) means allow
    ///   all, i.e. `["*"]`;
    /// - key lists stay empty only for `no_keys` users, otherwise `["*"]`.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.included_categories,
            &mut self.excluded_categories,
            &mut self.included_commands,
            &mut self.excluded_commands,
            &mut self.included_read_keys,
            &mut self.included_write_keys,
            &mut self.included_pubsub_channels,
            &mut self.excluded_pubsub_channels,
        ] {
            dedupe(list);
        }

        if self.excluded_categories.iter().any(|c| c == "*") {
            self.included_categories.clear();
        } else if self.included_categories.is_empty() {
            self.included_categories.push("*".to_string());
        }

        if self.excluded_commands.iter().any(|c| c == "*") {
            self.included_commands.clear();
        } else if self.included_commands.is_empty() {
            self.included_commands.push("*".to_string());
        }

        if self.excluded_pubsub_channels.iter().any(|c| c == "*") {
            self.included_pubsub_channels.clear();
        } else if self.included_pubsub_channels.is_empty() {
            self.included_pubsub_channels.push("*".to_string());
        }

        if self.included_read_keys.is_empty() && self.included_write_keys.is_empty() {
            if !self.no_keys {
                self.included_read_keys.push("*".to_string());
                self.included_write_keys.push("*".to_string());
            }
        } else {
            self.no_keys = false;
        }
    }
}

pub mod user;

use std::path::Path;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::errors::ServerError;

pub use user::{Password, PasswordKind, User};

/// The on-disk bootstrap file (`HARBORKV_ACL_CONFIG`), JSON or YAML.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AclUsersFile {
    pub users: Vec<User>,
}

/// Per-connection identity as tracked by the registry.
#[derive(Debug, Clone)]
pub struct ConnIdentity {
    pub username: String,
    pub authenticated: bool,
}

/// Everything a command needs authorized, extracted before dispatch.
pub struct AuthzRequest<'a> {
    pub command: &'a str,
    pub subcommand: Option<&'a str>,
    pub categories: &'a [&'a str],
    pub read_keys: &'a [String],
    pub write_keys: &'a [String],
    pub channels: &'a [String],
}

/// User registry, per-connection identity, and command authorization.
pub struct Acl {
    users: RwLock<Vec<User>>,
    connections: DashMap<u64, ConnIdentity>,
    require_pass: bool,
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

impl Acl {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let mut default_user = User::new("default");
        default_user.no_password = !cfg.require_pass;
        if cfg.require_pass && !cfg.password.is_empty() {
            default_user.passwords.push(Password::plaintext(&cfg.password));
        }
        default_user.normalize();

        let acl = Self {
            users: RwLock::new(vec![default_user]),
            connections: DashMap::new(),
            require_pass: cfg.require_pass,
        };
        if let Some(path) = &cfg.acl_config {
            acl.load_file(path)?;
        }
        Ok(acl)
    }

    /// Merge users from a JSON or YAML file, keyed on extension.
    pub fn load_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        use anyhow::Context;
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading ACL file {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let file: AclUsersFile = if is_yaml {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing ACL file {}", path.display()))?
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing ACL file {}", path.display()))?
        };
        let mut users = self.users.write();
        for mut loaded in file.users {
            loaded.normalize();
            match users.iter_mut().find(|u| u.username == loaded.username) {
                Some(existing) => *existing = loaded,
                None => users.push(loaded),
            }
        }
        tracing::info!(count = users.len(), "loaded ACL users");
        Ok(())
    }

    pub fn register_connection(&self, conn_id: u64) {
        let authenticated = {
            let users = self.users.read();
            users
                .iter()
                .find(|u| u.username == "default")
                .map(|u| u.no_password)
                .unwrap_or(false)
        };
        self.connections.insert(
            conn_id,
            ConnIdentity {
                username: "default".to_string(),
                authenticated,
            },
        );
    }

    pub fn remove_connection(&self, conn_id: u64) {
        self.connections.remove(&conn_id);
    }

    pub fn identity(&self, conn_id: u64) -> Option<ConnIdentity> {
        self.connections.get(&conn_id).map(|e| e.clone())
    }

    pub fn whoami(&self, conn_id: u64) -> String {
        self.identity(conn_id)
            .map(|i| i.username)
            .unwrap_or_else(|| "default".to_string())
    }

    /// `AUTH <password>` or `AUTH <username> <password>`.
    pub fn authenticate_connection(
        &self,
        conn_id: u64,
        argv: &[String],
    ) -> Result<(), ServerError> {
        let (username, password) = match argv {
            [_, password] => ("default", password.as_str()),
            [_, username, password] => (username.as_str(), password.as_str()),
            _ => return Err(ServerError::WrongArgs("auth")),
        };

        let users = self.users.read();
        let user = users
            .iter()
            .find(|u| u.username == username)
            .ok_or_else(|| ServerError::NoSuchUser(username.to_string()))?;
        if !user.enabled {
            return Err(ServerError::UserDisabled(username.to_string()));
        }

        let digest = sha256_hex(password);
        let matched = user.no_password
            || user.passwords.iter().any(|p| match p.kind {
                PasswordKind::Plaintext => p.value == password,
                PasswordKind::Sha256 => p.value == digest,
            });
        if !matched {
            return Err(ServerError::AuthFailed);
        }

        drop(users);
        self.connections.insert(
            conn_id,
            ConnIdentity {
                username: username.to_string(),
                authenticated: true,
            },
        );
        Ok(())
    }

    /// `ACL SETUSER <name> <directive>...` — creates or updates, then
    /// normalizes.
    pub fn set_user(&self, argv: &[String]) -> Result<(), ServerError> {
        let [username, directives @ ..] = argv else {
            return Err(ServerError::WrongArgs("acl setuser"));
        };
        let mut users = self.users.write();
        let pos = match users.iter().position(|u| u.username == *username) {
            Some(pos) => pos,
            None => {
                users.push(User::new(username.clone()));
                users.len() - 1
            }
        };
        let user = &mut users[pos];
        for directive in directives {
            user.apply_directive(directive)?;
        }
        user.normalize();
        Ok(())
    }

    /// Delete users by name; `default` is silently skipped. Returns the
    /// connection ids that must be dropped because their user is gone.
    pub fn delete_users(&self, usernames: &[String]) -> Vec<u64> {
        let mut dropped = Vec::new();
        let mut users = self.users.write();
        for username in usernames {
            if username == "default" {
                continue;
            }
            let Some(pos) = users.iter().position(|u| u.username == *username) else {
                continue;
            };
            users.remove(pos);
            for entry in self.connections.iter() {
                if entry.value().username == *username {
                    dropped.push(*entry.key());
                }
            }
        }
        dropped
    }

    pub fn get_user(&self, username: &str) -> Option<User> {
        self.users.read().iter().find(|u| u.username == username).cloned()
    }

    pub fn list_users(&self) -> Vec<String> {
        self.users.read().iter().map(|u| u.username.clone()).collect()
    }

    /// Enforce, in order: authentication, command, categories, keys,
    /// channels. AUTH itself is always allowed so clients can log in.
    pub fn authorize_connection(
        &self,
        conn_id: u64,
        req: &AuthzRequest<'_>,
    ) -> Result<(), ServerError> {
        if req.command.eq_ignore_ascii_case("auth") {
            return Ok(());
        }
        let identity = self
            .identity(conn_id)
            .ok_or(ServerError::AuthRequired)?;
        if self.require_pass && !identity.authenticated {
            return Err(ServerError::AuthRequired);
        }

        let users = self.users.read();
        let user = users
            .iter()
            .find(|u| u.username == identity.username)
            .ok_or_else(|| ServerError::NoSuchUser(identity.username.clone()))?;

        let command = req.command.to_lowercase();
        let qualified = match req.subcommand {
            Some(sub) => format!("{command}|{}", sub.to_lowercase()),
            None => command.clone(),
        };
        let cmd_allowed = user
            .included_commands
            .iter()
            .any(|c| c == "*" || *c == command || *c == qualified);
        let cmd_denied = user
            .excluded_commands
            .iter()
            .any(|c| c == "*" || *c == command || *c == qualified);
        if !cmd_allowed || cmd_denied {
            return Err(ServerError::AccessDenied(format!(
                "user {} has no access to command {qualified}",
                user.username
            )));
        }

        for category in req.categories {
            let allowed = user
                .included_categories
                .iter()
                .any(|c| c == "*" || c == category);
            let denied = user.excluded_categories.iter().any(|c| c == category);
            if !allowed || denied {
                return Err(ServerError::AccessDenied(format!(
                    "user {} has no access to category {category}",
                    user.username
                )));
            }
        }

        for key in req.read_keys {
            if !self.match_any(&user.included_read_keys, key) {
                return Err(ServerError::AccessDenied(format!(
                    "user {} cannot read key {key}",
                    user.username
                )));
            }
        }
        for key in req.write_keys {
            if !self.match_any(&user.included_write_keys, key) {
                return Err(ServerError::AccessDenied(format!(
                    "user {} cannot write key {key}",
                    user.username
                )));
            }
        }

        for channel in req.channels {
            if !self.match_any(&user.included_pubsub_channels, channel)
                || self.match_any(&user.excluded_pubsub_channels, channel)
            {
                return Err(ServerError::AccessDenied(format!(
                    "user {} has no access to channel {channel}",
                    user.username
                )));
            }
        }

        Ok(())
    }

    fn match_any(&self, patterns: &[String], text: &str) -> bool {
        patterns.iter().any(|p| crate::glob::glob_match(p, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl() -> Acl {
        Acl::new(&Config::default()).unwrap()
    }

    fn acl_with_pass(password: &str) -> Acl {
        let cfg = Config {
            require_pass: true,
            password: password.to_string(),
            ..Config::default()
        };
        Acl::new(&cfg).unwrap()
    }

    fn authz<'a>(
        command: &'a str,
        categories: &'a [&'a str],
        read_keys: &'a [String],
        write_keys: &'a [String],
    ) -> AuthzRequest<'a> {
        AuthzRequest {
            command,
            subcommand: None,
            categories,
            read_keys,
            write_keys,
            channels: &[],
        }
    }

    #[test]
    fn default_user_auth_with_plaintext_password() {
        let acl = acl_with_pass("password1");
        acl.register_connection(1);
        assert!(!acl.identity(1).unwrap().authenticated);

        let err = acl
            .authenticate_connection(1, &["AUTH".into(), "wrong".into()])
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthFailed));

        acl.authenticate_connection(1, &["AUTH".into(), "password1".into()])
            .unwrap();
        assert!(acl.identity(1).unwrap().authenticated);
    }

    #[test]
    fn sha256_passwords_match_by_digest() {
        let acl = acl();
        let digest = sha256_hex("p5");
        acl.set_user(&["u1".into(), "on".into(), format!("#{digest}")])
            .unwrap();
        acl.register_connection(7);
        acl.authenticate_connection(7, &["AUTH".into(), "u1".into(), "p5".into()])
            .unwrap();
        assert_eq!(acl.whoami(7), "u1");
    }

    #[test]
    fn disabled_user_cannot_authenticate() {
        let acl = acl();
        acl.set_user(&["disabled_user".into(), "off".into(), ">p5".into()])
            .unwrap();
        acl.register_connection(2);
        let err = acl
            .authenticate_connection(2, &["AUTH".into(), "disabled_user".into(), "p5".into()])
            .unwrap_err();
        assert_eq!(err.to_string(), "user disabled_user is disabled");
    }

    #[test]
    fn unknown_user_is_rejected() {
        let acl = acl();
        acl.register_connection(3);
        let err = acl
            .authenticate_connection(3, &["AUTH".into(), "ghost".into(), "x".into()])
            .unwrap_err();
        assert!(matches!(err, ServerError::NoSuchUser(_)));
    }

    #[test]
    fn key_grants_split_read_and_write() {
        let acl = acl();
        acl.set_user(&[
            "u1".into(),
            "on".into(),
            "nopass".into(),
            "~k1".into(),
            "%R~k2".into(),
            "%W~k3".into(),
        ])
        .unwrap();
        acl.register_connection(4);
        acl.authenticate_connection(4, &["AUTH".into(), "u1".into(), "".into()])
            .unwrap();

        let read = |key: &str| {
            let keys = vec![key.to_string()];
            acl.authorize_connection(4, &authz("get", &["read"], &keys, &[]))
        };
        let write = |key: &str| {
            let keys = vec![key.to_string()];
            acl.authorize_connection(4, &authz("set", &["write"], &[], &keys))
        };

        assert!(read("k1").is_ok());
        assert!(read("k2").is_ok());
        assert!(write("k1").is_ok());
        assert!(write("k3").is_ok());
        assert!(matches!(read("k3"), Err(ServerError::AccessDenied(_))));
        assert!(matches!(write("k2"), Err(ServerError::AccessDenied(_))));
    }

    #[test]
    fn category_exclusion_denies() {
        let acl = acl();
        acl.set_user(&[
            "reader".into(),
            "on".into(),
            "nopass".into(),
            "-@write".into(),
        ])
        .unwrap();
        acl.register_connection(5);
        acl.authenticate_connection(5, &["AUTH".into(), "reader".into(), "".into()])
            .unwrap();

        assert!(acl
            .authorize_connection(5, &authz("get", &["read", "fast"], &[], &[]))
            .is_ok());
        assert!(matches!(
            acl.authorize_connection(5, &authz("set", &["write"], &[], &[])),
            Err(ServerError::AccessDenied(_))
        ));
    }

    #[test]
    fn channel_patterns_gate_pubsub() {
        let acl = acl();
        acl.set_user(&[
            "sub".into(),
            "on".into(),
            "nopass".into(),
            "+&news.*".into(),
            "-&news.secret".into(),
        ])
        .unwrap();
        acl.register_connection(6);
        acl.authenticate_connection(6, &["AUTH".into(), "sub".into(), "".into()])
            .unwrap();

        let ok_chan = vec!["news.daily".to_string()];
        let bad_chan = vec!["news.secret".to_string()];
        let req = |channels: &[String]| -> Result<(), ServerError> {
            acl.authorize_connection(
                6,
                &AuthzRequest {
                    command: "subscribe",
                    subcommand: None,
                    categories: &["pubsub"],
                    read_keys: &[],
                    write_keys: &[],
                    channels,
                },
            )
        };
        assert!(req(&ok_chan).is_ok());
        assert!(matches!(req(&bad_chan), Err(ServerError::AccessDenied(_))));
    }

    #[test]
    fn unauthenticated_connection_is_rejected_when_pass_required() {
        let acl = acl_with_pass("pw");
        acl.register_connection(9);
        let err = acl
            .authorize_connection(9, &authz("get", &["read"], &[], &[]))
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthRequired));
        // AUTH is exempt so the client can actually log in.
        assert!(acl
            .authorize_connection(9, &authz("auth", &["connection"], &[], &[]))
            .is_ok());
    }

    #[test]
    fn deluser_skips_default_and_reports_connections() {
        let acl = acl();
        acl.set_user(&["u1".into(), "on".into(), "nopass".into()]).unwrap();
        acl.set_user(&["u2".into(), "on".into(), "nopass".into()]).unwrap();
        acl.register_connection(10);
        acl.authenticate_connection(10, &["AUTH".into(), "u1".into(), "".into()])
            .unwrap();

        let dropped =
            acl.delete_users(&["default".into(), "u1".into(), "u2".into(), "nope".into()]);
        assert_eq!(dropped, vec![10]);
        assert!(acl.get_user("default").is_some());
        assert!(acl.get_user("u1").is_none());
        assert!(acl.get_user("u2").is_none());
    }
}

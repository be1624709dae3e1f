use anyhow::Context;
use hashbrown::HashMap;
use serde::Deserialize;
use std::path::Path;

/// The shared account the proxy presents to the upstream server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub proxy_user: String,
    pub proxy_pass: String,
}

/// End-user credentials, `username -> cleartext password`. Lookups are
/// case-sensitive exact matches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserDirectory {
    accounts: HashMap<String, String>,
}

impl UserDirectory {
    pub fn from_accounts<I, K, V>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            accounts: accounts
                .into_iter()
                .map(|(user, password)| (user.into(), password.into()))
                .collect(),
        }
    }

    pub fn password_for(&self, username: &str) -> Option<&str> {
        self.accounts.get(username).map(String::as_str)
    }
}

/// Both credential tables, read once at startup and shared immutably across
/// sessions. There is no reload path.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub service: ServiceAccount,
    pub users: UserDirectory,
}

impl Credentials {
    pub fn load(
        service_account_file: impl AsRef<Path>,
        user_file: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            service: read_json(service_account_file.as_ref())?,
            users: read_json(user_file.as_ref())?,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading credential file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing credential file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_both_credential_files() {
        let svc = write_temp(r#"{"proxy_user": "svc", "proxy_pass": "svcpw"}"#);
        let users = write_temp(r#"{"accounts": {"alice": "alicepw", "bob": "bobpw"}}"#);

        let credentials = Credentials::load(svc.path(), users.path()).unwrap();
        assert_eq!(credentials.service.proxy_user, "svc");
        assert_eq!(credentials.users.password_for("alice"), Some("alicepw"));
        assert_eq!(credentials.users.password_for("mallory"), None);
        // lookups are case-sensitive
        assert_eq!(credentials.users.password_for("Alice"), None);
    }

    #[test]
    fn malformed_json_is_fatal() {
        let svc = write_temp(r#"{"proxy_user": "svc"#);
        let users = write_temp(r#"{"accounts": {}}"#);
        assert!(Credentials::load(svc.path(), users.path()).is_err());
    }

    #[test]
    fn missing_file_is_fatal() {
        let users = write_temp(r#"{"accounts": {}}"#);
        assert!(Credentials::load("/nonexistent/acct.json", users.path()).is_err());
    }
}

//! Multi-server directory (LDAP style) client.
//!
//! Servers are tried in configuration order, one at a time. The wire
//! protocol lives behind [`DirectoryConnector`]; this module only owns the
//! iteration policy and connection lifetimes.

use async_trait::async_trait;
use secrecy::Secret;
use serde::Deserialize;
use std::sync::Arc;

use super::error::DirectoryError;
use crate::config::DirectoryConfig;
use crate::models::{ExternalUserInfo, LoginQuery};

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub bind_dn: String,
    #[serde(default)]
    pub bind_password: Option<Secret<String>>,
    #[serde(default)]
    pub search_filter: String,
    #[serde(default)]
    pub search_base_dns: Vec<String>,
}

fn default_port() -> u16 {
    389
}

/// One open connection to a directory server.
#[async_trait]
pub trait DirectoryConnection: Send {
    async fn bind(&mut self) -> Result<(), DirectoryError>;

    /// `Ok(None)` means the server does not know the user.
    async fn login(&mut self, query: &LoginQuery)
        -> Result<Option<ExternalUserInfo>, DirectoryError>;

    async fn users(&mut self, logins: &[String]) -> Result<Vec<ExternalUserInfo>, DirectoryError>;

    fn close(&mut self);
}

/// Opens connections to a single server.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn dial(
        &self,
        config: &DirectoryServerConfig,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError>;
}

/// Connection that is closed when it goes out of scope, whatever path the
/// caller leaves by.
struct ScopedConnection(Box<dyn DirectoryConnection>);

impl std::ops::Deref for ScopedConnection {
    type Target = Box<dyn DirectoryConnection>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for ScopedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub host: String,
    pub port: u16,
    pub available: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn login(&self, query: &LoginQuery) -> Result<ExternalUserInfo, DirectoryError>;
    async fn user(&self, login: &str) -> Result<ExternalUserInfo, DirectoryError>;
    async fn users(&self, logins: &[String]) -> Result<Vec<ExternalUserInfo>, DirectoryError>;
    async fn ping(&self) -> Result<Vec<ServerStatus>, DirectoryError>;
}

pub struct MultiDirectory {
    servers: Vec<DirectoryServerConfig>,
    connector: Arc<dyn DirectoryConnector>,
}

impl MultiDirectory {
    pub fn new(servers: Vec<DirectoryServerConfig>, connector: Arc<dyn DirectoryConnector>) -> Self {
        Self { servers, connector }
    }

    /// Dials `config`. A failure is returned only for the last server so the
    /// others still get a chance; otherwise it is logged and `None` comes back.
    async fn dial(
        &self,
        index: usize,
        config: &DirectoryServerConfig,
    ) -> Result<Option<ScopedConnection>, DirectoryError> {
        match self.connector.dial(config).await {
            Ok(conn) => Ok(Some(ScopedConnection(conn))),
            Err(e) => {
                tracing::error!(
                    host = %config.host,
                    port = config.port,
                    error = %e,
                    "Unable to dial directory server"
                );
                if index == self.servers.len() - 1 {
                    Err(e)
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[async_trait]
impl DirectoryClient for MultiDirectory {
    async fn login(&self, query: &LoginQuery) -> Result<ExternalUserInfo, DirectoryError> {
        if self.servers.is_empty() {
            return Err(DirectoryError::NoServers);
        }

        for (index, config) in self.servers.iter().enumerate() {
            let Some(mut conn) = self.dial(index, config).await? else {
                continue;
            };

            match conn.login(query).await {
                Ok(Some(user)) => return Ok(user),
                Ok(None) => continue,
                Err(e) if e.is_silent() => {
                    tracing::debug!(
                        host = %config.host,
                        username = %query.username,
                        error = %e,
                        "Directory login rejected, trying next server"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DirectoryError::InvalidCredentials)
    }

    async fn user(&self, login: &str) -> Result<ExternalUserInfo, DirectoryError> {
        if self.servers.is_empty() {
            return Err(DirectoryError::NoServers);
        }

        let search = [login.to_string()];
        for (index, config) in self.servers.iter().enumerate() {
            let Some(mut conn) = self.dial(index, config).await? else {
                continue;
            };

            conn.bind().await?;
            let mut users = conn.users(&search).await?;
            if !users.is_empty() {
                return Ok(users.swap_remove(0));
            }
        }

        Err(DirectoryError::UserNotFound)
    }

    async fn users(&self, logins: &[String]) -> Result<Vec<ExternalUserInfo>, DirectoryError> {
        if self.servers.is_empty() {
            return Err(DirectoryError::NoServers);
        }

        let mut result = Vec::new();
        for (index, config) in self.servers.iter().enumerate() {
            let Some(mut conn) = self.dial(index, config).await? else {
                continue;
            };

            conn.bind().await?;
            result.extend(conn.users(logins).await?);
        }

        Ok(result)
    }

    async fn ping(&self) -> Result<Vec<ServerStatus>, DirectoryError> {
        if self.servers.is_empty() {
            return Err(DirectoryError::NoServers);
        }

        let mut statuses = Vec::with_capacity(self.servers.len());
        for config in &self.servers {
            let status = match self.connector.dial(config).await {
                Ok(conn) => {
                    drop(ScopedConnection(conn));
                    ServerStatus {
                        host: config.host.clone(),
                        port: config.port,
                        available: true,
                        error: None,
                    }
                }
                Err(e) => ServerStatus {
                    host: config.host.clone(),
                    port: config.port,
                    available: false,
                    error: Some(e.to_string()),
                },
            };
            statuses.push(status);
        }

        Ok(statuses)
    }
}

/// Where the server list comes from. Read on every use so edits to the
/// settings take effect without a restart.
#[async_trait]
pub trait DirectorySettings: Send + Sync {
    async fn servers(&self) -> Result<Vec<DirectoryServerConfig>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct DirectorySettingsFile {
    #[serde(default)]
    servers: Vec<DirectoryServerConfig>,
}

/// Loads `[[servers]]` tables from a TOML file.
pub struct FileDirectorySettings {
    path: String,
}

impl FileDirectorySettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DirectorySettings for FileDirectorySettings {
    async fn servers(&self) -> Result<Vec<DirectoryServerConfig>, DirectoryError> {
        let settings = config::Config::builder()
            .add_source(config::File::new(&self.path, config::FileFormat::Toml))
            .build()
            .and_then(|cfg| cfg.try_deserialize::<DirectorySettingsFile>())
            .map_err(|e| {
                DirectoryError::Settings(anyhow::anyhow!(
                    "Failed to read directory settings from '{}': {}",
                    self.path,
                    e
                ))
            })?;

        Ok(settings.servers)
    }
}

/// Fixed server list, for embedding callers that already hold their settings.
pub struct StaticDirectorySettings(pub Vec<DirectoryServerConfig>);

#[async_trait]
impl DirectorySettings for StaticDirectorySettings {
    async fn servers(&self) -> Result<Vec<DirectoryServerConfig>, DirectoryError> {
        Ok(self.0.clone())
    }
}

/// Builds a client for a given server list.
pub trait DirectoryClientFactory: Send + Sync {
    fn create(&self, servers: Vec<DirectoryServerConfig>) -> Arc<dyn DirectoryClient>;
}

pub struct MultiDirectoryFactory {
    connector: Arc<dyn DirectoryConnector>,
}

impl MultiDirectoryFactory {
    pub fn new(connector: Arc<dyn DirectoryConnector>) -> Self {
        Self { connector }
    }
}

impl DirectoryClientFactory for MultiDirectoryFactory {
    fn create(&self, servers: Vec<DirectoryServerConfig>) -> Arc<dyn DirectoryClient> {
        Arc::new(MultiDirectory::new(servers, self.connector.clone()))
    }
}

/// Directory access as the auth strategies see it: the enabled flag, the
/// sign-up policy and a client built from freshly loaded settings.
pub struct DirectoryProvider {
    config: DirectoryConfig,
    settings: Arc<dyn DirectorySettings>,
    factory: Arc<dyn DirectoryClientFactory>,
}

impl DirectoryProvider {
    pub fn new(
        config: DirectoryConfig,
        settings: Arc<dyn DirectorySettings>,
        factory: Arc<dyn DirectoryClientFactory>,
    ) -> Self {
        Self {
            config,
            settings,
            factory,
        }
    }

    pub fn disabled() -> Self {
        Self::new(
            DirectoryConfig {
                enabled: false,
                ..DirectoryConfig::default()
            },
            Arc::new(FileDirectorySettings::new(String::new())),
            Arc::new(MultiDirectoryFactory::new(Arc::new(UnavailableConnector))),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn allow_sign_up(&self) -> bool {
        self.config.allow_sign_up
    }

    pub async fn client(&self) -> Result<Arc<dyn DirectoryClient>, DirectoryError> {
        let servers = self.settings.servers().await?;
        Ok(self.factory.create(servers))
    }
}

/// Connector used when no directory protocol is wired in: every dial fails.
pub struct UnavailableConnector;

#[async_trait]
impl DirectoryConnector for UnavailableConnector {
    async fn dial(
        &self,
        config: &DirectoryServerConfig,
    ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
        Err(DirectoryError::Dial {
            host: config.host.clone(),
            port: config.port,
            source: anyhow::anyhow!("no directory connector configured"),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::Password;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub enum Script {
        DialFails,
        Login(Result<Option<ExternalUserInfo>, &'static str>),
        Users(Vec<ExternalUserInfo>),
    }

    /// Connector answering from a per-host script and counting dials/closes.
    #[derive(Default)]
    pub struct ScriptedConnector {
        pub scripts: HashMap<String, Script>,
        pub dials: Mutex<Vec<String>>,
        pub closes: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedConnector {
        pub fn with(scripts: Vec<(&str, Script)>) -> Self {
            Self {
                scripts: scripts
                    .into_iter()
                    .map(|(host, script)| (host.to_string(), script))
                    .collect(),
                ..Default::default()
            }
        }

        pub fn dial_count(&self) -> usize {
            self.dials.lock().unwrap().len()
        }

        pub fn close_count(&self) -> usize {
            self.closes.lock().unwrap().len()
        }
    }

    struct ScriptedConnection {
        host: String,
        script: Script,
        closes: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DirectoryConnection for ScriptedConnection {
        async fn bind(&mut self) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn login(
            &mut self,
            _query: &LoginQuery,
        ) -> Result<Option<ExternalUserInfo>, DirectoryError> {
            match &self.script {
                Script::Login(Ok(user)) => Ok(user.clone()),
                Script::Login(Err("invalid")) => Err(DirectoryError::InvalidCredentials),
                Script::Login(Err(other)) => Err(DirectoryError::Search(anyhow::anyhow!(*other))),
                _ => Ok(None),
            }
        }

        async fn users(
            &mut self,
            logins: &[String],
        ) -> Result<Vec<ExternalUserInfo>, DirectoryError> {
            match &self.script {
                Script::Users(users) => Ok(users
                    .iter()
                    .filter(|u| logins.contains(&u.login))
                    .cloned()
                    .collect()),
                _ => Ok(Vec::new()),
            }
        }

        fn close(&mut self) {
            self.closes.lock().unwrap().push(self.host.clone());
        }
    }

    #[async_trait]
    impl DirectoryConnector for ScriptedConnector {
        async fn dial(
            &self,
            config: &DirectoryServerConfig,
        ) -> Result<Box<dyn DirectoryConnection>, DirectoryError> {
            self.dials.lock().unwrap().push(config.host.clone());
            let script = self
                .scripts
                .get(&config.host)
                .cloned()
                .unwrap_or(Script::Users(Vec::new()));

            if matches!(script, Script::DialFails) {
                return Err(DirectoryError::Dial {
                    host: config.host.clone(),
                    port: config.port,
                    source: anyhow::anyhow!("connection refused"),
                });
            }

            Ok(Box::new(ScriptedConnection {
                host: config.host.clone(),
                script,
                closes: self.closes.clone(),
            }))
        }
    }

    pub fn server(host: &str) -> DirectoryServerConfig {
        DirectoryServerConfig {
            host: host.to_string(),
            port: 389,
            use_ssl: false,
            bind_dn: String::new(),
            bind_password: None,
            search_filter: String::new(),
            search_base_dns: Vec::new(),
        }
    }

    pub fn external(login: &str) -> ExternalUserInfo {
        ExternalUserInfo {
            auth_module: "ldap".to_string(),
            auth_id: login.to_string(),
            login: login.to_string(),
            email: format!("{}@example.com", login),
            ..Default::default()
        }
    }

    fn query() -> LoginQuery {
        LoginQuery {
            username: "markelog".to_string(),
            password: Password::new("secret"),
        }
    }

    #[tokio::test]
    async fn test_login_falls_through_invalid_credentials() {
        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::Login(Err("invalid"))),
            ("ldap2", Script::Login(Ok(Some(external("markelog"))))),
            ("ldap3", Script::Login(Ok(Some(external("someone-else"))))),
        ]));
        let client = MultiDirectory::new(
            vec![server("ldap1"), server("ldap2"), server("ldap3")],
            connector.clone(),
        );

        let user = client.login(&query()).await.unwrap();

        assert_eq!(user.login, "markelog");
        assert_eq!(connector.dial_count(), 2);
        assert_eq!(connector.close_count(), 2);
    }

    #[tokio::test]
    async fn test_login_stops_on_unexpected_error() {
        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::Login(Err("boom"))),
            ("ldap2", Script::Login(Ok(Some(external("markelog"))))),
        ]));
        let client = MultiDirectory::new(vec![server("ldap1"), server("ldap2")], connector.clone());

        let err = client.login(&query()).await.unwrap_err();

        assert!(matches!(err, DirectoryError::Search(_)));
        assert_eq!(connector.dial_count(), 1);
        assert_eq!(connector.close_count(), 1);
    }

    #[tokio::test]
    async fn test_login_without_match_is_invalid_credentials() {
        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::Login(Err("invalid"))),
            ("ldap2", Script::Login(Ok(None))),
        ]));
        let client = MultiDirectory::new(vec![server("ldap1"), server("ldap2")], connector.clone());

        let err = client.login(&query()).await.unwrap_err();

        assert!(matches!(err, DirectoryError::InvalidCredentials));
        assert_eq!(connector.close_count(), 2);
    }

    #[tokio::test]
    async fn test_no_servers_never_dials() {
        let connector = Arc::new(ScriptedConnector::default());
        let client = MultiDirectory::new(Vec::new(), connector.clone());

        assert!(matches!(
            client.login(&query()).await,
            Err(DirectoryError::NoServers)
        ));
        assert!(matches!(
            client.user("markelog").await,
            Err(DirectoryError::NoServers)
        ));
        assert!(matches!(
            client.users(&["markelog".to_string()]).await,
            Err(DirectoryError::NoServers)
        ));
        assert_eq!(connector.dial_count(), 0);
    }

    #[tokio::test]
    async fn test_dial_failure_skips_all_but_last_server() {
        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::DialFails),
            ("ldap2", Script::Login(Ok(Some(external("markelog"))))),
        ]));
        let client = MultiDirectory::new(vec![server("ldap1"), server("ldap2")], connector.clone());
        assert_eq!(client.login(&query()).await.unwrap().login, "markelog");

        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::Login(Err("invalid"))),
            ("ldap2", Script::DialFails),
        ]));
        let client = MultiDirectory::new(vec![server("ldap1"), server("ldap2")], connector);
        assert!(matches!(
            client.login(&query()).await,
            Err(DirectoryError::Dial { .. })
        ));
    }

    #[tokio::test]
    async fn test_user_stops_at_first_match() {
        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::Users(vec![external("alice")])),
            ("ldap2", Script::Users(vec![external("markelog")])),
            ("ldap3", Script::Users(vec![external("markelog")])),
        ]));
        let client = MultiDirectory::new(
            vec![server("ldap1"), server("ldap2"), server("ldap3")],
            connector.clone(),
        );

        let user = client.user("markelog").await.unwrap();

        assert_eq!(user.login, "markelog");
        assert_eq!(connector.dial_count(), 2);

        assert!(matches!(
            client.user("nobody").await,
            Err(DirectoryError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_users_aggregates_every_server() {
        let connector = Arc::new(ScriptedConnector::with(vec![
            ("ldap1", Script::Users(vec![external("alice"), external("bob")])),
            ("ldap2", Script::Users(vec![external("bob")])),
        ]));
        let client = MultiDirectory::new(vec![server("ldap1"), server("ldap2")], connector.clone());

        let users = client
            .users(&["alice".to_string(), "bob".to_string()])
            .await
            .unwrap();

        let logins: Vec<_> = users.iter().map(|u| u.login.as_str()).collect();
        assert_eq!(logins, vec!["alice", "bob", "bob"]);
        assert_eq!(connector.dial_count(), 2);
        assert_eq!(connector.close_count(), 2);
    }

    #[tokio::test]
    async fn test_ping_reports_each_server() {
        let connector = Arc::new(ScriptedConnector::with(vec![("ldap2", Script::DialFails)]));
        let client = MultiDirectory::new(vec![server("ldap1"), server("ldap2")], connector);

        let statuses = client.ping().await.unwrap();

        assert!(statuses[0].available);
        assert!(!statuses[1].available);
        assert!(statuses[1].error.is_some());
    }

    #[tokio::test]
    async fn test_file_settings_load_servers() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[servers]]
host = "ldap1.example.com"
port = 636
use_ssl = true
bind_dn = "cn=admin,dc=example,dc=com"
bind_password = "s3cret"

[[servers]]
host = "ldap2.example.com"
"#
        )
        .unwrap();

        let settings = FileDirectorySettings::new(file.path().to_str().unwrap());
        let servers = settings.servers().await.unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].port, 636);
        assert!(servers[0].use_ssl);
        assert_eq!(servers[1].port, 389);
    }

    #[tokio::test]
    async fn test_missing_settings_file_is_an_error() {
        let settings = FileDirectorySettings::new("/nonexistent/directory.toml");
        assert!(matches!(
            settings.servers().await,
            Err(DirectoryError::Settings(_))
        ));
    }
}

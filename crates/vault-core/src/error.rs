use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("host already exists: {0}")]
    HostExists(String),

    #[error("key '{0}' is not deployed to host '{1}'")]
    DeploymentNotFound(String, String),

    #[error("key '{key}' is still in use: {reason} (use --force to remove anyway)")]
    KeyInUse { key: String, reason: String },

    #[error("key '{key}' is {status}, expected active")]
    KeyNotActive { key: String, status: String },

    #[error("key material already in inventory as '{0}'")]
    DuplicateKeyMaterial(String),

    #[error("invalid name '{0}': must be lowercase alphanumeric with '-', '_' or '.'")]
    InvalidName(String),

    #[error("unknown key algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("refusing weak key: {0}")]
    WeakAlgorithm(String),

    #[error("invalid key size: {0}")]
    InvalidKeySize(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("key file already exists: {0}")]
    KeyFileExists(String),

    #[error("key file not found: {0}")]
    KeyFileMissing(String),

    #[error("malformed managed section in ssh config: {0}")]
    MalformedManagedSection(String),

    #[error("invalid config value for '{field}': {reason}")]
    InvalidConfigValue { field: String, reason: String },

    #[error("'{0}' not found on PATH; install OpenSSH client tools")]
    ToolNotInstalled(String),

    #[error("failed to run {tool}: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("revoke failed: {0}")]
    RevokeFailed(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;

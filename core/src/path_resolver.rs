use tracing::warn;

const WORKSPACE_PREFIX: &str = "workspace/";

/// Session-scoped identity used to compute the workspace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_type: String,
    pub id: u64,
}

/// Maps server-reported paths to store-relative keys.
///
/// Servers may prefix paths with `workspace/{userType}_{userId}/`. The
/// resolver strips the current user's prefix, flags another user's prefix
/// as a data-integrity anomaly (returned unchanged), and fails open when
/// identity is unavailable. It never errors.
#[derive(Debug, Clone, Default)]
pub struct WorkspacePathResolver {
    identity: Option<UserIdentity>,
    prefix: Option<String>,
}

impl WorkspacePathResolver {
    pub fn new(identity: Option<UserIdentity>) -> Self {
        let prefix = identity
            .as_ref()
            .map(|identity| format!("{WORKSPACE_PREFIX}{}_{}/", identity.user_type, identity.id));
        Self { identity, prefix }
    }

    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    /// Resolves a server path to a store key.
    pub fn extract_file_path<'a>(&self, full_path: &'a str) -> &'a str {
        let Some(prefix) = &self.prefix else {
            return full_path;
        };
        if let Some(relative) = full_path.strip_prefix(prefix) {
            return relative;
        }
        if full_path.starts_with(WORKSPACE_PREFIX) {
            warn!("path `{full_path}` belongs to another user's workspace");
        }
        full_path
    }
}

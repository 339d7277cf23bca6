//! Per-command state assembled from flags, configuration, and environment.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gdrv_auth::{resolve_client, AuthManager, StorageOverride};
use gdrv_core::{
    AppResult, ConfigDir, FieldsPreset, OutputFormat, OutputWriter, RequestContext, RequestType,
    UserConfig,
};
use gdrv_drive::{ApiContext, Endpoints};
use gdrv_transport::{
    resolve, PathCache, ResolveRequest, Resolved, ResourceKeys, RetryPolicy,
};

/// Global flags shared by every command.
#[derive(Clone, Debug)]
pub struct GlobalOpts {
    pub profile: String,
    pub drive_id: Option<String>,
    pub output: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub debug: bool,
    pub strict: bool,
    pub no_cache: bool,
    pub cache_ttl: Option<u64>,
    pub include_shared_with_me: bool,
    pub dry_run: bool,
    pub force: bool,
    pub assume_yes: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub storage: StorageOverride,
    pub log_file: Option<String>,
}

/// Everything a command handler needs, threaded explicitly instead of
/// living in globals.
pub struct CommandContext {
    pub globals: GlobalOpts,
    pub config_dir: ConfigDir,
    pub config: UserConfig,
    pub writer: OutputWriter,
    pub cancel: CancellationToken,
    path_cache: PathCache,
}

impl CommandContext {
    #[must_use]
    pub fn new(
        globals: GlobalOpts,
        config_dir: ConfigDir,
        config: UserConfig,
        cancel: CancellationToken,
    ) -> Self {
        let ttl = Duration::from_secs(globals.cache_ttl.unwrap_or(config.cache_ttl));
        Self {
            writer: OutputWriter::new(globals.output),
            globals,
            config_dir,
            config,
            cancel,
            path_cache: PathCache::new(ttl),
        }
    }

    /// Builds the auth manager for the resolved OAuth client, carrying any
    /// backend-selection warning onto the envelope.
    pub fn auth_manager(&mut self) -> AppResult<AuthManager> {
        let client = resolve_client(
            self.globals.client_id.as_deref(),
            self.globals.client_secret.as_deref(),
            &self.config,
        )?;
        let manager = AuthManager::new(self.config_dir.clone(), client, self.globals.storage)?;
        if let Some(warning) = manager.selection_warning() {
            self.writer.warn(warning.clone());
        }
        Ok(manager)
    }

    /// The retry policy from configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retries, self.config.retry_base_delay)
    }

    /// Obtains valid credentials and builds the shared API context.
    pub async fn api(&mut self) -> AppResult<Arc<ApiContext>> {
        let manager = self.auth_manager()?;
        let credentials = manager.get_valid_credentials(&self.globals.profile).await?;
        let connection = gdrv_transport::Connection::new(
            credentials.access_token,
            Duration::from_secs(self.config.request_timeout),
        )?;
        Ok(Arc::new(ApiContext {
            connection,
            retry: self.retry_policy(),
            resource_keys: ResourceKeys::new(),
            preset: self.fields_preset(),
            cancel: self.cancel.clone(),
            endpoints: Endpoints::default(),
        }))
    }

    /// Default field preset from configuration.
    #[must_use]
    pub fn fields_preset(&self) -> FieldsPreset {
        self.config.default_fields
    }

    /// Builds a request context bound to this command's trace id.
    #[must_use]
    pub fn req_ctx(&self, request_type: RequestType) -> RequestContext {
        let ctx = RequestContext::with_trace_id(
            &self.globals.profile,
            request_type,
            self.writer.trace_id(),
        );
        match &self.globals.drive_id {
            Some(drive_id) => ctx.with_drive_id(drive_id.clone()),
            None => ctx,
        }
    }

    /// Resolves a path-or-id operand to a resource id, threading any
    /// ambiguity warning onto the envelope.
    pub async fn resolve_operand(
        &mut self,
        api: &ApiContext,
        req_ctx: &RequestContext,
        input: &str,
    ) -> AppResult<String> {
        let lookup = gdrv_drive::sync_ops::PathLookup::new(api, req_ctx);
        let Resolved { id, warning } = resolve(
            &lookup,
            &self.path_cache,
            ResolveRequest {
                input,
                drive_id: self.globals.drive_id.as_deref(),
                strict: self.globals.strict,
                no_cache: self.globals.no_cache,
            },
        )
        .await?;
        if let Some(warning) = warning {
            self.writer.warn(warning);
        }
        Ok(id)
    }

    /// Invalidates cached mappings before a mutation that touches `path`.
    pub fn invalidate_path(&self, path: &str) {
        let scope = self.globals.drive_id.as_deref().unwrap_or("user");
        self.path_cache.invalidate_for_mutation(scope, path);
    }
}

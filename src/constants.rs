//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Finalizer placed on every `Jwker` before any broker state is created
pub const FINALIZER_NAME: &str = "jwker.nais.io/finalizer";

/// Field manager recorded on writes made by this controller
pub const FIELD_MANAGER: &str = "jwker";

/// Label value marking secrets managed by this controller (`type=jwker.nais.io`)
pub const SECRET_TYPE_LABEL_KEY: &str = "type";
pub const SECRET_TYPE_LABEL_VALUE: &str = "jwker.nais.io";

/// Label carrying the application name on secrets and pods
pub const APP_LABEL_KEY: &str = "app";

/// Annotation asking the reloader sidecar to restart pods when the secret changes
pub const RELOADER_ANNOTATION_KEY: &str = "reloader.stakater.com/match";

/// Secret data keys consumed by applications at runtime
pub const TOKEN_X_CLIENT_ID_KEY: &str = "TOKEN_X_CLIENT_ID";
pub const TOKEN_X_ISSUER_KEY: &str = "TOKEN_X_ISSUER";
pub const TOKEN_X_JWKS_URI_KEY: &str = "TOKEN_X_JWKS_URI";
pub const TOKEN_X_PRIVATE_JWK_KEY: &str = "TOKEN_X_PRIVATE_JWK";
pub const TOKEN_X_TOKEN_ENDPOINT_KEY: &str = "TOKEN_X_TOKEN_ENDPOINT";
pub const TOKEN_X_WELL_KNOWN_URL_KEY: &str = "TOKEN_X_WELL_KNOWN_URL";

/// Secret holding the controller's own signing key
pub const DEFAULT_PRIVATE_JWK_SECRET_NAME: &str = "jwker-private-jwk";
pub const PRIVATE_JWK_SECRET_KEY: &str = "privateJWK";

/// Data key of the shared public JWKS secret
pub const SHARED_PUBLIC_JWKS_KEY: &str = "AUTH_CLIENT_JWKS";

/// Default namespace the controller runs in
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "nais-system";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8181;

/// Default maximum number of reconciles running in parallel
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 10;

/// Default lifetime of self-signed bearer assertions (seconds)
pub const DEFAULT_ASSERTION_VALIDITY_SECS: u64 = 60;

/// Default timeout applied to every broker HTTP request (seconds)
pub const DEFAULT_BROKER_TIMEOUT_SECS: u64 = 10;

/// Default requeue interval after a failed reconcile (seconds)
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 10;

/// Default upper bound for the Fibonacci backoff policy (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default interval of the cluster-wide gauge refresh loop (seconds)
pub const DEFAULT_METRICS_REFRESH_INTERVAL_SECS: u64 = 10;

/// Deadline for startup operations against the cluster (seconds)
pub const STARTUP_DEADLINE_SECS: u64 = 60;

/// Attempts made by read-modify-write helpers before giving up on conflicts
pub const MAX_CONFLICT_RETRIES: usize = 3;

/// Path of the OAuth authorization server metadata document
pub const WELL_KNOWN_OAUTH_PATH: &str = "/.well-known/oauth-authorization-server";

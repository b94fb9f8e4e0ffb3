use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Playvex sync engine.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::event_stream,
        crate::routes::progress::list_progress,
        crate::routes::progress::get_progress,
        crate::routes::progress::put_progress,
        crate::routes::progress::patch_progress,
        crate::routes::progress::list_recent,
        crate::routes::progress::push_recent,
        crate::routes::settings::list_settings,
        crate::routes::settings::get_setting,
        crate::routes::settings::put_setting,
        crate::routes::account::account_status,
        crate::routes::account::pin_status,
        crate::routes::account::sign_in_with_provider,
        crate::routes::account::sign_in_with_email,
        crate::routes::account::sign_up_with_email,
        crate::routes::account::sign_out,
        crate::routes::account::complete_redirect,
        crate::routes::sync::reconcile_now,
        crate::routes::sync::pending_writes,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::progress::ProgressEntry,
            crate::dto::progress::ProgressListResponse,
            crate::dto::progress::ProgressWriteRequest,
            crate::dto::progress::ProgressWriteResponse,
            crate::dto::progress::RecentResponse,
            crate::dto::settings::SettingsResponse,
            crate::dto::settings::SettingResponse,
            crate::dto::settings::SettingWriteRequest,
            crate::dto::settings::SettingWriteResponse,
            crate::dto::account::AccountStatusResponse,
            crate::dto::account::SessionView,
            crate::dto::account::StatusView,
            crate::dto::account::AuthErrorView,
            crate::dto::account::EmailCredentialsRequest,
            crate::dto::account::PinStatusRequest,
            crate::dto::account::SignInResponse,
            crate::dto::account::SignInState,
            crate::dto::sync::PendingWritesResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::MirrorStatus,
            crate::dto::sse::RemoteWriteEvent,
            crate::services::reconciler::ReconcileReport,
            crate::services::reconciler::SkipReason,
            crate::services::reconciler::SlugFailure,
            crate::services::write_scheduler::WriteOutcome,
            crate::dao::settings_store::SettingChange,
            crate::dao::settings_store::VisualMode,
            crate::dao::models::AccountId,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sse", description = "Server-sent events stream"),
        (name = "progress", description = "Per-game progress and recently played games"),
        (name = "settings", description = "Device-local preferences"),
        (name = "account", description = "Identity and account status"),
        (name = "sync", description = "Reconciliation and pending remote writes"),
    )
)]
pub struct ApiDoc;

use authsync::config::Config;
use authsync::db::{ProfileStorage, SessionStorage};
use authsync::service::{
    AccountService, AuthEventBus, ProfileSynchronizer, SessionStore, VerificationOrchestrator,
};
use authsync::{GoTrueClient, IdentityProvider};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::load()?;
    authsync::logging::init(&cfg.loglevel);

    info!(
        database_url = %cfg.database_url,
        provider = %cfg.provider.url.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        session_scope = %cfg.session_scope,
        loglevel = %cfg.loglevel
    );

    let pool = authsync::db::connect(&cfg.database_url).await?;
    let profiles = Arc::new(ProfileStorage::new(pool.clone()));
    let sessions: Arc<dyn SessionStore> =
        Arc::new(SessionStorage::new(pool, cfg.session_scope.clone()));
    let provider: Arc<dyn IdentityProvider> = Arc::new(GoTrueClient::new(&cfg.provider)?);

    let synchronizer = Arc::new(ProfileSynchronizer::new(profiles, &cfg.sync));
    let verification = Arc::new(VerificationOrchestrator::new(
        provider.clone(),
        synchronizer.clone(),
        &cfg.verification,
    )?);
    let bus = AuthEventBus::start(provider.as_ref(), synchronizer.clone(), sessions.clone()).await?;
    let accounts = AccountService::new(provider, synchronizer, sessions, verification.clone());

    let mut observer = bus.subscribe().await?;
    tokio::spawn(async move {
        while let Some(event) = observer.recv().await {
            info!(
                event = ?event.event,
                auth_id = event.identity.as_ref().map(|i| i.id.as_str()).unwrap_or("-"),
                "auth state changed"
            );
        }
    });

    match accounts.initialize().await {
        Ok(Some(identity)) => info!(auth_id = %identity.id, "restored session"),
        Ok(None) => info!("no stored session"),
        Err(e) => warn!(code = e.code(), "session restore failed: {}", e),
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    verification.teardown();
    bus.shutdown().await;
    Ok(())
}

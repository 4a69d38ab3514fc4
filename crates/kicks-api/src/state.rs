//! # Application State
//!
//! Shared state handed to every handler: the escrow engine (which owns the
//! in-memory store), the release scheduler, and the optional Postgres pool.
//!
//! The in-memory store is authoritative while the process runs. With a pool
//! configured, every committed change is written through to Postgres and the
//! store is hydrated from it at startup.

use std::sync::Arc;

use kicks_core::OrderId;
use kicks_escrow::{
    Clock, EngineConfig, EscrowEngine, InMemoryStore, ReleaseScheduler, SystemClock,
    TransactionStore,
};
use sqlx::PgPool;

use crate::error::AppError;

/// Service configuration from the command line.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Listen port.
    pub port: u16,
    /// Run the background release sweeper.
    pub sweep_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            sweep_enabled: true,
        }
    }
}

/// Handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: EscrowEngine,
    pub scheduler: ReleaseScheduler,
    pub db_pool: Option<PgPool>,
    pub config: AppConfig,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// In-memory state with default engine configuration.
    pub fn new() -> Self {
        Self::with_engine_config(EngineConfig::default(), AppConfig::default(), None)
    }

    /// State over a fresh in-memory store and the system clock.
    pub fn with_engine_config(
        engine_config: EngineConfig,
        config: AppConfig,
        db_pool: Option<PgPool>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn TransactionStore> = Arc::new(InMemoryStore::with_clock(clock.clone()));
        Self::with_engine(EscrowEngine::new(store, clock, engine_config), config, db_pool)
    }

    /// State around an existing engine. Tests use this to inject a clock.
    pub fn with_engine(engine: EscrowEngine, config: AppConfig, db_pool: Option<PgPool>) -> Self {
        Self {
            scheduler: ReleaseScheduler::new(engine.clone()),
            engine,
            db_pool,
            config,
        }
    }

    /// Write the current record and log of `order_id` through to Postgres.
    ///
    /// Failure is surfaced to the client: the in-memory change would otherwise
    /// be lost on restart.
    pub async fn persist(&self, order_id: &OrderId) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let tx = self.engine.get_transaction(order_id)?;
        let events = self.engine.events(order_id)?;
        if let Err(e) = crate::db::transactions::save(pool, &tx, &events).await {
            tracing::error!(
                order_id = %order_id,
                error = %e,
                "failed to persist escrow transaction"
            );
            return Err(AppError::Internal(
                "escrow transition applied in-memory but database persist failed".to_string(),
            ));
        }
        Ok(())
    }

    /// Load persisted transactions into the in-memory store.
    ///
    /// Records that fail verification are flagged for reconciliation and
    /// skipped; they do not stop startup.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let loaded = crate::db::transactions::load_all(pool)
            .await
            .map_err(|e| format!("failed to load escrow transactions: {e}"))?;

        let store = self.engine.store();
        let mut restored = 0usize;
        let mut flagged = 0usize;
        for row in loaded {
            match row {
                Ok((tx, events)) => match store.restore(tx, events) {
                    Ok(()) => restored += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "escrow transaction failed verification");
                        flagged += 1;
                    }
                },
                Err((order_id, detail)) => {
                    store.flag_for_reconciliation(&order_id, detail);
                    flagged += 1;
                }
            }
        }

        tracing::info!(restored, flagged, "Hydrated escrow store from database");
        Ok(())
    }
}

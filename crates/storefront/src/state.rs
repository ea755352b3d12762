//! Application state shared across handlers.

use std::sync::Arc;

use koi_core::{CouponPolicy, PricingEngine};
use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::Repositories;
use crate::gateway::PaymentGateway;
use crate::services::{LoggingEffects, OrderEffects, OrderLocks, OrderReconciler, RefundWorkflow};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like repositories, services and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    repos: Repositories,
    pricing: PricingEngine,
    coupons: CouponPolicy,
    reconciler: OrderReconciler,
    refunds: RefundWorkflow,
}

impl AppState {
    /// Create a new application state with the default order effects.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `repos` - Repository backend
    /// * `gateway` - Payment provider client
    /// * `coupons` - Coupon catalogue
    /// * `pool` - `PostgreSQL` pool backing `repos`, checked by readiness probes
    #[must_use]
    pub fn new(
        config: StorefrontConfig,
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponPolicy,
        pool: Option<PgPool>,
    ) -> Self {
        Self::with_effects(config, repos, gateway, coupons, pool, Arc::new(LoggingEffects))
    }

    /// Like [`Self::new`] with custom order effects.
    #[must_use]
    pub fn with_effects(
        config: StorefrontConfig,
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponPolicy,
        pool: Option<PgPool>,
        effects: Arc<dyn OrderEffects>,
    ) -> Self {
        let reconciler =
            OrderReconciler::new(repos.clone(), gateway.clone(), effects, OrderLocks::new());
        let refunds = RefundWorkflow::new(repos.clone(), gateway, reconciler.clone());
        let pricing = config.store.pricing_engine();

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                repos,
                pricing,
                coupons,
                reconciler,
                refunds,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Database pool, when running against `PostgreSQL`.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn repos(&self) -> &Repositories {
        &self.inner.repos
    }

    #[must_use]
    pub fn pricing(&self) -> &PricingEngine {
        &self.inner.pricing
    }

    #[must_use]
    pub fn coupons(&self) -> &CouponPolicy {
        &self.inner.coupons
    }

    #[must_use]
    pub fn reconciler(&self) -> &OrderReconciler {
        &self.inner.reconciler
    }

    #[must_use]
    pub fn refunds(&self) -> &RefundWorkflow {
        &self.inner.refunds
    }
}

use std::sync::Arc;
use std::time::Duration;

use jmn_storage::{with_timeout, StoreError, SubscriptionStore};
use tracing::{debug, warn};
use uuid::Uuid;

/// Decides whether a user may receive match notifications. Only premium, active
/// subscriptions pass; everything else, lookup failures included, is a no.
#[derive(Clone)]
pub struct EntitlementGate {
    subscriptions: Arc<dyn SubscriptionStore>,
    timeout: Duration,
}

impl EntitlementGate {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, timeout: Duration) -> Self {
        Self {
            subscriptions,
            timeout,
        }
    }

    /// Like [`Self::is_eligible_for_notification`] but keeps lookup failures visible.
    pub async fn check(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let subscription = with_timeout(
            "subscription lookup",
            self.timeout,
            self.subscriptions.subscription_for(user_id),
        )
        .await?;
        let eligible = subscription
            .as_ref()
            .is_some_and(|s| s.is_premium_active());
        if !eligible {
            debug!(%user_id, has_subscription = subscription.is_some(), "user not entitled to notifications");
        }
        Ok(eligible)
    }

    pub async fn is_eligible_for_notification(&self, user_id: Uuid) -> bool {
        match self.check(user_id).await {
            Ok(eligible) => eligible,
            Err(err) => {
                warn!(%user_id, error = %err, "entitlement lookup failed; treating user as not eligible");
                false
            }
        }
    }
}

//! Trial expiry derivation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use veritas_core::{CompanyId, ServiceProviderId};

use crate::store::{found, PlanStatus, StoreError, SubscriptionOwner, SubscriptionStatus, SubscriptionStore};

/// Derived trial state. Never stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrialState {
    pub is_expired: bool,
    pub ends_at: Option<DateTime<Utc>>,
}

impl TrialState {
    /// Only a trial with a known end date can expire.
    pub fn from_status(status: Option<&SubscriptionStatus>, now: DateTime<Utc>) -> Self {
        match status {
            Some(SubscriptionStatus {
                status: PlanStatus::Trial,
                trial_ends_at: Some(ends_at),
            }) => Self {
                is_expired: now > *ends_at,
                ends_at: Some(*ends_at),
            },
            _ => Self::default(),
        }
    }
}

/// Looks up the subscription of whatever a profile links to.
#[derive(Clone)]
pub struct TrialStatusCalculator {
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl TrialStatusCalculator {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        Self { subscriptions }
    }

    /// Derive the trial state for a company and/or service provider.
    ///
    /// Both lookups run concurrently and fail independently. The company wins
    /// when both resolve. Returns an error only when every attempted lookup
    /// failed with a transport error.
    pub async fn calculate(
        &self,
        company_id: Option<CompanyId>,
        provider_id: Option<ServiceProviderId>,
        now: DateTime<Utc>,
    ) -> Result<TrialState, StoreError> {
        let (company, provider) = tokio::join!(
            self.lookup(company_id.map(SubscriptionOwner::Company)),
            self.lookup(provider_id.map(SubscriptionOwner::ServiceProvider)),
        );

        let mut attempted = 0;
        let mut succeeded = 0;
        let mut status = None;
        let mut last_error = None;

        for outcome in [company, provider].into_iter().flatten() {
            attempted += 1;
            match outcome {
                Ok(resolved) => {
                    succeeded += 1;
                    if status.is_none() {
                        status = resolved;
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        if attempted > 0 && succeeded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        Ok(TrialState::from_status(status.as_ref(), now))
    }

    async fn lookup(
        &self,
        owner: Option<SubscriptionOwner>,
    ) -> Option<Result<Option<SubscriptionStatus>, StoreError>> {
        let owner = owner?;
        let result = found(self.subscriptions.get_status(owner).await);
        if let Err(e) = &result {
            tracing::warn!(?owner, error = %e, "subscription lookup failed");
        }
        Some(result)
    }
}

impl core::fmt::Debug for TrialStatusCalculator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrialStatusCalculator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use proptest::prelude::*;

    use crate::InMemoryDirectory;

    fn calculator(dir: &Arc<InMemoryDirectory>) -> TrialStatusCalculator {
        TrialStatusCalculator::new(dir.clone())
    }

    #[tokio::test]
    async fn lapsed_company_trial_is_expired() {
        let dir = InMemoryDirectory::arc();
        let company = CompanyId::new();
        let ends_at = Utc::now() - Duration::days(1);
        dir.set_subscription(
            SubscriptionOwner::Company(company),
            SubscriptionStatus::trial(Some(ends_at)),
        );

        let state = calculator(&dir)
            .calculate(Some(company), None, Utc::now())
            .await
            .unwrap();

        assert_eq!(state, TrialState { is_expired: true, ends_at: Some(ends_at) });
    }

    #[tokio::test]
    async fn active_subscription_is_never_expired() {
        let dir = InMemoryDirectory::arc();
        let company = CompanyId::new();
        dir.set_subscription(SubscriptionOwner::Company(company), SubscriptionStatus::active());

        let state = calculator(&dir)
            .calculate(Some(company), None, Utc::now())
            .await
            .unwrap();

        assert_eq!(state, TrialState::default());
    }

    #[tokio::test]
    async fn company_is_preferred_over_provider() {
        let dir = InMemoryDirectory::arc();
        let company = CompanyId::new();
        let provider = ServiceProviderId::new();
        let ends_at = Utc::now() + Duration::days(7);
        dir.set_subscription(
            SubscriptionOwner::Company(company),
            SubscriptionStatus::trial(Some(ends_at)),
        );
        dir.set_subscription(
            SubscriptionOwner::ServiceProvider(provider),
            SubscriptionStatus::trial(Some(Utc::now() - Duration::days(7))),
        );

        let state = calculator(&dir)
            .calculate(Some(company), Some(provider), Utc::now())
            .await
            .unwrap();

        assert!(!state.is_expired);
        assert_eq!(state.ends_at, Some(ends_at));
    }

    #[tokio::test]
    async fn provider_is_used_when_company_has_no_subscription() {
        let dir = InMemoryDirectory::arc();
        let provider = ServiceProviderId::new();
        let ends_at = Utc::now() - Duration::hours(1);
        dir.set_subscription(
            SubscriptionOwner::ServiceProvider(provider),
            SubscriptionStatus::trial(Some(ends_at)),
        );

        let state = calculator(&dir)
            .calculate(Some(CompanyId::new()), Some(provider), Utc::now())
            .await
            .unwrap();

        assert!(state.is_expired);
    }

    #[tokio::test]
    async fn nothing_linked_yields_default_state() {
        let dir = InMemoryDirectory::arc();
        let state = calculator(&dir).calculate(None, None, Utc::now()).await.unwrap();
        assert_eq!(state, TrialState::default());
    }

    /// Fails company lookups, delegates everything else.
    struct CompanyOutage(Arc<InMemoryDirectory>);

    #[async_trait]
    impl SubscriptionStore for CompanyOutage {
        async fn get_status(
            &self,
            owner: SubscriptionOwner,
        ) -> Result<SubscriptionStatus, StoreError> {
            match owner {
                SubscriptionOwner::Company(_) => {
                    Err(StoreError::transport(anyhow::anyhow!("timeout")))
                }
                other => self.0.get_status(other).await,
            }
        }
    }

    #[tokio::test]
    async fn one_failing_lookup_does_not_abort_the_other() {
        let dir = InMemoryDirectory::arc();
        let provider = ServiceProviderId::new();
        let ends_at = Utc::now() - Duration::days(2);
        dir.set_subscription(
            SubscriptionOwner::ServiceProvider(provider),
            SubscriptionStatus::trial(Some(ends_at)),
        );

        let calc = TrialStatusCalculator::new(Arc::new(CompanyOutage(dir)));
        let state = calc
            .calculate(Some(CompanyId::new()), Some(provider), Utc::now())
            .await
            .unwrap();

        assert!(state.is_expired);
        assert_eq!(state.ends_at, Some(ends_at));
    }

    #[tokio::test]
    async fn all_lookups_failing_is_an_error() {
        let dir = InMemoryDirectory::arc();
        dir.set_unreachable(true);

        let result = calculator(&dir)
            .calculate(Some(CompanyId::new()), Some(ServiceProviderId::new()), Utc::now())
            .await;

        assert!(matches!(result, Err(StoreError::Transport(_))));
    }

    fn non_trial_status() -> impl Strategy<Value = PlanStatus> {
        prop_oneof![
            Just(PlanStatus::Active),
            Just(PlanStatus::PastDue),
            Just(PlanStatus::Canceled),
            Just(PlanStatus::Other),
        ]
    }

    proptest! {
        #[test]
        fn trial_expiry_follows_the_clock(offset_secs in -1_000_000i64..1_000_000i64) {
            let now = Utc::now();
            let ends_at = now + Duration::seconds(offset_secs);
            let state = TrialState::from_status(Some(&SubscriptionStatus::trial(Some(ends_at))), now);
            prop_assert_eq!(state.is_expired, now > ends_at);
            prop_assert_eq!(state.ends_at, Some(ends_at));
        }

        #[test]
        fn non_trial_status_never_expires(status in non_trial_status(), offset_secs in -1_000_000i64..1_000_000i64) {
            let now = Utc::now();
            let record = SubscriptionStatus {
                status,
                trial_ends_at: Some(now + Duration::seconds(offset_secs)),
            };
            prop_assert_eq!(TrialState::from_status(Some(&record), now), TrialState::default());
        }
    }
}

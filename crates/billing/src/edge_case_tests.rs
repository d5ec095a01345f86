// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Tests boundary conditions and failure paths in:
//! - Quota checks at and around each limit
//! - Downgrade reconciliation and its retention rule
//! - Webhook routing, deduplication and retry after failure
//! - Notification isolation from the tier change

#[cfg(test)]
mod support {
    use crate::email::RecordingNotifier;
    use crate::events::StripeEvent;
    use crate::plans::PlanCatalog;
    use crate::quota::QuotaChecker;
    use crate::reconcile::DowngradeReconciler;
    use crate::webhooks::WebhookHandler;
    use brewlog_shared::{
        Account, AccountStore, InMemoryStore, PlanTier, RecipeDraft, RecipeId, RecipeStep,
        RecipeStore, SortOrder, Store, UserId, Visibility,
    };
    use std::sync::Arc;

    pub struct Fixture {
        pub store: Arc<InMemoryStore>,
        pub notifier: Arc<RecordingNotifier>,
        pub quota: QuotaChecker,
        pub reconciler: Arc<DowngradeReconciler>,
        pub handler: WebhookHandler,
    }

    pub fn fixture() -> Fixture {
        fixture_with(RecordingNotifier::new())
    }

    pub fn fixture_with(notifier: RecordingNotifier) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let catalog =
            Arc::new(PlanCatalog::standard().with_price("price_premium", PlanTier::Premium));
        let dyn_store: Arc<dyn Store> = store.clone();
        let notifier = Arc::new(notifier);
        let reconciler = Arc::new(DowngradeReconciler::new(catalog.clone(), dyn_store.clone()));
        Fixture {
            quota: QuotaChecker::new(catalog.clone(), dyn_store.clone()),
            handler: WebhookHandler::new(
                catalog,
                dyn_store,
                reconciler.clone(),
                notifier.clone(),
                Some("whsec_edge".to_string()),
            ),
            reconciler,
            notifier,
            store,
        }
    }

    pub fn draft(name: &str) -> RecipeDraft {
        RecipeDraft {
            name: name.to_string(),
            is_ice: false,
            ice_g: None,
            bean_g: 16.0,
            memo: None,
            steps: vec![RecipeStep::new(1, 0, 0, 40.0), RecipeStep::new(2, 0, 40, 250.0)],
        }
    }

    impl Fixture {
        /// Account linked to `cus_<username>` holding `presets` presets and `shares` shares
        pub async fn account(&self, tier: PlanTier, presets: usize, shares: usize) -> Account {
            let mut account = Account::new("kai", "kai@example.com", tier);
            account.stripe_customer_id = Some("cus_kai".to_string());
            self.store.insert_account(&account).await.unwrap();
            self.seed(account.id, Visibility::Private, presets).await;
            self.seed(account.id, Visibility::Shared, shares).await;
            account
        }

        pub async fn seed(&self, owner: UserId, kind: Visibility, n: usize) -> Vec<RecipeId> {
            let mut ids = Vec::new();
            for i in 0..n {
                let new = draft(&format!("{}-{i}", kind.kind()))
                    .into_new_recipe(owner, kind)
                    .unwrap();
                ids.push(self.store.insert_recipe(new).await.unwrap().id);
            }
            ids
        }

        pub async fn ids(&self, owner: UserId, kind: Visibility) -> Vec<RecipeId> {
            self.store
                .list_ids_by_creation(owner, kind, SortOrder::Ascending)
                .await
                .unwrap()
        }

        pub async fn tier_of(&self, owner: UserId) -> String {
            self.store.get_account(owner).await.unwrap().unwrap().plan_tier
        }
    }

    pub fn event(id: &str, type_: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "type": type_,
            "created": 1_700_000_000,
            "data": { "object": object },
        }))
        .unwrap()
    }

    pub fn subscription(
        status: &str,
        metadata: serde_json::Value,
        price: Option<&str>,
    ) -> serde_json::Value {
        let items = match price {
            Some(p) => serde_json::json!({ "data": [{ "price": { "id": p } }] }),
            None => serde_json::json!({ "data": [] }),
        };
        serde_json::json!({
            "id": "sub_1",
            "customer": "cus_kai",
            "status": status,
            "metadata": metadata,
            "items": items,
        })
    }
}

#[cfg(test)]
mod quota_tests {
    use super::support::*;
    use crate::quota::QuotaDecision;
    use brewlog_shared::{PlanTier, Visibility};

    // =========================================================================
    // FREE user at their single preset is denied a second
    // =========================================================================
    #[tokio::test]
    async fn test_free_user_at_limit_denied() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 1, 0).await;

        let decision = f.quota.can_create(&account, Visibility::Private).await.unwrap();
        match decision {
            QuotaDecision::Denied(denial) => {
                assert_eq!(denial.limit, 1);
                assert_eq!(denial.current_count, 1);
                assert!(!denial.is_paid_tier);
                assert_eq!(denial.kind, Visibility::Private);
            }
            QuotaDecision::Allowed => panic!("second preset on FREE must be denied"),
        }
    }

    // =========================================================================
    // limit - 1 allowed, limit denied
    // =========================================================================
    #[tokio::test]
    async fn test_basic_boundary() {
        let f = fixture();
        let account = f.account(PlanTier::Basic, 4, 0).await;
        assert!(f.quota.can_create(&account, Visibility::Private).await.unwrap().is_allowed());

        f.seed(account.id, Visibility::Private, 1).await;
        let decision = f.quota.can_create(&account, Visibility::Private).await.unwrap();
        assert!(matches!(
            decision,
            QuotaDecision::Denied(ref d) if d.limit == 5 && d.current_count == 5 && d.is_paid_tier
        ));
    }

    #[tokio::test]
    async fn test_collections_are_counted_separately() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 0, 1).await;
        assert!(f.quota.can_create(&account, Visibility::Private).await.unwrap().is_allowed());
        assert!(!f.quota.can_create(&account, Visibility::Shared).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_unlimited_is_never_denied() {
        let f = fixture();
        let account = f.account(PlanTier::Unlimited, 40, 40).await;
        assert!(f.quota.can_create(&account, Visibility::Private).await.unwrap().is_allowed());
        assert!(f.quota.can_create(&account, Visibility::Shared).await.unwrap().is_allowed());
    }

    // =========================================================================
    // Unrecognised stored tier is judged by the most restrictive limits
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_tier_fails_closed() {
        let f = fixture();
        let mut account = f.account(PlanTier::Premium, 1, 0).await;
        account.plan_tier = "platinum".to_string();

        let decision = f.quota.can_create(&account, Visibility::Private).await.unwrap();
        assert!(matches!(
            decision,
            QuotaDecision::Denied(ref d) if d.limit == 1 && d.tier == PlanTier::Free
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error_not_a_denial() {
        let f = fixture();
        let account = f.account(PlanTier::Basic, 0, 0).await;
        f.store.fail_reads(true);
        assert!(f.quota.can_create(&account, Visibility::Private).await.is_err());
    }
}

#[cfg(test)]
mod reconcile_tests {
    use super::support::*;
    use brewlog_shared::{PlanTier, Visibility};

    // =========================================================================
    // PREMIUM -> BASIC exactly at the new limits deletes nothing
    // =========================================================================
    #[tokio::test]
    async fn test_downgrade_at_limit_deletes_nothing() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 5, 5).await;

        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_preset_count, 0);
        assert_eq!(outcome.deleted_share_count, 0);
    }

    // =========================================================================
    // PREMIUM -> BASIC with 8 presets removes the 3 newest
    // =========================================================================
    #[tokio::test]
    async fn test_downgrade_keeps_oldest() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 0, 0).await;
        let ids = f.seed(account.id, Visibility::Private, 8).await;

        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_preset_count, 3);
        assert_eq!(f.ids(account.id, Visibility::Private).await, ids[..5].to_vec());
    }

    #[tokio::test]
    async fn test_downgrade_with_empty_collection() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 3, 0).await;

        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_share_count, 0);
        assert_eq!(outcome.deleted_preset_count, 2);
    }

    #[tokio::test]
    async fn test_unlimited_to_free_keeps_single_oldest() {
        let f = fixture();
        let account = f.account(PlanTier::Unlimited, 0, 0).await;
        let presets = f.seed(account.id, Visibility::Private, 12).await;
        let shares = f.seed(account.id, Visibility::Shared, 3).await;

        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Unlimited, PlanTier::Free)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_preset_count, 11);
        assert_eq!(outcome.deleted_share_count, 2);
        assert_eq!(f.ids(account.id, Visibility::Private).await, vec![presets[0]]);
        assert_eq!(f.ids(account.id, Visibility::Shared).await, vec![shares[0]]);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 9, 7).await;

        let first = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(first.total_deleted(), 6);

        let second = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(second.total_deleted(), 0);
    }

    #[tokio::test]
    async fn test_upgrade_never_deletes() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 8).await;

        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Free, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(outcome.total_deleted(), 0);
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 8);
    }

    // =========================================================================
    // Each collection is trimmed against its own limit
    // =========================================================================
    #[tokio::test]
    async fn test_collections_trimmed_independently() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 3, 8).await;

        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_preset_count, 0);
        assert_eq!(outcome.deleted_share_count, 3);
    }

    #[tokio::test]
    async fn test_other_accounts_untouched() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 7, 0).await;
        let bystander = brewlog_shared::Account::new("ren", "ren@example.com", PlanTier::Premium);
        let theirs = f.seed(bystander.id, Visibility::Private, 7).await;

        f.reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(f.ids(bystander.id, Visibility::Private).await, theirs);
    }

    // =========================================================================
    // Store failure surfaces as an error; a later retry converges
    // =========================================================================
    #[tokio::test]
    async fn test_delete_failure_propagates_then_converges() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 0).await;

        f.store.fail_deletes(true);
        assert!(f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .is_err());
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 8);

        f.store.fail_deletes(false);
        let outcome = f
            .reconciler
            .reconcile(account.id, PlanTier::Premium, PlanTier::Basic)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_preset_count, 3);
    }
}

#[cfg(test)]
mod webhook_tests {
    use super::support::*;
    use crate::email::{Notification, RecordingNotifier};
    use crate::error::BillingError;
    use crate::webhooks::sign_payload;
    use brewlog_shared::{Account, AccountStore, PlanTier, Visibility};
    use serde_json::json;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(500);

    // =========================================================================
    // Cancellation drops to FREE, trims and notifies with the counts
    // =========================================================================
    #[tokio::test]
    async fn test_canceled_subscription_downgrades_to_free() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 4, 2).await;

        let ev = event(
            "evt_cancel",
            "customer.subscription.updated",
            subscription("canceled", json!({}), None),
        );
        f.handler.handle_event(ev).await.unwrap();

        assert_eq!(f.tier_of(account.id).await, "free");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 1);
        assert_eq!(f.ids(account.id, Visibility::Shared).await.len(), 1);

        let sent = f.notifier.wait_for(1, WAIT).await;
        match &sent[..] {
            [Notification::PlanChanged(n)] => {
                assert_eq!(n.old_tier, PlanTier::Premium);
                assert_eq!(n.new_tier, PlanTier::Free);
                assert_eq!(n.deleted_preset_count, 3);
                assert_eq!(n.deleted_share_count, 1);
                assert_eq!(n.email, "kai@example.com");
            }
            other => panic!("unexpected notifications: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscription_deleted_downgrades_even_if_status_active() {
        let f = fixture();
        let account = f.account(PlanTier::Basic, 0, 0).await;

        let ev = event(
            "evt_deleted",
            "customer.subscription.deleted",
            subscription("active", json!({"plan_type": "basic"}), None),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "free");
    }

    #[tokio::test]
    async fn test_upgrade_from_metadata_deletes_nothing() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 1, 1).await;

        let ev = event(
            "evt_up",
            "customer.subscription.created",
            subscription("active", json!({"plan_type": "premium"}), None),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "premium");

        let sent = f.notifier.wait_for(1, WAIT).await;
        assert!(matches!(
            &sent[..],
            [Notification::PlanChanged(n)]
                if n.deleted_preset_count == 0 && n.deleted_share_count == 0
        ));
    }

    #[tokio::test]
    async fn test_price_lookup_used_without_metadata() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 0, 0).await;

        let ev = event(
            "evt_price",
            "customer.subscription.updated",
            subscription("trialing", json!({}), Some("price_premium")),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "premium");
    }

    // =========================================================================
    // Unresolvable price with no metadata falls back to the default tier
    // =========================================================================
    #[tokio::test]
    async fn test_unresolvable_price_uses_default_tier() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 0, 0).await;

        let ev = event(
            "evt_unknown_price",
            "customer.subscription.updated",
            subscription("active", json!({}), Some("price_from_another_app")),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "basic");
    }

    #[tokio::test]
    async fn test_past_due_keeps_tier() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 0).await;

        let ev = event(
            "evt_past_due",
            "customer.subscription.updated",
            subscription("past_due", json!({}), None),
        );
        f.handler.handle_event(ev).await.unwrap();

        assert_eq!(f.tier_of(account.id).await, "premium");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 8);
        assert!(f.notifier.wait_for(1, Duration::from_millis(50)).await.is_empty());
    }

    #[tokio::test]
    async fn test_same_tier_is_noop() {
        let f = fixture();
        let account = f.account(PlanTier::Basic, 2, 0).await;

        let ev = event(
            "evt_same",
            "customer.subscription.updated",
            subscription("active", json!({"tier": "basic"}), None),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "basic");
        assert!(f.notifier.wait_for(1, Duration::from_millis(50)).await.is_empty());
    }

    // =========================================================================
    // Redelivered event is acknowledged without reprocessing
    // =========================================================================
    #[tokio::test]
    async fn test_duplicate_event_processed_once() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 0).await;

        let ev = event(
            "evt_dup",
            "customer.subscription.updated",
            subscription("active", json!({"plan_type": "basic"}), None),
        );
        f.handler.handle_event(ev.clone()).await.unwrap();
        f.handler.handle_event(ev).await.unwrap();

        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 5);
        assert_eq!(f.notifier.wait_for(2, Duration::from_millis(100)).await.len(), 1);
        assert_eq!(
            f.store.webhook_event_status("evt_dup").await,
            Some(("success".to_string(), None))
        );
    }

    // =========================================================================
    // Reconcile failure leaves the old tier so redelivery replays it
    // =========================================================================
    #[tokio::test]
    async fn test_reconcile_failure_keeps_tier_and_allows_retry() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 0).await;
        let ev = event(
            "evt_retry",
            "customer.subscription.updated",
            subscription("active", json!({"plan_type": "basic"}), None),
        );

        f.store.fail_deletes(true);
        let err = f.handler.handle_event(ev.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.tier_of(account.id).await, "premium");
        let (status, message) = f.store.webhook_event_status("evt_retry").await.unwrap();
        assert_eq!(status, "error");
        assert!(message.is_some());

        f.store.fail_deletes(false);
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "basic");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 5);
        assert_eq!(f.notifier.wait_for(1, WAIT).await.len(), 1);
    }

    // =========================================================================
    // Tier write failure after trimming still converges on redelivery
    // =========================================================================
    #[tokio::test]
    async fn test_tier_write_failure_replays_to_basic() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 7).await;
        let ev = event(
            "evt_write",
            "customer.subscription.updated",
            subscription("active", json!({"plan_type": "basic"}), None),
        );

        f.store.fail_tier_writes(true);
        let err = f.handler.handle_event(ev.clone()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.tier_of(account.id).await, "premium");
        assert_eq!(f.store.webhook_event_status("evt_write").await.unwrap().0, "error");
        assert!(f.notifier.wait_for(1, Duration::from_millis(100)).await.is_empty());

        f.store.fail_tier_writes(false);
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "basic");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 5);
        assert_eq!(f.ids(account.id, Visibility::Shared).await.len(), 5);
        assert_eq!(
            f.store.webhook_event_status("evt_write").await,
            Some(("success".to_string(), None))
        );
    }

    #[tokio::test]
    async fn test_unknown_customer_is_reported() {
        let f = fixture();
        let ev = event(
            "evt_orphan",
            "customer.subscription.updated",
            subscription("active", json!({}), None),
        );

        let err = f.handler.handle_event(ev).await.unwrap_err();
        assert!(matches!(err, BillingError::CustomerNotFound(ref c) if c == "cus_kai"));
    }

    #[tokio::test]
    async fn test_checkout_links_customer() {
        let f = fixture();
        let account = Account::new("yui", "yui@example.com", PlanTier::Free);
        f.store.insert_account(&account).await.unwrap();

        let ev = event(
            "evt_checkout",
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "customer": "cus_yui",
                "client_reference_id": account.id.to_string(),
                "metadata": {},
            }),
        );
        f.handler.handle_event(ev).await.unwrap();

        let linked = f.store.find_by_stripe_customer("cus_yui").await.unwrap().unwrap();
        assert_eq!(linked.id, account.id);
    }

    #[tokio::test]
    async fn test_invoice_paid_sets_tier_and_notifies() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 0, 0).await;

        let ev = event(
            "evt_paid",
            "invoice.paid",
            json!({
                "id": "in_1",
                "customer": "cus_kai",
                "amount_paid": 500,
                "currency": "jpy",
                "subscription_details": { "metadata": { "plan_type": "premium" } },
                "lines": { "data": [] },
            }),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "premium");

        let sent = f.notifier.wait_for(2, WAIT).await;
        assert!(sent.iter().any(|n| matches!(n, Notification::PlanChanged(_))));
        assert!(sent
            .iter()
            .any(|n| matches!(
                n,
                Notification::PaymentSucceeded(p) if p.amount_cents == Some(500)
            )));
    }

    fn invoice_paid(
        id: &str,
        metadata: serde_json::Value,
        price: Option<&str>,
    ) -> crate::events::StripeEvent {
        let lines = match price {
            Some(p) => json!({ "data": [{ "price": { "id": p } }] }),
            None => json!({ "data": [] }),
        };
        event(
            id,
            "invoice.paid",
            json!({
                "id": format!("in_{id}"),
                "customer": "cus_kai",
                "amount_paid": 980,
                "currency": "jpy",
                "subscription_details": { "metadata": metadata },
                "lines": lines,
            }),
        )
    }

    // =========================================================================
    // Renewal invoices never lower the tier or delete anything
    // =========================================================================
    #[tokio::test]
    async fn test_invoice_paid_with_unmapped_price_keeps_premium() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 8, 8).await;

        f.handler
            .handle_event(invoice_paid("evt_renew", json!({}), Some("price_unmapped")))
            .await
            .unwrap();

        assert_eq!(f.tier_of(account.id).await, "premium");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 8);
        assert_eq!(f.ids(account.id, Visibility::Shared).await.len(), 8);
        let sent = f.notifier.wait_for(1, WAIT).await;
        assert!(matches!(&sent[..], [Notification::PaymentSucceeded(_)]));
    }

    #[tokio::test]
    async fn test_invoice_paid_never_lowers_tier() {
        let f = fixture();
        let account = f.account(PlanTier::Unlimited, 12, 3).await;

        f.handler
            .handle_event(invoice_paid("evt_lower", json!({"plan_type": "basic"}), None))
            .await
            .unwrap();

        assert_eq!(f.tier_of(account.id).await, "unlimited");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 12);
    }

    #[tokio::test]
    async fn test_invoice_paid_for_free_account_needs_explicit_tier() {
        let f = fixture();
        let account = f.account(PlanTier::Free, 1, 0).await;

        f.handler
            .handle_event(invoice_paid("evt_unknown_price", json!({}), Some("price_unmapped")))
            .await
            .unwrap();
        assert_eq!(f.tier_of(account.id).await, "free");

        f.handler
            .handle_event(invoice_paid("evt_mapped_price", json!({}), Some("price_premium")))
            .await
            .unwrap();
        assert_eq!(f.tier_of(account.id).await, "premium");
    }

    #[tokio::test]
    async fn test_payment_failed_notifies_without_tier_change() {
        let f = fixture();
        let account = f.account(PlanTier::Premium, 0, 0).await;

        let ev = event(
            "evt_failed",
            "invoice.payment_failed",
            json!({ "id": "in_2", "customer": "cus_kai", "amount_due": 980, "attempt_count": 2 }),
        );
        f.handler.handle_event(ev).await.unwrap();
        assert_eq!(f.tier_of(account.id).await, "premium");

        let sent = f.notifier.wait_for(1, WAIT).await;
        assert!(matches!(
            &sent[..],
            [Notification::PaymentFailed(p)] if p.amount_cents == Some(980)
        ));
    }

    // =========================================================================
    // A failing notifier never undoes the tier change
    // =========================================================================
    #[tokio::test]
    async fn test_notifier_failure_is_isolated() {
        let f = fixture_with(RecordingNotifier::failing());
        let account = f.account(PlanTier::Premium, 6, 0).await;

        let ev = event(
            "evt_quiet",
            "customer.subscription.updated",
            subscription("unpaid", json!({}), None),
        );
        f.handler.handle_event(ev).await.unwrap();

        assert_eq!(f.notifier.wait_for(1, WAIT).await.len(), 1);
        assert_eq!(f.tier_of(account.id).await, "free");
        assert_eq!(f.ids(account.id, Visibility::Private).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unhandled_event_type_is_acknowledged() {
        let f = fixture();
        let ev = event("evt_other", "customer.created", json!({ "id": "cus_new" }));
        assert!(f.handler.handle_event(ev).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_event_round_trip_through_handler() {
        let f = fixture();
        let payload = json!({
            "id": "evt_signed",
            "type": "invoice.paid",
            "created": 1_700_000_000,
            "data": { "object": {} },
        })
        .to_string();
        let now = 1_700_000_100;
        let header = format!("t={now},v1={}", sign_payload("whsec_edge", now, &payload).unwrap());

        let ev = f.handler.verify_event_at(&payload, &header, now).unwrap();
        assert_eq!(ev.id, "evt_signed");

        let wrong = format!("t={now},v1={}", sign_payload("whsec_other", now, &payload).unwrap());
        assert!(matches!(
            f.handler.verify_event_at(&payload, &wrong, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }
}

//! Dispatcher tests: full admission → retry → report flow with scripted providers

#[cfg(test)]
mod dispatcher_tests {
    use crate::{
        DispatchError, DispatchOutcome, InMemoryAuditSink, InMemoryCostTracker,
        NotificationDispatcher, ProviderGateway, ProviderRegistry, RetryPolicyResolver,
    };
    use async_trait::async_trait;
    use notify_guard_ratelimit::{
        CircuitBreakerConfig, CircuitBreakerRegistry, InMemoryTokenStore, MockClock,
        RateLimitConfigResolver, RateLimitingGate, TokenBucketLimiter,
    };
    use notify_guard_store::{ConfigStore, InMemoryConfigStore};
    use notify_guard_types::{
        Channel, DeliveryRequest, DeliveryResult, RateLimitConfig, RetryPolicy, SendRequest,
        WILDCARD,
    };
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Replays a fixed list of results, then keeps returning the last one
    struct ScriptedProvider {
        provider_id: String,
        channel: Channel,
        script: Mutex<VecDeque<DeliveryResult>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(provider_id: &str, channel: Channel, script: Vec<DeliveryResult>) -> Self {
            Self {
                provider_id: provider_id.to_string(),
                channel,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderGateway for ScriptedProvider {
        fn provider_id(&self) -> &str {
            &self.provider_id
        }

        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(&self, _request: &DeliveryRequest) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    struct Harness {
        dispatcher: NotificationDispatcher,
        provider: Arc<ScriptedProvider>,
        audit: Arc<InMemoryAuditSink>,
        costs: Arc<InMemoryCostTracker>,
        clock: MockClock,
    }

    async fn harness(
        rate_limits: &[RateLimitConfig],
        retry_policies: &[RetryPolicy],
        script: Vec<DeliveryResult>,
    ) -> Harness {
        let store = Arc::new(InMemoryConfigStore::new());
        for config in rate_limits {
            store.upsert_rate_limit_config(config).await.unwrap();
        }
        for policy in retry_policies {
            store.upsert_retry_policy(policy).await.unwrap();
        }

        let clock = MockClock::default();
        let audit = Arc::new(InMemoryAuditSink::new());
        let costs = Arc::new(InMemoryCostTracker::new());
        let provider = Arc::new(ScriptedProvider::new("twilio", Channel::Sms, script));

        let gate = RateLimitingGate::new(
            RateLimitConfigResolver::new(store.clone()),
            TokenBucketLimiter::new(Arc::new(InMemoryTokenStore::new()), Arc::new(clock.clone())),
        )
        .with_recorder(audit.clone());

        let breakers = Arc::new(CircuitBreakerRegistry::in_memory(
            CircuitBreakerConfig::default(),
            Arc::new(clock.clone()),
        ));

        let dispatcher = NotificationDispatcher::new(
            Arc::new(gate),
            RetryPolicyResolver::new(store),
            ProviderRegistry::new().register(provider.clone()),
        )
        .with_breakers(breakers)
        .with_audit(audit.clone())
        .with_costs(costs.clone());

        Harness {
            dispatcher,
            provider,
            audit,
            costs,
            clock,
        }
    }

    fn sms_request(n: u32) -> SendRequest {
        SendRequest::new(
            Some("T"),
            "U",
            "auth",
            Channel::Sms,
            DeliveryRequest::new(format!("n-{n}"), "+15550100", "Your code is 123456"),
        )
    }

    fn fast_retries(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(WILDCARD, WILDCARD)
            .with_max_attempts(max_attempts)
            .with_backoff(1.0, 2.0)
            .with_jitter_ms(0)
    }

    // ==================== Happy Path ====================

    #[tokio::test(start_paused = true)]
    async fn test_delivered_and_costed() {
        let h = harness(
            &[RateLimitConfig::global(WILDCARD, "sms")],
            &[fast_retries(3)],
            vec![DeliveryResult::delivered("twilio", "SM1")],
        )
        .await;

        let outcome = h
            .dispatcher
            .dispatch(sms_request(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                provider_id: "twilio".to_string(),
                provider_message_id: Some("SM1".to_string()),
                attempts: 1,
            }
        );
        assert_eq!(h.costs.total_for_service("auth"), 7_500);
        assert_eq!(h.audit.deliveries().len(), 1);
        assert_eq!(h.audit.admissions()[0].decision, "allowed");
    }

    // ==================== Rate Limiting ====================

    #[tokio::test(start_paused = true)]
    async fn test_second_send_rate_limited_with_retry_after() {
        let h = harness(
            &[RateLimitConfig::for_tenant("T", "auth", "sms").with_per_user(1, 60)],
            &[],
            vec![DeliveryResult::delivered("twilio", "SM1")],
        )
        .await;
        let cancel = CancellationToken::new();

        let first = h.dispatcher.dispatch(sms_request(1), &cancel).await.unwrap();
        assert!(first.is_delivered());

        let second = h.dispatcher.dispatch(sms_request(2), &cancel).await.unwrap();
        match second {
            DispatchOutcome::RateLimited(rejection) => {
                assert_eq!(rejection.retry_after_secs(), 60);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        // The provider saw only the admitted send
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.audit.deliveries()[1].outcome, "rate_limited");

        h.clock.advance(Duration::from_secs(60));
        assert!(h
            .dispatcher
            .dispatch(sms_request(3), &cancel)
            .await
            .unwrap()
            .is_delivered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_tuple_fails_open() {
        let h = harness(&[], &[], vec![DeliveryResult::delivered("twilio", "SM1")]).await;
        let cancel = CancellationToken::new();

        for n in 0..5 {
            assert!(h
                .dispatcher
                .dispatch(sms_request(n), &cancel)
                .await
                .unwrap()
                .is_delivered());
        }
        assert_eq!(h.audit.admissions()[0].decision, "unlimited");
    }

    // ==================== Retry and Circuit Breaking ====================

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_is_dead_lettered() {
        let h = harness(
            &[],
            &[fast_retries(3)],
            vec![DeliveryResult::failed("twilio", "503 service unavailable")],
        )
        .await;

        let outcome = h
            .dispatcher
            .dispatch(sms_request(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::RetryExhausted {
                provider_id: "twilio".to_string(),
                attempts: 3,
                last_error: "twilio: 503 service unavailable".to_string(),
            }
        );
        assert_eq!(h.provider.calls(), 3);
        assert_eq!(h.audit.dead_letters().len(), 1);
        assert_eq!(h.costs.entries().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let h = harness(
            &[],
            &[fast_retries(3)],
            vec![
                DeliveryResult::failed("twilio", "timeout"),
                DeliveryResult::delivered("twilio", "SM2"),
            ],
        )
        .await;

        let outcome = h
            .dispatcher
            .dispatch(sms_request(1), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Delivered { attempts: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let h = harness(
            &[],
            &[fast_retries(5)],
            vec![DeliveryResult::rejected("twilio", "invalid number")],
        )
        .await;

        let outcome = h
            .dispatcher
            .dispatch(sms_request(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::PermanentFailure {
                provider_id: "twilio".to_string(),
                attempts: 1,
                error: "invalid number".to_string(),
            }
        );
        assert_eq!(h.provider.calls(), 1);
        assert!(h.audit.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_across_dispatches() {
        let h = harness(
            &[],
            &[fast_retries(1)],
            vec![DeliveryResult::failed("twilio", "503")],
        )
        .await;
        let cancel = CancellationToken::new();

        for n in 0..5 {
            let outcome = h.dispatcher.dispatch(sms_request(n), &cancel).await.unwrap();
            assert_eq!(outcome.label(), "retry_exhausted");
        }

        let outcome = h.dispatcher.dispatch(sms_request(5), &cancel).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::CircuitOpen {
                provider_id: "twilio".to_string(),
                attempts: 0,
            }
        );
        assert_eq!(h.provider.calls(), 5);

        let snapshot = h.dispatcher.breakers().snapshot();
        assert_eq!(snapshot[0].consecutive_failures, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_dispatch() {
        let h = harness(&[], &[fast_retries(3)], vec![DeliveryResult::failed("twilio", "503")]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.dispatcher.dispatch(sms_request(1), &cancel).await.unwrap();
        assert_eq!(outcome.label(), "cancelled");
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_provider_is_an_error() {
        let h = harness(&[], &[], vec![DeliveryResult::delivered("twilio", "SM1")]).await;
        let request = SendRequest::new(
            None,
            "U",
            "auth",
            Channel::Push,
            DeliveryRequest::new("n-1", "device-token", "hi"),
        );

        let result = h
            .dispatcher
            .dispatch(request, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DispatchError::NoProvider(Channel::Push))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_provider_spends_no_tokens() {
        let h = harness(
            &[RateLimitConfig::global("auth", "push").with_per_user(1, 3600)],
            &[],
            vec![DeliveryResult::delivered("twilio", "SM1")],
        )
        .await;
        let push = |n: u32| {
            SendRequest::new(
                None,
                "U",
                "auth",
                Channel::Push,
                DeliveryRequest::new(format!("n-{n}"), "device-token", "hi"),
            )
        };

        for n in 0..3 {
            let result = h.dispatcher.dispatch(push(n), &CancellationToken::new()).await;
            assert!(matches!(result, Err(DispatchError::NoProvider(Channel::Push))));
        }

        // The gate was never consulted, so no admission was recorded
        assert!(h.audit.admissions().is_empty());
        assert!(h.audit.deliveries().is_empty());
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use tracing::{info, warn};

use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::ModelProvider;
use ordis_core::types::{ChatRequest, ProviderAttempt, StreamChunk};

/// Callback fired when the chain switches providers:
/// `(from_name, to_name, reason)`.
pub type FallbackFn = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// A provider with its chain priority; lower numbers are tried first.
pub struct ChainEntry {
    pub provider: Arc<dyn ModelProvider>,
    pub priority: u32,
}

/// The successful outcome of a chain execution.
pub struct ChainOutcome {
    pub stream: BoxStream<'static, Result<StreamChunk>>,
    pub provider: String,
    pub attempts: Vec<ProviderAttempt>,
}

impl std::fmt::Debug for ChainOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainOutcome")
            .field("provider", &self.provider)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Ordered provider list with status-code-aware failover.
///
/// The provider list is immutable per execution; config reload builds a new
/// chain rather than mutating this one.
pub struct FallbackChain {
    providers: Vec<Arc<dyn ModelProvider>>,
    timeout: Duration,
    on_fallback: Option<FallbackFn>,
}

impl FallbackChain {
    pub fn new(mut entries: Vec<ChainEntry>, timeout: Duration) -> Self {
        entries.sort_by_key(|e| e.priority);
        Self {
            providers: entries.into_iter().map(|e| e.provider).collect(),
            timeout,
            on_fallback: None,
        }
    }

    pub fn with_on_fallback(mut self, f: FallbackFn) -> Self {
        self.on_fallback = Some(f);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Try providers top-down until one yields a stream.
    ///
    /// - unavailable providers are skipped with reason "Provider unavailable";
    /// - 401/403 stops the whole chain and surfaces every attempt so far;
    /// - transport failures, timeouts, and retryable statuses advance to the
    ///   next provider;
    /// - a timed-out call counts as transport failure (status 0).
    pub async fn execute(&self, request: ChatRequest) -> Result<ChainOutcome> {
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        for provider in &self.providers {
            let name = provider.name().to_string();

            if !provider.is_available() {
                attempts.push(ProviderAttempt {
                    provider: name.clone(),
                    success: false,
                    error: Some("Provider unavailable".into()),
                    duration_ms: 0,
                });
                continue;
            }

            let start = Instant::now();
            let outcome = tokio::time::timeout(self.timeout, provider.chat(request.clone())).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Err(_) => {
                    let reason = format!(
                        "timed out after {}s (treated as transport failure)",
                        self.timeout.as_secs()
                    );
                    warn!(provider = %name, %reason, "Provider call timed out");
                    attempts.push(ProviderAttempt {
                        provider: name,
                        success: false,
                        error: Some(reason),
                        duration_ms,
                    });
                }
                Ok(Err(e)) if e.is_fatal_auth() => {
                    warn!(provider = %name, error = %e, "Fatal auth failure, stopping chain");
                    attempts.push(ProviderAttempt {
                        provider: name,
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    return Err(OrdisError::FallbackChain { attempts });
                }
                Ok(Err(e)) => {
                    warn!(provider = %name, error = %e, "Provider failed, trying next");
                    attempts.push(ProviderAttempt {
                        provider: name,
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                }
                Ok(Ok(stream)) => {
                    attempts.push(ProviderAttempt {
                        provider: name.clone(),
                        success: true,
                        error: None,
                        duration_ms,
                    });

                    // Record the switch when an earlier provider failed.
                    if attempts.len() > 1 {
                        let prior = &attempts[attempts.len() - 2];
                        let reason = prior.error.as_deref().unwrap_or("unknown");
                        info!(from = %prior.provider, to = %name, reason, "Fell back to next provider");
                        if let Some(ref hook) = self.on_fallback {
                            hook(&prior.provider, &name, reason);
                        }
                    }

                    return Ok(ChainOutcome {
                        stream,
                        provider: name,
                        attempts,
                    });
                }
            }
        }

        Err(OrdisError::FallbackChain { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ordis_core::types::ChatOptions;

    struct FakeProvider {
        name: String,
        available: bool,
        status: Option<u16>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn ok(name: &str) -> Self {
            Self {
                name: name.into(),
                available: true,
                status: None,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(name: &str, status: u16) -> Self {
            Self {
                status: Some(status),
                ..Self::ok(name)
            }
        }

        fn unavailable(name: &str) -> Self {
            Self {
                available: false,
                ..Self::ok(name)
            }
        }

        fn slow(name: &str, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::ok(name)
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ModelProvider for FakeProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn chat(
            &self,
            _request: ChatRequest,
        ) -> BoxFuture<'_, Result<BoxStream<'static, Result<StreamChunk>>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = self.status;
            let delay = self.delay;
            Box::pin(async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                if let Some(status) = status {
                    return Err(OrdisError::Provider {
                        status: Some(status),
                        message: "upstream error".into(),
                    });
                }
                let chunks = vec![
                    Ok(StreamChunk::TextDelta { text: "ok".into() }),
                    Ok(StreamChunk::MessageStop),
                ];
                Ok(Box::pin(futures::stream::iter(chunks))
                    as BoxStream<'static, Result<StreamChunk>>)
            })
        }
    }

    fn chain_of(providers: Vec<Arc<dyn ModelProvider>>) -> FallbackChain {
        let entries = providers
            .into_iter()
            .enumerate()
            .map(|(i, provider)| ChainEntry {
                provider,
                priority: i as u32,
            })
            .collect();
        FallbackChain::new(entries, Duration::from_millis(200))
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ordis_core::types::Message::user("hi")],
            options: ChatOptions::default(),
        }
    }

    #[tokio::test]
    async fn first_success_skips_the_rest() {
        let p1 = Arc::new(FakeProvider::ok("P1"));
        let p2 = Arc::new(FakeProvider::ok("P2"));
        let chain = chain_of(vec![p1.clone(), p2.clone()]);

        let outcome = chain.execute(request()).await.unwrap();
        assert_eq!(outcome.provider, "P1");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(p2.call_count(), 0);
    }

    #[tokio::test]
    async fn server_error_falls_through_and_fires_hook() {
        let p500 = Arc::new(FakeProvider::failing("P500", 500));
        let p2 = Arc::new(FakeProvider::ok("P2"));
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let fired_clone = fired.clone();

        let chain = chain_of(vec![p500.clone(), p2]).with_on_fallback(Arc::new(
            move |from, to, reason| {
                fired_clone
                    .lock()
                    .unwrap()
                    .push((from.to_string(), to.to_string(), reason.to_string()));
            },
        ));

        let outcome = chain.execute(request()).await.unwrap();
        assert_eq!(outcome.provider, "P2");
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].success);
        assert!(outcome.attempts[1].success);

        let text: String = outcome
            .stream
            .filter_map(|c| async move {
                match c {
                    Ok(StreamChunk::TextDelta { text }) => Some(text),
                    _ => None,
                }
            })
            .collect()
            .await;
        assert_eq!(text, "ok");

        let calls = fired.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "P500");
        assert_eq!(calls[0].1, "P2");
    }

    #[tokio::test]
    async fn auth_failure_short_circuits_whole_chain() {
        let p401 = Arc::new(FakeProvider::failing("P401", 401));
        let p2 = Arc::new(FakeProvider::ok("P2"));
        let chain = chain_of(vec![p401, p2.clone()]);

        let err = chain.execute(request()).await.unwrap_err();
        match err {
            OrdisError::FallbackChain { attempts } => {
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].provider, "P401");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(p2.call_count(), 0);
    }

    #[tokio::test]
    async fn unavailable_provider_is_skipped_with_reason() {
        let down = Arc::new(FakeProvider::unavailable("DOWN"));
        let up = Arc::new(FakeProvider::ok("UP"));
        let chain = chain_of(vec![down.clone(), up]);

        let outcome = chain.execute(request()).await.unwrap();
        assert_eq!(outcome.provider, "UP");
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(
            outcome.attempts[0].error.as_deref(),
            Some("Provider unavailable")
        );
        assert_eq!(down.call_count(), 0);
    }

    #[tokio::test]
    async fn timeout_counts_as_transport_failure() {
        let slow = Arc::new(FakeProvider::slow("SLOW", Duration::from_secs(10)));
        let chain = chain_of(vec![slow]);

        let err = chain.execute(request()).await.unwrap_err();
        match err {
            OrdisError::FallbackChain { attempts } => {
                assert_eq!(attempts.len(), 1);
                assert!(!attempts[0].success);
                assert!(attempts[0].error.as_deref().unwrap().contains("transport"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn priority_orders_the_chain() {
        let a = Arc::new(FakeProvider::ok("A"));
        let b = Arc::new(FakeProvider::ok("B"));
        let chain = FallbackChain::new(
            vec![
                ChainEntry {
                    provider: a,
                    priority: 5,
                },
                ChainEntry {
                    provider: b,
                    priority: 1,
                },
            ],
            Duration::from_millis(200),
        );
        assert_eq!(chain.provider_names(), vec!["B", "A"]);
    }
}

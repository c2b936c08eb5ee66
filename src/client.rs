// Per-service client: cache lookup for reads, rate limiting, retries for
// transient failures, and status-code classification into `ServiceError`.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    cache::{cache_key, ResponseCache},
    config::{BrokerConfig, RetryConfig},
    error::{ClientError, ServiceError, TransportError},
    model::{ServiceKind, SlotId},
    rate_limiter::RateLimiter,
    transport::{HttpTransport, Method, RawResponse, Transport},
};

// Remote operations a reservation service understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ListAvailable,
    ListHeld,
    Reserve(SlotId),
    Release(SlotId),
}

impl Operation {
    pub fn method(&self) -> Method {
        match self {
            Operation::ListAvailable | Operation::ListHeld => Method::Get,
            Operation::Reserve(_) => Method::Post,
            Operation::Release(_) => Method::Delete,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Operation::ListAvailable => "reservation/available".to_string(),
            Operation::ListHeld => "reservation".to_string(),
            Operation::Reserve(id) | Operation::Release(id) => format!("reservation/{}", id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::ListAvailable => "available",
            Operation::ListHeld => "held",
            Operation::Reserve(_) => "reserve",
            Operation::Release(_) => "release",
        }
    }

    // Only the listings are safe to serve from cache
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Operation::ListAvailable | Operation::ListHeld)
    }

    pub fn slot(&self) -> Option<&SlotId> {
        match self {
            Operation::Reserve(id) | Operation::Release(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClientStats {
    pub requests_sent: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    pub requests_retried: AtomicUsize,
    pub cache_hits: AtomicUsize,
}

enum Failure {
    Transient(String),
    Permanent(ServiceError),
}

fn classify(result: Result<RawResponse, TransportError>) -> Result<Bytes, Failure> {
    let response = match result {
        Ok(response) => response,
        Err(e) => return Err(Failure::Transient(e.to_string())),
    };

    if response.is_success() {
        return Ok(response.body);
    }

    let reason = response.reason();
    let error = match response.status {
        500..=599 => return Err(Failure::Transient(format!("{} {}", response.status, reason))),
        400 => ServiceError::InvalidRequest(reason),
        401 => ServiceError::Unauthorized(reason),
        409 => ServiceError::SlotUnavailable(reason),
        451 => ServiceError::Blocked(reason),
        status => ServiceError::UnknownServiceError { status, reason },
    };

    Err(Failure::Permanent(error))
}

pub struct ServiceClient {
    service: ServiceKind,
    transport: Arc<dyn Transport>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    retry_config: RetryConfig,
    stats: ClientStats,
}

impl ServiceClient {
    pub fn new(
        service: ServiceKind,
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            service,
            transport,
            rate_limiter,
            cache,
            retry_config,
            stats: ClientStats::default(),
        }
    }

    // HTTP client for `service` using the endpoint and tunables from `config`
    pub fn from_config(
        service: ServiceKind,
        config: &BrokerConfig,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let endpoint = config.service(service);
        let transport =
            HttpTransport::new(&endpoint.url, &endpoint.key, config.request_timeout()?)?;

        Ok(Self::new(
            service,
            Arc::new(transport),
            rate_limiter,
            cache,
            config.retry_config()?,
        ))
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Performs `operation` against the remote service.
    ///
    /// Cacheable reads are answered from the cache when possible, without
    /// touching the rate limiter. Everything else waits for a rate-limit
    /// slot on every attempt. 5xx and transport failures are retried up to
    /// `max_retries` more times; other statuses are returned immediately.
    pub async fn call(&self, operation: &Operation) -> Result<Bytes, ServiceError> {
        let service = self.service.as_str();
        let key = cache_key(service, operation.name());

        if operation.is_cacheable() {
            if let Some(cached) = self.cache.get(&key) {
                self.stats.cache_hits.fetch_add(1, Ordering::SeqCst);
                return Ok(cached);
            }
        }

        // taken before sending so a write that lands while the read is in
        // flight keeps the read's response out of the cache
        let generation = self.cache.generation(service);
        let method = operation.method();
        let path = operation.path();
        let max_attempts = self.retry_config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1 {
                self.stats.requests_retried.fetch_add(1, Ordering::SeqCst);
            }

            self.rate_limiter.wait_for_slot(service).await;
            self.stats.requests_sent.fetch_add(1, Ordering::SeqCst);
            debug!(service, %method, path = %path, attempt, "sending request");

            match classify(self.transport.send(method, &path).await) {
                Ok(body) => {
                    self.stats.requests_succeeded.fetch_add(1, Ordering::SeqCst);
                    if operation.is_cacheable() {
                        self.cache
                            .put_if_current(service, generation, &key, body.clone());
                    } else {
                        self.cache.invalidate_service(service);
                    }
                    return Ok(body);
                }
                Err(Failure::Permanent(error)) => {
                    self.stats.requests_failed.fetch_add(1, Ordering::SeqCst);
                    // a conflict proves the cached listing wrong as well
                    let conflict = matches!(error, ServiceError::SlotUnavailable(_));
                    if conflict && !operation.is_cacheable() {
                        self.cache.invalidate_service(service);
                    }
                    debug!(service, %method, path = %path, %error, "permanent failure");
                    return Err(error);
                }
                Err(Failure::Transient(reason)) => {
                    warn!(
                        service,
                        %method,
                        path = %path,
                        attempt,
                        max_attempts,
                        %reason,
                        "server error"
                    );

                    if attempt >= max_attempts {
                        self.stats.requests_failed.fetch_add(1, Ordering::SeqCst);
                        return Err(ServiceError::ServerUnavailable {
                            attempts: attempt,
                            reason,
                        });
                    }

                    let backoff: Duration = self.retry_config.backoff_for(attempt - 1);
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }
}
